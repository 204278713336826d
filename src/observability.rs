use std::net::SocketAddr;

// ── RED metrics (run-driven) ────────────────────────────────────

/// Counter: allocation runs. Labels: mode (iteration | single_request), status.
pub const ALLOCATION_RUNS_TOTAL: &str = "resalloc_allocation_runs_total";

/// Histogram: allocation run latency in seconds.
pub const ALLOCATION_RUN_DURATION_SECONDS: &str = "resalloc_allocation_run_duration_seconds";

/// Counter: allocations committed.
pub const ALLOCATIONS_CREATED_TOTAL: &str = "resalloc_allocations_created_total";

/// Counter: requests declined by allocation runs.
pub const REQUESTS_DECLINED_TOTAL: &str = "resalloc_requests_declined_total";

/// Counter: requests accepted by intake.
pub const REQUESTS_SUBMITTED_TOTAL: &str = "resalloc_requests_submitted_total";

/// Histogram: greedy rounds needed per processed day.
pub const MATCHING_ROUNDS: &str = "resalloc_matching_rounds";

// ── USE metrics (store utilization) ─────────────────────────────

/// Counter: transactions rolled back or rejected at commit.
pub const TXN_ABORTS_TOTAL: &str = "resalloc_txn_aborts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "resalloc_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "resalloc_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
