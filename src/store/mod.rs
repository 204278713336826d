mod catalog;
mod error;
mod mutations;
mod queries;
mod txn;

pub use catalog::Catalog;
pub use error::StoreError;
pub use txn::StoreTxn;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::Event;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        batch: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole group.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { batch, response } => {
                let mut group = vec![(batch, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { batch, response }) => group.push((batch, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(group.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_group(&mut wal, &group);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_group(group, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

fn flush_group(wal: &mut Wal, group: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (batch, _) in group {
        if let Err(e) = wal.append_buffered(batch) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next group.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_group(group: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in group {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are grouped by the writer loop"),
    }
}

/// Durable in-memory catalog of groups, resources, iterations, requests and allocations.
pub struct Store {
    pub(super) catalog: RwLock<Catalog>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serializes allocation runs per iteration.
    run_locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Store {
    /// Replay the WAL at `wal_path` and start its writer task. Needs a Tokio runtime.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut catalog = Catalog::new();
        for event in &events {
            catalog.apply(event);
        }
        info!(events = events.len(), path = %wal_path.display(), "store replayed");

        Ok(Self {
            catalog: RwLock::new(catalog),
            wal_tx,
            notify,
            run_locks: DashMap::new(),
        })
    }

    /// Write a batch as one WAL record via the background group-commit writer.
    async fn wal_append(&self, batch: Vec<Event>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { batch, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Validate + WAL-append + apply + notify, all under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        catalog: &mut Catalog,
        batch: Vec<Event>,
    ) -> Result<(), StoreError> {
        catalog.check_batch(&batch)?;
        self.wal_append(batch.clone()).await?;
        for event in &batch {
            catalog.apply(event);
        }
        for event in &batch {
            self.notify.send(event);
        }
        Ok(())
    }

    /// Open a transaction for an allocation run. Waits while another run
    /// holds the same iteration.
    pub async fn begin(&self, iteration_id: Ulid) -> StoreTxn<'_> {
        let lock = self.run_locks.entry(iteration_id).or_default().clone();
        let guard = lock.lock_owned().await;
        debug!(%iteration_id, "transaction opened");
        StoreTxn::new(self, iteration_id, guard)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        // Hold the read lock until the swap is done so no commit slips in between.
        let catalog = self.catalog.read().await;
        let events = catalog.snapshot_events();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        drop(catalog);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Compact once `threshold` records have been appended since the last compaction.
    pub async fn maybe_compact(&self, threshold: u64) -> Result<bool, StoreError> {
        let appends = self.wal_appends_since_compact().await;
        if appends < threshold {
            return Ok(false);
        }
        self.compact_wal().await?;
        Ok(true)
    }
}
