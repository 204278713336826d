use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use resalloc::config::Config;
use resalloc::engine::AllocationEngine;
use resalloc::model::{Criteria, Day, NewRequest, RequestTarget};
use resalloc::notify::NotifyHub;
use resalloc::seed::{self, Seed};
use resalloc::store::Store;

/// Greedy per-day allocation of shared resources.
#[derive(Debug, Parser)]
#[command(name = "resalloc", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load groups, resources, iterations and requests from a JSON seed file.
    Import { path: PathBuf },

    /// Run automatic allocation for an iteration, or for one request of it.
    Allocate {
        #[arg(long)]
        iteration: Ulid,
        #[arg(long)]
        request: Option<Ulid>,
    },

    /// Submit a request. Allocated iterations handle it immediately.
    Submit {
        #[arg(long)]
        iteration: Ulid,
        #[arg(long)]
        user: Ulid,
        #[arg(long)]
        date: Day,
        #[arg(long, conflicts_with = "group")]
        resource: Option<Ulid>,
        #[arg(long)]
        group: Option<Ulid>,
    },

    /// Print an iteration with its requests and allocations.
    Show {
        #[arg(long)]
        iteration: Ulid,
    },

    /// Rewrite the WAL from current state.
    Compact,
}

/// `--resource` and `--group` exclude each other at parse time; one of them
/// must still be present.
fn request_target(resource: Option<Ulid>, group: Option<Ulid>) -> Option<RequestTarget> {
    match (resource, group) {
        (Some(id), _) => Some(RequestTarget::Resource(id)),
        (None, Some(id)) => Some(RequestTarget::Group(id)),
        (None, None) => None,
    }
}

fn print_json(value: &impl Serialize) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.config;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    resalloc::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let store = Store::open(wal_path.clone(), Arc::new(NotifyHub::new()))?;
    let engine = AllocationEngine::new(Arc::new(store), config.engine());
    info!(wal = %wal_path.display(), "resalloc ready");

    match cli.command {
        Command::Import { path } => {
            let seed = Seed::from_path(&path)?;
            let report = seed::import(engine.store(), seed).await?;
            print_json(&report)?;
        }
        Command::Allocate { iteration, request } => {
            let criteria = match request {
                Some(request_id) => Criteria::single_request(iteration, request_id),
                None => Criteria::iteration(iteration),
            };
            let allocations = engine.automatic_allocation(criteria).await?;
            print_json(&allocations)?;
        }
        Command::Submit {
            iteration,
            user,
            date,
            resource,
            group,
        } => {
            let target =
                request_target(resource, group).ok_or("either --resource or --group is required")?;
            let submission = engine
                .submit_request(NewRequest {
                    id: Ulid::new(),
                    iteration_id: iteration,
                    user_id: user,
                    date,
                    target,
                })
                .await?;
            print_json(&submission)?;
        }
        Command::Show { iteration } => {
            let store = engine.store();
            let mut snapshot = store.get_iteration(iteration).await?;
            snapshot.allocations = store.list_allocations(iteration).await?;
            print_json(&snapshot)?;
        }
        Command::Compact => {
            engine.store().compact_wal().await?;
        }
    }

    if engine.store().maybe_compact(config.compact_threshold).await? {
        info!("WAL compacted after reaching threshold");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATION: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const USER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn submit(extra: &[&str]) -> Result<Command, clap::Error> {
        let mut args = vec![
            "resalloc", "submit", "--iteration", ITERATION, "--user", USER, "--date", "2020-01-01",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).map(|cli| cli.command)
    }

    fn target_of(command: Command) -> Option<RequestTarget> {
        match command {
            Command::Submit { resource, group, .. } => request_target(resource, group),
            other => panic!("expected submit, got {other:?}"),
        }
    }

    #[test]
    fn submit_takes_resource_or_group() {
        let desk = Ulid(7);
        let by_resource = submit(&["--resource", &desk.to_string()]).unwrap();
        assert_eq!(target_of(by_resource), Some(RequestTarget::Resource(desk)));

        let by_group = submit(&["--group", &desk.to_string()]).unwrap();
        assert_eq!(target_of(by_group), Some(RequestTarget::Group(desk)));
    }

    #[test]
    fn submit_without_target_has_no_target() {
        let command = submit(&[]).unwrap();
        assert_eq!(target_of(command), None);
    }

    #[test]
    fn submit_with_both_targets_is_a_usage_error() {
        let desk = Ulid(7).to_string();
        let err = submit(&["--resource", &desk, "--group", &desk]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
