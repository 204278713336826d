use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::broadcast;
use ulid::Ulid;

use resalloc::engine::{AllocationEngine, EngineConfig, EngineError};
use resalloc::model::*;
use resalloc::notify::NotifyHub;
use resalloc::seed::{self, ImportReport, Seed};
use resalloc::store::Store;

// ── Test infrastructure ──────────────────────────────────────

const SEED: &str = r#"{
    "groups": [
        {"name": "hq"},
        {"name": "quiet", "top_group": "hq"},
        {"name": "open", "top_group": "hq"},
        {"name": "garage"}
    ],
    "resources": [
        {"name": "desk-q1", "top_group": "hq", "groups": ["quiet"]},
        {"name": "desk-q2", "top_group": "hq", "groups": ["quiet"]},
        {"name": "desk-o1", "top_group": "hq", "groups": ["open"]},
        {"name": "spot-1", "top_group": "garage"}
    ],
    "iterations": [
        {"key": "sprint", "start_date": "2021-03-01", "end_date": "2021-03-05"}
    ],
    "requests": [
        {"id": "00000000000000000000000101", "iteration": "sprint", "user": "00000000000000000000000001", "date": "2021-03-01", "resource": "desk-q1"},
        {"id": "00000000000000000000000102", "iteration": "sprint", "user": "00000000000000000000000002", "date": "2021-03-01", "resource": "desk-q1"},
        {"id": "00000000000000000000000103", "iteration": "sprint", "user": "00000000000000000000000003", "date": "2021-03-01", "group": "quiet"},
        {"id": "00000000000000000000000104", "iteration": "sprint", "user": "00000000000000000000000001", "date": "2021-03-01", "resource": "spot-1"},
        {"id": "00000000000000000000000105", "iteration": "sprint", "user": "00000000000000000000000004", "date": "2021-03-01", "resource": "spot-1"},
        {"id": "00000000000000000000000106", "iteration": "sprint", "user": "00000000000000000000000002", "date": "2021-03-02", "group": "open"}
    ]
}"#;

fn wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("resalloc_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn day(m: u32, d: u32) -> Day {
    NaiveDate::from_ymd_opt(2021, m, d).unwrap()
}

fn user(n: u128) -> Ulid {
    Ulid(n)
}

async fn seeded(path: &PathBuf) -> (AllocationEngine<Store>, ImportReport) {
    let store = Store::open(path.clone(), Arc::new(NotifyHub::new())).unwrap();
    let seed: Seed = serde_json::from_str(SEED).unwrap();
    let report = seed::import(&store, seed).await.unwrap();
    (AllocationEngine::new(Arc::new(store), EngineConfig::default()), report)
}

async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn seeded_office_allocates_and_survives_restart() {
    let path = wal_path("flow.wal");
    let (engine, report) = seeded(&path).await;
    let sprint = report.iterations["sprint"];

    let allocations = engine
        .automatic_allocation(Criteria::iteration(sprint))
        .await
        .unwrap();

    // Day 1: user 1 takes desk-q1 over user 2, who falls back to desk-q2.
    // User 3 asked for "quiet" but only the open desk is left.
    let day1: Vec<_> = allocations.iter().filter(|a| a.date == day(3, 1)).collect();
    let holder = |name: &str| {
        let rid = report.resources[name];
        day1.iter().find(|a| a.resource_id == rid).map(|a| a.user_id)
    };
    assert_eq!(holder("desk-q1"), Some(user(1)));
    assert_eq!(holder("desk-q2"), Some(user(2)));
    assert_eq!(holder("spot-1"), Some(user(1)));
    assert_eq!(holder("desk-o1"), Some(user(3)));

    // Day 2: the only request gets the open desk
    let day2: Vec<_> = allocations.iter().filter(|a| a.date == day(3, 2)).collect();
    assert_eq!(day2.len(), 1);
    assert_eq!(day2[0].resource_id, report.resources["desk-o1"]);

    let snapshot = engine.store().get_iteration(sprint).await.unwrap();
    assert!(snapshot.iteration.is_allocated);
    let declined: Vec<_> = snapshot
        .requests
        .iter()
        .filter(|r| r.status == RequestStatus::Declined)
        .map(|r| r.user_id)
        .collect();
    assert_eq!(declined, vec![user(4)]);

    drop(engine);
    let reopened = Store::open(path, Arc::new(NotifyHub::new())).unwrap();
    let replayed = reopened.get_iteration(sprint).await.unwrap();
    assert_eq!(replayed.requests, snapshot.requests);
    assert_eq!(
        reopened.list_allocations(sprint).await.unwrap().len(),
        allocations.len()
    );
}

#[tokio::test]
async fn subscribers_see_a_run_only_after_commit() {
    let path = wal_path("notify.wal");
    let (engine, report) = seeded(&path).await;
    let sprint = report.iterations["sprint"];
    let mut rx = engine.store().notify.subscribe(sprint);

    let allocations = engine
        .automatic_allocation(Criteria::iteration(sprint))
        .await
        .unwrap();

    let mut created = 0;
    let mut resolved = 0;
    loop {
        match next_event(&mut rx).await {
            Event::AllocationCreated { .. } => created += 1,
            Event::RequestResolved { .. } => resolved += 1,
            Event::IterationAllocated { id } => {
                assert_eq!(id, sprint);
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(created, allocations.len());
    assert_eq!(resolved, 6);
}

#[tokio::test]
async fn late_request_in_another_top_group() {
    let path = wal_path("late.wal");
    let (engine, report) = seeded(&path).await;
    let sprint = report.iterations["sprint"];
    engine
        .automatic_allocation(Criteria::iteration(sprint))
        .await
        .unwrap();

    // Nobody holds the garage spot on day 2
    let submission = engine
        .submit_request(NewRequest {
            id: Ulid::new(),
            iteration_id: sprint,
            user_id: user(3),
            date: day(3, 2),
            target: RequestTarget::Resource(report.resources["spot-1"]),
        })
        .await
        .unwrap();
    assert_eq!(submission.request.status, RequestStatus::Completed);
    assert_eq!(submission.allocations.len(), 1);
    assert_eq!(submission.allocations[0].points, 7);

    // Day 1 garage spot is already held by user 1
    let submission = engine
        .submit_request(NewRequest {
            id: Ulid::new(),
            iteration_id: sprint,
            user_id: user(5),
            date: day(3, 1),
            target: RequestTarget::Group(report.groups["garage"]),
        })
        .await
        .unwrap();
    assert_eq!(submission.request.status, RequestStatus::Declined);
    assert!(submission.allocations.is_empty());
}

#[tokio::test]
async fn concurrent_runs_on_one_iteration_serialize() {
    let path = wal_path("concurrent.wal");
    let (engine, report) = seeded(&path).await;
    let engine = Arc::new(engine);
    let sprint = report.iterations["sprint"];

    let a = tokio::spawn({
        let engine = engine.clone();
        async move { engine.automatic_allocation(Criteria::iteration(sprint)).await }
    });
    let b = tokio::spawn({
        let engine = engine.clone();
        async move { engine.automatic_allocation(Criteria::iteration(sprint)).await }
    });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    // Whichever ran second found nothing left to do
    assert!(a.is_empty() != b.is_empty());
    let stored = engine.store().list_allocations(sprint).await.unwrap();
    assert_eq!(stored.len(), a.len() + b.len());
}

#[tokio::test]
async fn unknown_iteration_is_reported() {
    let path = wal_path("unknown.wal");
    let (engine, _) = seeded(&path).await;
    let result = engine
        .automatic_allocation(Criteria::iteration(Ulid::new()))
        .await;
    assert!(matches!(result, Err(EngineError::NotFound { .. })));
}
