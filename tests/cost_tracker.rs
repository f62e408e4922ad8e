use std::sync::Arc;

use scout_review::cost::CostBreakdown;
use scout_review::cost_tracker::CostTracker;
use scout_review::store::Database;
use tempfile::tempdir;

#[tokio::test]
async fn ledger_persists_across_instances() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("costs.sqlite");

    let tracker = CostTracker::new(Database::open(&db_path).unwrap());
    tracker.add("gen-1", CostBreakdown::new(0.001, 0.002, 0.0)).await;
    tracker.add("gen-2", CostBreakdown::new(0.0005, 0.0, 0.039)).await;
    assert_eq!(tracker.snapshot().count, 2);

    let reopened = CostTracker::new(Database::open(&db_path).unwrap());
    let snap = reopened.load_snapshot().await;
    assert_eq!(snap.count, 2);
    assert!((snap.total.total_cost() - 0.0425).abs() < 1e-12);

    // The first add on a fresh tracker appends to what was stored.
    let fresh = CostTracker::new(Database::open(&db_path).unwrap());
    fresh.add("gen-3", CostBreakdown::new(0.0, 0.0, 0.039)).await;
    assert_eq!(fresh.snapshot().count, 3);
}

#[tokio::test]
async fn concurrent_adds_are_all_counted() {
    let tracker = Arc::new(CostTracker::new(Database::open_in_memory().unwrap()));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tracker
                    .add(format!("gen-{i}"), CostBreakdown::new(0.001, 0.0, 0.0))
                    .await;
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }

    let snap = tracker.snapshot();
    assert_eq!(snap.count, 20);
    assert!((snap.total.total_cost() - 0.02).abs() < 1e-9);
    assert_eq!(tracker.entries().await.len(), 20);
}

#[tokio::test]
async fn subscribers_see_updates_and_clear() {
    let tracker = CostTracker::new(Database::open_in_memory().unwrap());
    let mut rx = tracker.subscribe();

    tracker.add("gen-1", CostBreakdown::new(0.01, 0.0, 0.0)).await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().count, 1);

    tracker.clear().await;
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().count, 0);
    assert_eq!(tracker.load_snapshot().await.total.total_cost(), 0.0);
}

#[tokio::test]
async fn export_is_deterministic_and_ordered() {
    let tracker = CostTracker::new(Database::open_in_memory().unwrap());
    tracker.add("alpha", CostBreakdown::new(0.001, 0.0, 0.0)).await;
    tracker.add("beta", CostBreakdown::new(0.0, 0.002, 0.0)).await;
    tracker.add("gamma", CostBreakdown::new(0.0, 0.0, 0.039)).await;

    let report = tracker.export().await;
    assert_eq!(report, tracker.export().await);
    assert!(report.starts_with("Review generation costs\n"));
    assert!(report.contains("Generations: 3"));

    let totals = report.find("Totals").unwrap();
    let alpha = report.find("alpha").unwrap();
    let beta = report.find("beta").unwrap();
    let gamma = report.find("gamma").unwrap();
    assert!(totals < alpha && alpha < beta && beta < gamma);
}
