use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::oneshot;
use tokio::time::sleep;

#[tokio::test]
async fn never_runs_more_than_size_tasks_at_once() {
    let pool = SessionPool::new(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        pool.spawn(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    let report = pool.drain(Duration::from_secs(2)).await;
    assert_eq!(report, DrainReport { completed: 6, cancelled: 0 });
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn drain_waits_for_in_flight_work() {
    let pool = SessionPool::new(4);
    let finished = Arc::new(AtomicBool::new(false));
    {
        let finished = Arc::clone(&finished);
        pool.spawn(async move {
            sleep(Duration::from_millis(50)).await;
            finished.store(true, Ordering::SeqCst);
        });
    }

    let report = pool.drain(Duration::from_secs(1)).await;
    assert_eq!(report.completed, 1);
    assert_eq!(report.cancelled, 0);
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn drain_aborts_stragglers_after_grace() {
    let pool = SessionPool::new(4);
    pool.spawn(std::future::pending::<()>());
    // Let the task take its permit before draining.
    sleep(Duration::from_millis(10)).await;

    let report = pool.drain(Duration::from_millis(50)).await;
    assert_eq!(report.cancelled, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(pool.pending(), 0);
}

#[tokio::test]
async fn queued_work_never_starts_once_draining() {
    let pool = SessionPool::new(1);
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let started = Arc::new(AtomicBool::new(false));

    pool.spawn(async move {
        let _ = release_rx.await;
    });
    {
        let started = Arc::clone(&started);
        pool.spawn(async move {
            started.store(true, Ordering::SeqCst);
        });
    }
    sleep(Duration::from_millis(10)).await;
    assert!(!started.load(Ordering::SeqCst), "second task should be queued behind the first");

    let drain = pool.drain(Duration::from_millis(500));
    let release = async {
        sleep(Duration::from_millis(20)).await;
        let _ = release_tx.send(());
    };
    let (report, ()) = tokio::join!(drain, release);

    assert!(!started.load(Ordering::SeqCst));
    assert_eq!(report.cancelled, 0);
}

#[tokio::test]
async fn spawn_reaps_finished_tasks() {
    let pool = SessionPool::new(2);
    pool.spawn(async {});
    sleep(Duration::from_millis(20)).await;
    pool.spawn(std::future::pending::<()>());
    assert_eq!(pool.pending(), 1);
    assert_eq!(pool.size(), 2);
}
