//! Saturation, backlog and shutdown behaviour of the work queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use waypoint_workqueue::{WorkQueue, WorkQueueConfig, WorkQueueError};

fn small_queue(workers: usize, backlog: usize) -> Arc<WorkQueue> {
    Arc::new(
        WorkQueue::new(
            WorkQueueConfig::new("test")
                .with_high_water_mark(workers)
                .with_low_water_mark(workers.min(1))
                .with_max_queue_size(backlog),
        )
        .unwrap(),
    )
}

/// Occupies one worker until the returned notify fires.
fn block_worker(queue: &WorkQueue) -> (Arc<Notify>, oneshot::Receiver<()>) {
    let release = Arc::new(Notify::new());
    let (started_tx, started_rx) = oneshot::channel();
    let gate = Arc::clone(&release);
    queue
        .execute(async move {
            let _ = started_tx.send(());
            gate.notified().await;
        })
        .unwrap();
    (release, started_rx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_saturated_queue_rejects_without_blocking() {
    let queue = small_queue(1, 1);

    let (release, started) = block_worker(&queue);
    started.await.unwrap();
    assert_eq!(queue.active_count(), 1);

    // one backlog slot
    queue.execute(async {}).unwrap();
    assert_eq!(queue.size(), 1);
    assert!(queue.is_full());

    let err = queue.execute(async {}).unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(queue.stats().total_rejected(), 1);

    release.notify_one();
    assert!(queue.await_termination(Duration::from_secs(2)).await);
    assert_eq!(queue.stats().total_completed(), 2);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_backlog_runs_in_submission_order() {
    let queue = small_queue(1, 8);
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let order = Arc::clone(&order);
        queue
            .execute(async move { order.lock().unwrap().push(i) })
            .unwrap();
    }

    release.notify_one();
    assert!(queue.await_termination(Duration::from_secs(2)).await);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_with_timeout_waits_for_room() {
    let queue = small_queue(1, 0);
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        release.notify_one();
    });

    queue
        .execute_with_timeout(
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(2),
        )
        .await
        .unwrap();

    releaser.await.unwrap();
    assert!(queue.await_termination(Duration::from_secs(2)).await);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_execute_with_timeout_gives_up() {
    let queue = small_queue(1, 0);
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let err = queue
        .execute_with_timeout(async {}, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(err.is_rejected());

    release.notify_one();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_discards_backlog() {
    let queue = small_queue(1, 4);
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let queued = queue.submit(async { "never" }).unwrap();
    queue.shutdown(false);

    assert!(matches!(
        queue.execute(async {}),
        Err(WorkQueueError::Shutdown(_))
    ));
    assert!(matches!(queued.join().await, Err(WorkQueueError::Cancelled(_))));

    release.notify_one();
    assert!(queue.await_termination(Duration::from_secs(2)).await);
    assert_eq!(queue.stats().total_cancelled(), 1);
    assert_eq!(queue.stats().total_completed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_processes_remaining() {
    let queue = small_queue(1, 4);
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let queued = queue.submit(async { "drained" }).unwrap();
    queue.shutdown(true);
    release.notify_one();

    assert_eq!(queued.join().await.unwrap(), "drained");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backlog_outlives_dequeue_timeout() {
    let queue = Arc::new(
        WorkQueue::new(
            WorkQueueConfig::new("slow")
                .with_high_water_mark(1)
                .with_low_water_mark(1)
                .with_dequeue_timeout(Duration::from_millis(20)),
        )
        .unwrap(),
    );
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let queued = queue.submit(async { "late" }).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(queue.size(), 1);

    release.notify_one();
    assert_eq!(queued.join().await.unwrap(), "late");
    assert_eq!(queue.stats().total_completed(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_workers_above_low_water_mark_exit() {
    let queue = Arc::new(
        WorkQueue::new(
            WorkQueueConfig::new("elastic")
                .with_high_water_mark(2)
                .with_low_water_mark(1)
                .with_dequeue_timeout(Duration::from_millis(20)),
        )
        .unwrap(),
    );
    let (first, first_started) = block_worker(&queue);
    let (second, second_started) = block_worker(&queue);
    first_started.await.unwrap();
    second_started.await.unwrap();
    assert_eq!(queue.worker_count(), 2);

    first.notify_one();
    second.notify_one();
    assert!(queue.await_termination(Duration::from_secs(2)).await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(queue.worker_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_aborted_backlog_task_never_runs() {
    let queue = small_queue(1, 4);
    let (release, started) = block_worker(&queue);
    started.await.unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let queued = queue
        .submit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    queued.abort();

    release.notify_one();
    assert!(matches!(queued.join().await, Err(WorkQueueError::Cancelled(_))));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_schedule_runs_after_delay() {
    let queue = small_queue(2, 2);
    let (tx, rx) = oneshot::channel();
    let scheduled_at = tokio::time::Instant::now();

    queue
        .schedule(
            async move {
                let _ = tx.send(tokio::time::Instant::now());
            },
            Duration::from_millis(25),
        )
        .unwrap();

    let ran_at = rx.await.unwrap();
    assert!(ran_at - scheduled_at >= Duration::from_millis(25));
}
