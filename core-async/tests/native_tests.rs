//! Integration tests for core-async.
//!
//! These tests exercise the primitives the sync pipeline is built on:
//! bounded worker pools, cooperative cancellation and progress channels.

use core_async::{select, sync, task, time};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    assert_eq!(handle.await.unwrap(), 42);
}

#[tokio::test]
async fn test_task_spawn_blocking() {
    let handle = task::spawn_blocking(|| {
        std::thread::sleep(std::time::Duration::from_millis(10));
        100
    });
    assert_eq!(handle.await.unwrap(), 100);
}

#[tokio::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(100)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_join_set_bounded_by_semaphore() {
    let semaphore = Arc::new(sync::Semaphore::new(2));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut set = task::JoinSet::new();

    for i in 0..8 {
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let running = running.clone();
        let peak = peak.clone();
        set.spawn(async move {
            let _permit = permit;
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(time::Duration::from_millis(5)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            i
        });
    }

    let mut sum = 0;
    while let Some(joined) = set.join_next().await {
        sum += joined.unwrap();
    }

    assert_eq!(sum, (0..8).sum::<i32>());
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_cancellation_interrupts_wait() {
    let cancel = sync::CancellationToken::new();
    let semaphore = Arc::new(sync::Semaphore::new(0));

    let waiter = {
        let cancel = cancel.clone();
        let semaphore = semaphore.clone();
        task::spawn(async move {
            select! {
                _ = cancel.cancelled() => "cancelled",
                _ = semaphore.acquire_owned() => "acquired",
            }
        })
    };

    time::sleep(time::Duration::from_millis(10)).await;
    cancel.cancel();
    assert_eq!(waiter.await.unwrap(), "cancelled");
}

#[tokio::test]
async fn test_mpsc_closes_when_senders_drop() {
    let (tx, mut rx) = sync::mpsc::channel(4);

    task::spawn(async move {
        for i in 0..5 {
            tx.send(i).await.unwrap();
        }
    });

    let mut received = Vec::new();
    while let Some(value) = rx.recv().await {
        received.push(value);
    }
    assert_eq!(received, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_full_channel_try_send() {
    let (tx, _rx) = sync::mpsc::channel::<u8>(1);
    tx.try_send(1).unwrap();
    assert!(matches!(
        tx.try_send(2),
        Err(sync::mpsc::error::TrySendError::Full(2))
    ));
}

#[tokio::test]
async fn test_oneshot_channel() {
    let (tx, rx) = sync::oneshot::channel();

    task::spawn(async move {
        time::sleep(time::Duration::from_millis(10)).await;
        tx.send(42).unwrap();
    });

    assert_eq!(rx.await.unwrap(), 42);
}

#[tokio::test]
async fn test_interval_ticks() {
    let mut interval = time::interval(time::Duration::from_millis(10));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let start = time::Instant::now();
    // first tick is immediate
    interval.tick().await;
    for _ in 0..3 {
        interval.tick().await;
    }

    assert!(start.elapsed() >= time::Duration::from_millis(30));
}

#[tokio::test]
async fn test_mutex_serializes_writers() {
    let counter = Arc::new(sync::Mutex::new(0));
    let mut handles = vec![];

    for _ in 0..10 {
        let counter = counter.clone();
        handles.push(task::spawn(async move {
            *counter.lock().await += 1;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*counter.lock().await, 10);
}
