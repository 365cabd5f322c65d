use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_conductor::coordination::admission::AdmissionQueue;
use agent_conductor::AppError;

async fn wait_for_waiters(queue: &AdmissionQueue, n: usize) {
    while queue.waiting() < n {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn waiters_are_admitted_in_arrival_order() {
    let queue = AdmissionQueue::default();
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = queue.acquire().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..4 {
        let task_queue = queue.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            task_queue
                .run(async {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .await
                .unwrap();
        }));
        wait_for_waiters(&queue, i + 1).await;
    }

    drop(held);
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn at_most_one_request_holds_the_slot() {
    let queue = AdmissionQueue::default();
    let active = Arc::new(Mutex::new((0usize, 0usize)));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let queue = queue.clone();
        let active = Arc::clone(&active);
        tasks.push(tokio::spawn(async move {
            queue
                .run(async {
                    {
                        let mut a = active.lock().unwrap();
                        a.0 += 1;
                        a.1 = a.1.max(a.0);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.lock().unwrap().0 -= 1;
                    Ok(())
                })
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(active.lock().unwrap().1, 1);
}

#[tokio::test]
async fn abandoned_waiter_leaves_queue_without_taking_slot() {
    let queue = AdmissionQueue::default();
    let held = queue.acquire().await.unwrap();

    let q = queue.clone();
    let abandoned = tokio::spawn(async move { q.acquire().await.map(|_| ()) });
    wait_for_waiters(&queue, 1).await;
    abandoned.abort();
    let _ = abandoned.await;
    assert_eq!(queue.waiting(), 0);

    drop(held);
    let next = tokio::time::timeout(Duration::from_secs(1), queue.acquire())
        .await
        .expect("slot must be free")
        .unwrap();
    assert!(queue.is_busy());
    drop(next);
    assert!(!queue.is_busy());
}

#[tokio::test]
async fn failing_request_releases_slot_for_next_waiter() {
    let queue = AdmissionQueue::default();
    let failed: agent_conductor::Result<()> = queue
        .run(async { Err(AppError::Inference("connection refused".into())) })
        .await;
    assert!(matches!(failed, Err(AppError::Inference(_))));
    assert_eq!(queue.run(async { Ok("next") }).await.unwrap(), "next");
}
