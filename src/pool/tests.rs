use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_executes_submitted_tasks() {
    let pool = WorkerPool::new(4).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = Arc::clone(&counter);
        pool.submit(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    drop(pool); // joins workers after the queue drains
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn test_worker_index_in_range() {
    let pool = WorkerPool::new(3).unwrap();
    let bad = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let bad = Arc::clone(&bad);
        pool.submit(move |worker| {
            if worker >= 3 {
                bad.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    drop(pool);
    assert_eq!(bad.load(Ordering::SeqCst), 0);
}

#[test]
fn test_per_worker_heaps_are_addressable() {
    let pool = WorkerPool::new(2).unwrap();
    let heaps = pool.heaps();
    assert_eq!(heaps.len(), 2);

    let target = Arc::clone(&heaps);
    pool.submit(move |_| {
        let mut heap = target[1].lock();
        heap.push(9);
        heap.push(4);
    });
    drop(pool);

    assert!(heaps[0].lock().is_empty());
    assert_eq!(pool_min(&heaps, 1), Some(4));
}

fn pool_min(heaps: &[parking_lot::Mutex<crate::heap::Heap>], i: usize) -> Option<i64> {
    heaps[i].lock().peek_min()
}

#[test]
fn test_tasks_run_fifo_on_single_worker() {
    let pool = WorkerPool::new(1).unwrap();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for i in 0..10 {
        let order = Arc::clone(&order);
        pool.submit(move |_| order.lock().push(i));
    }
    drop(pool);
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

#[test]
fn test_drop_joins_with_empty_queue() {
    let pool = WorkerPool::new(4).unwrap();
    assert_eq!(pool.worker_count(), 4);
    drop(pool); // must not hang
}
