/// Fixed-size worker pool with a blocking FIFO task queue.
///
/// Workers are long-lived OS threads that block on a channel and execute
/// zero-argument-plus-index closures in submission order. Each worker owns a
/// private min-heap, addressed by worker index; the pool does not serialize
/// access to a given heap beyond its mutex — the orchestrator keeps phase
/// discipline by indexing heap work by worker id.
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::heap::Heap;

/// A unit of work. The argument is the index of the worker executing it.
pub type Task = Box<dyn FnOnce(usize) + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    heaps: Arc<Vec<Mutex<Heap>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads, each blocking on the shared task channel.
    /// A blocking channel (wake-on-enqueue) replaces the yield-loop polling
    /// a naive pool would use on an empty queue.
    pub fn new(workers: usize) -> io::Result<WorkerPool> {
        assert!(workers > 0, "worker pool needs at least one worker");

        let (sender, receiver) = unbounded::<Task>();
        let heaps: Arc<Vec<Mutex<Heap>>> =
            Arc::new((0..workers).map(|_| Mutex::new(Heap::new())).collect());

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver: Receiver<Task> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("fextsort-worker-{index}"))
                .spawn(move || {
                    // recv() fails only once the pool drops its sender and the
                    // queue has drained; in-flight tasks always run to completion.
                    while let Ok(task) = receiver.recv() {
                        task(index);
                    }
                })?;
            handles.push(handle);
        }

        Ok(WorkerPool {
            sender: Some(sender),
            workers: handles,
            heaps,
        })
    }

    /// Enqueue a task. Tasks run FIFO on whichever worker frees up first.
    pub fn submit(&self, task: impl FnOnce(usize) + Send + 'static) {
        if let Some(sender) = &self.sender {
            // send() only fails when all receivers are gone, i.e. during teardown
            let _ = sender.send(Box::new(task));
        }
    }

    /// Worker `i`'s private heap. Task bodies lock it directly; the
    /// orchestrator guarantees at most one task per heap per phase.
    pub fn heap(&self, index: usize) -> &Mutex<Heap> {
        &self.heaps[index]
    }

    /// Shared handle to all worker heaps, for task closures.
    pub fn heaps(&self) -> Arc<Vec<Mutex<Heap>>> {
        Arc::clone(&self.heaps)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    /// Close the queue and join every worker. Already-queued tasks still run;
    /// nothing is cancelled mid-execution.
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
