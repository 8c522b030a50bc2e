//! Shared worker pool and deferred results.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool executing queued jobs in submission order per worker.
pub(crate) struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads)
            .map(|index| {
                let receiver: Receiver<Job> = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("livestore-worker-{index}"))
                    .spawn(move || {
                        for job in receiver {
                            job();
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnect the queue so workers drain remaining jobs and exit.
        self.sender.take();
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            // A job can hold the last handle to the pool's owner, in
            // which case this drop runs on a worker thread. That thread
            // exits on its own right after; joining it would deadlock.
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
    }
}

/// A result that will be produced exactly once by a pool job.
///
/// Consuming it blocks only the caller; the producing job never waits.
pub struct Deferred<T> {
    receiver: Receiver<T>,
}

impl<T> Deferred<T> {
    /// Block until the result is available.
    pub fn wait(self) -> T {
        self.receiver
            .recv()
            .expect("deferred job dropped without resolving")
    }

    /// The result, if it is already available.
    pub fn try_wait(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block up to `timeout` for the result.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

pub(crate) struct Resolver<T> {
    sender: Sender<T>,
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(self, value: T) {
        let _ = self.sender.send(value);
    }
}

/// A single-resolution pair: the job side resolves, the caller side waits.
pub(crate) fn deferred<T>() -> (Resolver<T>, Deferred<T>) {
    let (sender, receiver) = bounded(1);
    (Resolver { sender }, Deferred { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run_and_resolve() {
        let pool = WorkerPool::new(2);
        let (resolver, result) = deferred();
        pool.execute(move || resolver.resolve(21 * 2));
        assert_eq!(result.wait(), 42);
    }

    #[test]
    fn test_drop_joins_pending_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(1);
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_try_wait_before_resolution() {
        let (resolver, result) = deferred();
        assert!(result.try_wait().is_none());
        resolver.resolve("done");
        assert_eq!(result.wait_timeout(Duration::from_secs(1)), Some("done"));
    }
}
