use crate::LoadError;
use gantry_schema::{EvaluationContext, Manifest, ManifestSource};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Callbacks fired as a load moves through the pipeline. All methods default
/// to no-ops; implement the ones you care about.
pub trait LoadObserver: Send + Sync {
    /// A load was accepted, before cache lookup.
    fn on_will_load(&self, _source: &ManifestSource, _context: &EvaluationContext) {}
    /// The cache missed and a sandboxed evaluation is about to run.
    fn on_will_evaluate(&self, _source: &ManifestSource, _context: &EvaluationContext) {}
}

/// Handle for one submitted load. Dropping it abandons the result; the load
/// still runs to completion so its cache write happens either way.
pub struct LoadHandle {
    rx: Receiver<Result<Manifest, LoadError>>,
}

impl LoadHandle {
    pub(crate) fn new() -> (Sender<Result<Manifest, LoadError>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }

    /// Block until the load finishes.
    pub fn wait(self) -> Result<Manifest, LoadError> {
        self.rx.recv().unwrap_or(Err(LoadError::Delivery))
    }
}

/// Fixed pool of named worker threads draining a shared job queue. The pool
/// size caps how many sandboxed evaluations run at once.
pub struct LoadScheduler {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl LoadScheduler {
    pub fn new(worker_count: usize) -> std::io::Result<Self> {
        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = Arc::clone(&rx);
            let handle = std::thread::Builder::new()
                .name(format!("gantry-load-{i}"))
                .spawn(move || loop {
                    let job = match rx.lock() {
                        Ok(guard) => guard.recv(),
                        Err(_) => return,
                    };
                    match job {
                        Ok(job) => job(),
                        Err(_) => return,
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Jobs run in submission order as workers free up.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // A send error means every worker has exited, which only happens
            // during shutdown; the job is dropped with them.
            let _ = tx.send(Box::new(job));
        }
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain remaining jobs and exit.
        self.tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_on_named_workers() {
        let scheduler = LoadScheduler::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        scheduler.submit(move || {
            let name = std::thread::current().name().map(ToOwned::to_owned);
            tx.send(name).unwrap();
        });
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("gantry-load-"));
    }

    #[test]
    fn drop_drains_pending_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = LoadScheduler::new(1).unwrap();
            for _ in 0..10 {
                let counter = Arc::clone(&counter);
                scheduler.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn zero_workers_rounds_up_to_one() {
        let scheduler = LoadScheduler::new(0).unwrap();
        assert_eq!(scheduler.worker_count(), 1);
    }

    #[test]
    fn handle_reports_worker_loss() {
        let (tx, handle) = LoadHandle::new();
        drop(tx);
        assert!(matches!(handle.wait(), Err(LoadError::Delivery)));
    }
}
