//! Background job submission.
//!
//! Native-backend stages may offload work to one background worker; hosts may
//! also submit arbitrary work, either on the worker or pinned to the
//! orchestrating thread. Pinned jobs sit in a queue until the orchestrator
//! drains it (which [`crate::Evaluation`] does at every stage boundary), so
//! no two stages interleave background effects with the walk.

use std::collections::VecDeque;
use std::sync::{
    mpsc::{self, Sender},
    Arc, Condvar, Mutex,
};
use std::thread;

pub type JobFn = Box<dyn FnOnce() + Send + 'static>;

/// Completion status of a submitted job. Clone freely; poll or block.
#[derive(Debug, Clone)]
pub struct JobStatus {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl JobStatus {
    fn new() -> Self {
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    fn finished() -> Self {
        Self {
            state: Arc::new((Mutex::new(true), Condvar::new())),
        }
    }

    fn mark_done(&self) {
        let (lock, cvar) = &*self.state;
        if let Ok(mut done) = lock.lock() {
            *done = true;
            cvar.notify_all();
        }
    }

    pub fn is_done(&self) -> bool {
        let (lock, _) = &*self.state;
        lock.lock().map(|d| *d).unwrap_or(true)
    }

    /// Blocks until the job completed. Main-pinned jobs only complete once
    /// the orchestrator drains its lane; call [`JobSystem::drain_main`] first
    /// when waiting from the orchestrating thread.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.state;
        let mut done = match lock.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        while !*done {
            done = match cvar.wait(done) {
                Ok(g) => g,
                Err(_) => return,
            };
        }
    }
}

struct WorkerJob {
    run: JobFn,
    status: JobStatus,
}

/// One background worker plus a main-thread-pinned job lane.
pub struct JobSystem {
    tx: Sender<WorkerJob>,
    worker: Option<thread::JoinHandle<()>>,
    main_lane: Mutex<VecDeque<WorkerJob>>,
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSystem {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<WorkerJob>();
        let worker = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                (job.run)();
                job.status.mark_done();
            }
        });
        Self {
            tx,
            worker: Some(worker),
            main_lane: Mutex::new(VecDeque::new()),
        }
    }

    /// Runs `job` on the background worker. The closure owns its inputs.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> JobStatus {
        let status = JobStatus::new();
        let packed = WorkerJob {
            run: Box::new(job),
            status: status.clone(),
        };
        if self.tx.send(packed).is_err() {
            // Worker is gone (shutdown); report the job as done so nobody
            // blocks forever.
            return JobStatus::finished();
        }
        status
    }

    /// Queues `job` for the orchestrating thread; it runs on the next
    /// [`JobSystem::drain_main`].
    pub fn submit_main(&self, job: impl FnOnce() + Send + 'static) -> JobStatus {
        let status = JobStatus::new();
        let packed = WorkerJob {
            run: Box::new(job),
            status: status.clone(),
        };
        if let Ok(mut lane) = self.main_lane.lock() {
            lane.push_back(packed);
        }
        status
    }

    /// Runs every queued main-pinned job. Must be called from the thread that
    /// owns the walk.
    pub fn drain_main(&self) {
        loop {
            let job = match self.main_lane.lock() {
                Ok(mut lane) => lane.pop_front(),
                Err(_) => None,
            };
            match job {
                Some(job) => {
                    (job.run)();
                    job.status.mark_done();
                }
                None => break,
            }
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        // Close the channel so the worker's recv() ends, then join.
        let (tx, _rx) = mpsc::channel();
        drop(std::mem::replace(&mut self.tx, tx));
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn worker_job_completes() {
        let jobs = JobSystem::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let status = jobs.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        status.wait();
        assert!(status.is_done());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn main_jobs_run_only_when_drained() {
        let jobs = JobSystem::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let status = jobs.submit_main(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!status.is_done());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        jobs.drain_main();
        assert!(status.is_done());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jobs_preserve_submission_order_on_main_lane() {
        let jobs = JobSystem::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = Arc::clone(&log);
            jobs.submit_main(move || log.lock().unwrap().push(i));
        }
        jobs.drain_main();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
