//! Worker pool for long-running operations.
//!
//! One job runs per worker thread; workers are spawned on demand up to a
//! cap and kept for reuse. The submitting thread waits with an optional
//! timeout so an interactive caller can surface a still-running job to
//! the background instead of blocking on it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::error::Result;

type Task = Box<dyn FnOnce() + Send>;

/// Handle to one submitted job. Polling is idempotent: once the result
/// arrives it is retained until taken.
pub struct JobHandle<T> {
    label: String,
    rx: Receiver<Result<T>>,
    result: Option<Result<T>>,
}

impl<T> JobHandle<T> {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for completion. `None` blocks until the job finishes; a
    /// timeout returns `false` if the job is still running.
    pub fn wait(&mut self, timeout: Option<Duration>) -> bool {
        if self.result.is_some() {
            return true;
        }
        match timeout {
            None => match self.rx.recv() {
                Ok(result) => {
                    self.result = Some(result);
                    true
                }
                // The worker died without reporting; surface as done so
                // the caller can observe the missing result.
                Err(_) => true,
            },
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(result) => {
                    self.result = Some(result);
                    true
                }
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => true,
            },
        }
    }

    /// Non-blocking completion check.
    pub fn is_finished(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.result = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => true,
        }
    }

    /// The job's result, once finished. `None` while still running or if
    /// the worker died without reporting.
    pub fn take_result(&mut self) -> Option<Result<T>> {
        if self.result.is_none() {
            self.is_finished();
        }
        self.result.take()
    }
}

/// Pool of reusable worker threads.
pub struct WorkerPool {
    tasks: Sender<Task>,
    feed: Receiver<Task>,
    busy: Arc<AtomicUsize>,
    spawned: AtomicUsize,
    cap: usize,
}

impl WorkerPool {
    pub fn new(cap: usize) -> Self {
        let (tasks, feed) = unbounded();
        WorkerPool {
            tasks,
            feed,
            busy: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            cap: cap.max(1),
        }
    }

    /// Queue a job. The closure runs on a worker thread; its result
    /// travels back through the returned handle.
    pub fn submit<T, F>(&self, label: impl Into<String>, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let task: Task = Box::new(move || {
            // The receiver may be gone (job abandoned); that is fine.
            let _ = tx.send(job());
        });

        self.ensure_worker();
        self.tasks
            .send(task)
            .expect("worker feed closed while pool alive");

        JobHandle {
            label: label.into(),
            rx,
            result: None,
        }
    }

    /// Spawn another worker when every existing one is busy and the cap
    /// allows it. Races only overshoot by a bounded amount.
    fn ensure_worker(&self) {
        let spawned = self.spawned.load(Ordering::Acquire);
        if spawned > 0 && self.busy.load(Ordering::Acquire) < spawned {
            return;
        }
        if spawned >= self.cap {
            return;
        }
        self.spawned.fetch_add(1, Ordering::AcqRel);

        let feed = self.feed.clone();
        let busy = Arc::clone(&self.busy);
        thread::spawn(move || {
            while let Ok(task) = feed.recv() {
                busy.fetch_add(1, Ordering::AcqRel);
                task();
                busy.fetch_sub(1, Ordering::AcqRel);
            }
        });
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_and_wait() {
        let pool = WorkerPool::new(2);
        let mut handle = pool.submit("sum", || Ok(2 + 2));

        assert!(handle.wait(None));
        assert_eq!(handle.take_result().unwrap().unwrap(), 4);
        assert_eq!(handle.label(), "sum");
    }

    #[test]
    fn test_timeout_then_background_poll() {
        let pool = WorkerPool::new(1);
        let mut handle = pool.submit("slow", || {
            thread::sleep(Duration::from_millis(200));
            Ok(7u32)
        });

        assert!(!handle.wait(Some(Duration::from_millis(10))));
        assert!(handle.wait(None));
        assert!(handle.is_finished());
        assert_eq!(handle.take_result().unwrap().unwrap(), 7);
    }

    #[test]
    fn test_jobs_queue_beyond_cap() {
        let pool = WorkerPool::new(2);
        let mut handles: Vec<_> = (0..8)
            .map(|i| {
                pool.submit(format!("job-{i}"), move || {
                    thread::sleep(Duration::from_millis(10));
                    Ok(i)
                })
            })
            .collect();

        for (i, handle) in handles.iter_mut().enumerate() {
            assert!(handle.wait(None));
            assert_eq!(handle.take_result().unwrap().unwrap(), i);
        }
    }

    #[test]
    fn test_result_retained_until_taken() {
        let pool = WorkerPool::new(1);
        let mut handle = pool.submit("once", || Ok(1));
        assert!(handle.wait(None));
        assert!(handle.is_finished());
        assert!(handle.take_result().is_some());
        assert!(handle.take_result().is_none());
    }
}
