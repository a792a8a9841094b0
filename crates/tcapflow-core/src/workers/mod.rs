//! Fixed-size worker pool with per-task join handles.
//!
//! Every dispatched closure gets its own [`WorkHandle`]. The coordinator
//! waits on all of them with [`join_all`], which returns the first error any
//! worker produced (panics included). A failing worker cannot be mistaken
//! for a finished one.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use tcapflow_common::utils::error::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cooperative cancellation flag shared by a coordinator and its workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A pool of long-lived worker threads.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();
        let threads = (0..size)
            .map(|i| {
                let receiver: Receiver<Job> = receiver.clone();
                thread::Builder::new()
                    .name(format!("tcapflow-worker-{i}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .map_err(Error::Io)
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("worker pool started with {} threads", size);
        Ok(Self {
            sender: Some(sender),
            threads,
        })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Dispatches a work item and returns its join handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has shut down.
    pub fn execute<T, F>(&self, work: F) -> Result<WorkHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(panic) => Err(Error::WorkerPanicked(panic_message(&*panic))),
            };
            // The handle may already be gone; nobody is waiting then.
            let _ = tx.send(outcome);
        });
        self.sender
            .as_ref()
            .ok_or_else(|| Error::Internal("worker pool is shut down".to_string()))?
            .send(job)
            .map_err(|_| Error::Internal("worker pool is shut down".to_string()))?;
        Ok(WorkHandle { receiver: rx })
    }

    /// Like [`execute`](Self::execute), but cancels `token` if the work item
    /// fails, so siblings blocked on shared buffers give up too.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has shut down.
    pub fn execute_cancellable<T, F>(
        &self,
        token: &CancellationToken,
        work: F,
    ) -> Result<WorkHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let token = token.clone();
        self.execute(move || {
            let guard = CancelOnUnwind(&token);
            let result = work();
            std::mem::forget(guard);
            if let Err(e) = &result
                && !matches!(e, Error::Cancelled)
            {
                tracing::warn!("worker failed, cancelling siblings: {}", e);
                token.cancel();
            }
            result
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

struct CancelOnUnwind<'a>(&'a CancellationToken);

impl Drop for CancelOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Completion handle for one dispatched work item.
pub struct WorkHandle<T> {
    receiver: Receiver<Result<T>>,
}

impl<T> WorkHandle<T> {
    /// Blocks until the work item finishes and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the work item's error, or [`Error::WorkerPanicked`] if it
    /// panicked.
    pub fn join(self) -> Result<T> {
        self.receiver
            .recv()
            .map_err(|_| Error::WorkerPanicked("worker exited without a result".to_string()))?
    }
}

/// Waits for every handle and returns all results, or the first error.
///
/// All handles are awaited even after a failure, so no worker is still
/// running when this returns. A [`Error::Cancelled`] reported by a worker
/// that was only reacting to a sibling's failure never hides the original
/// error.
///
/// # Errors
///
/// Returns the first non-cancellation error, or `Cancelled` if that is all
/// there is.
pub fn join_all<T>(handles: Vec<WorkHandle<T>>) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(handles.len());
    let mut first_error: Option<Error> = None;
    for handle in handles {
        match handle.join() {
            Ok(value) => results.push(value),
            Err(e) => {
                let replace = match &first_error {
                    None => true,
                    Some(Error::Cancelled) => !matches!(e, Error::Cancelled),
                    Some(_) => false,
                };
                if replace {
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_join_all_collects_results() {
        let pool = WorkerPool::new(4).unwrap();
        let handles: Vec<_> = (0..8_usize)
            .map(|i| pool.execute(move || Ok(i * 2)).unwrap())
            .collect();
        let results = join_all(handles).unwrap();
        assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_join_all_returns_first_error_after_waiting() {
        let pool = WorkerPool::new(2).unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..4 {
            let finished = Arc::clone(&finished);
            handles.push(
                pool.execute(move || {
                    finished.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        Err(Error::execution("boom"))
                    } else {
                        Ok(i)
                    }
                })
                .unwrap(),
            );
        }
        let err = join_all(handles).unwrap_err();
        assert!(matches!(err, Error::Execution(ref m) if m == "boom"));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_panic_becomes_error() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .execute(|| -> Result<()> { panic!("worker exploded") })
            .unwrap();
        let err = handle.join().unwrap_err();
        assert!(matches!(err, Error::WorkerPanicked(ref m) if m.contains("exploded")));

        // The pool survives a panicking job.
        assert_eq!(pool.execute(|| Ok(7)).unwrap().join().unwrap(), 7);
    }

    #[test]
    fn test_cancellable_failure_cancels_token() {
        let pool = WorkerPool::new(2).unwrap();
        let token = CancellationToken::new();
        let handle = pool
            .execute_cancellable(&token, || -> Result<()> { Err(Error::execution("bad page")) })
            .unwrap();
        assert!(handle.join().is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancelled_does_not_mask_real_error() {
        let pool = WorkerPool::new(2).unwrap();
        let handles = vec![
            pool.execute(|| -> Result<()> { Err(Error::Cancelled) }).unwrap(),
            pool.execute(|| -> Result<()> { Err(Error::execution("root cause")) })
                .unwrap(),
        ];
        let err = join_all(handles).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
