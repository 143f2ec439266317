//! A fixed-size worker pool for per-cluster work
//!
//! All work items are pushed into a channel up front, and the sender is
//! dropped, so workers simply pull until the channel is drained. The only
//! shared state is the receiving end of the channel and the output vector,
//! each behind a mutex that is held for a single `recv` or `push`.

use crate::{Error, Result};
use log::{debug, error};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Instant;

/// Completion percentage in `0..=100` that never decreases
#[derive(Debug, Default)]
pub struct Progress(AtomicU8);

impl Progress {
    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, percent: u8) {
        self.0.fetch_max(percent.min(100), Ordering::Relaxed);
    }
}

pub struct WorkerPool {
    threads: usize,
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".into())
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        WorkerPool {
            threads: threads.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `work` over every item. Results are returned in completion order.
    ///
    /// If `progress` is given, it is advanced from its current value towards
    /// 100 as items complete. Any failing or panicking worker aborts the whole
    /// run, and no partial results are returned.
    pub fn run<T, R, F>(&self, items: Vec<T>, progress: Option<&Progress>, work: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        let start = Instant::now();
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (tx, rx) = mpsc::channel();
        for item in items {
            tx.send(item)
                .map_err(|_| Error::WorkerFailed("work queue closed early".into()))?;
        }
        drop(tx);

        let queue = Mutex::new(rx);
        let output = Mutex::new(Vec::with_capacity(total));
        let failure: Mutex<Option<Error>> = Mutex::new(None);
        let abort = AtomicBool::new(false);
        let base = progress.map(|p| p.get()).unwrap_or(0) as usize;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| Error::WorkerFailed(e.to_string()))?;

        let fail = |err: Error| {
            abort.store(true, Ordering::Release);
            let mut slot = failure.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(err);
            }
        };

        pool.scope(|s| {
            for _ in 0..self.threads {
                let (queue, output, abort, work, fail) = (&queue, &output, &abort, &work, &fail);
                s.spawn(move |_| loop {
                    if abort.load(Ordering::Acquire) {
                        break;
                    }
                    let item = match queue.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => {
                            fail(Error::WorkerFailed("work queue poisoned".into()));
                            break;
                        }
                    };
                    // channel closed and drained
                    let Ok(item) = item else { break };

                    match catch_unwind(AssertUnwindSafe(|| work(item))) {
                        Ok(Ok(result)) => {
                            let done = {
                                let mut output = output.lock().unwrap_or_else(|e| e.into_inner());
                                output.push(result);
                                output.len()
                            };
                            if let Some(progress) = progress {
                                let percent = base + (100 - base.min(100)) * done / total;
                                progress.set(percent as u8);
                            }
                        }
                        Ok(Err(err)) => {
                            fail(err);
                            break;
                        }
                        Err(panic) => {
                            fail(Error::WorkerFailed(panic_message(panic)));
                            break;
                        }
                    }
                });
            }
        });

        if let Some(err) = failure.into_inner().unwrap_or_else(|e| e.into_inner()) {
            error!("worker pool aborted: {}", err);
            return Err(err);
        }

        let output = output.into_inner().unwrap_or_else(|e| e.into_inner());
        debug!(
            "- processed {} items on {} threads in {}ms",
            output.len(),
            self.threads,
            start.elapsed().as_millis()
        );
        Ok(output)
    }
}
