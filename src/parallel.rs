//! Fan-out of a work list over a fixed pool of worker threads.
//!
//! The input is split into contiguous, order-preserving ranges, one per
//! worker. Every worker owns one [`Task`] instance and a private output vector;
//! outputs are concatenated in worker order once all workers have joined.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use console::Term;

use crate::error::EngineError;

const PROGRESS_REFRESH: Duration = Duration::from_millis(100);

/// Items processed so far in one phase, shared by all its workers.
#[derive(Debug, Default)]
pub struct ProgressCounter(AtomicUsize);

impl ProgressCounter {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// A unit of per-worker work over one contiguous slice of the input.
///
/// Implementations append only to `storage` and call
/// [`ProgressCounter::increment`] exactly once per consumed item, whether or
/// not it produced output.
pub trait Task: Send {
    type Item: Sync;
    type Output: Send;

    fn run(&mut self, items: &[Self::Item], storage: &mut Vec<Self::Output>, counter: &ProgressCounter);
}

/// Splits `len` items into at most `workers` contiguous ranges whose sizes
/// differ by at most one.
pub fn partition(len: usize, workers: usize) -> Vec<Range<usize>> {
    let parts = workers.max(1).min(len);
    if parts == 0 {
        return vec![];
    }
    let base = len / parts;
    let extra = len % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

#[derive(Debug)]
pub struct PhaseResult<O> {
    pub output: Vec<O>,
    pub processed: usize,
    pub elapsed: Duration,
}

pub struct TaskExecutor<'a, T: Task> {
    name: String,
    items: &'a [T::Item],
    tasks: Vec<T>,
    show_progress: bool,
}

impl<'a, T: Task> TaskExecutor<'a, T> {
    /// One task instance per worker; `tasks.len()` is the worker count.
    pub fn new(name: &str, items: &'a [T::Item], tasks: Vec<T>) -> Self {
        Self {
            name: name.to_string(),
            items,
            tasks,
            show_progress: false,
        }
    }

    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn execute(self) -> Result<PhaseResult<T::Output>, EngineError> {
        let started = Instant::now();
        let counter = ProgressCounter::new();
        let total = self.items.len();
        let ranges = partition(total, self.tasks.len());
        tracing::info!(phase = %self.name, items = total, workers = ranges.len(), "starting phase");

        let term = Term::stderr();
        let show = self.show_progress && term.is_term();
        let name = self.name.as_str();
        let items = self.items;

        let joined = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(ranges.len());
            for (worker, (range, mut task)) in ranges.iter().cloned().zip(self.tasks).enumerate() {
                let counter = &counter;
                let spawned = thread::Builder::new()
                    .name(format!("irmut-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        let mut storage = Vec::new();
                        task.run(&items[range], &mut storage, counter);
                        storage
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        tracing::error!(phase = name, worker, "failed to spawn worker: {e}");
                        return Err(EngineError::WorkerPanicked {
                            phase: name.to_string(),
                            worker,
                        });
                    }
                }
            }

            while show && !handles.iter().all(|h| h.is_finished()) {
                let _ = term.clear_line();
                let _ = term.write_str(&format!("[{}/{}] {}", counter.get(), total, name));
                thread::sleep(PROGRESS_REFRESH);
            }
            if show {
                let _ = term.clear_line();
            }

            // Join everything before reporting, so no panicked worker is left
            // for the scope to re-raise.
            let mut outputs = Vec::with_capacity(handles.len());
            let mut failed = None;
            for (worker, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(storage) => outputs.push(storage),
                    Err(_) => {
                        failed.get_or_insert(worker);
                    }
                }
            }
            match failed {
                Some(worker) => Err(EngineError::WorkerPanicked {
                    phase: name.to_string(),
                    worker,
                }),
                None => Ok(outputs),
            }
        })?;

        let output: Vec<T::Output> = joined.into_iter().flatten().collect();
        let processed = counter.get();
        let elapsed = started.elapsed();
        tracing::info!(
            phase = %self.name,
            processed,
            produced = output.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "phase finished"
        );
        Ok(PhaseResult {
            output,
            processed,
            elapsed,
        })
    }
}
