//! Named worker pools with priority ordering.
//!
//! Tasks run in [`Priority`] order, most urgent first, and in submission
//! order within one priority. A fixed pool keeps its threads for its whole
//! life; an unlimited pool starts a thread whenever no worker is idle and lets
//! idle workers exit after a keep-alive.

use crate::config::ExecutorConfig;
use crate::errors::EngineError;
use parking_lot::{Condvar, Mutex};
use pictor_common::Priority;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Task function type
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    priority: Priority,
    sequence: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: the most urgent priority, then the oldest task, is greatest.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
struct Queue {
    tasks: BinaryHeap<QueuedTask>,
    next_sequence: u64,
    idle: usize,
    threads: usize,
    shutdown: bool,
}

struct Inner {
    name: String,
    keep_alive: Option<Duration>,
    queue: Mutex<Queue>,
    available: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// A named pool of worker threads.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// A pool with exactly `threads` workers.
    pub fn fixed(name: &str, threads: usize) -> Result<Self, EngineError> {
        let executor = Self::with_keep_alive(name, None);
        for _ in 0..threads {
            executor.spawn_worker()?;
        }
        Ok(executor)
    }

    /// A pool that grows on demand and shrinks after `keep_alive` of idleness.
    pub fn unlimited(name: &str, keep_alive: Duration) -> Self {
        Self::with_keep_alive(name, Some(keep_alive))
    }

    fn with_keep_alive(name: &str, keep_alive: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                keep_alive,
                queue: Mutex::new(Queue::default()),
                available: Condvar::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Name of the pool.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue `task`. Returns false if the pool has been shut down.
    pub fn execute(&self, priority: Priority, task: Task) -> bool {
        let needs_thread = {
            let mut queue = self.inner.queue.lock();
            if queue.shutdown {
                return false;
            }
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.tasks.push(QueuedTask { priority, sequence, task });
            self.inner.keep_alive.is_some() && queue.tasks.len() > queue.idle
        };
        if needs_thread {
            if let Err(e) = self.spawn_worker() {
                warn!("Failed to grow {} pool: {e}", self.inner.name);
            }
        }
        self.inner.available.notify_one();
        true
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.lock().tasks.len()
    }

    /// Number of live worker threads.
    pub fn threads(&self) -> usize {
        self.inner.queue.lock().threads
    }

    /// Drop queued tasks, stop the workers and wait for running tasks.
    pub fn shutdown(&self) {
        let dropped = {
            let mut queue = self.inner.queue.lock();
            queue.shutdown = true;
            std::mem::take(&mut queue.tasks)
        };
        if !dropped.is_empty() {
            debug!("{} pool dropped {} queued tasks", self.inner.name, dropped.len());
        }
        drop(dropped);
        self.inner.available.notify_all();
        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    fn spawn_worker(&self) -> Result<(), EngineError> {
        let mut handles = self.inner.handles.lock();
        handles.retain(|h| !h.is_finished());
        let inner = Arc::clone(&self.inner);
        self.inner.queue.lock().threads += 1;
        let spawned = thread::Builder::new()
            .name(format!("pictor-{}-{}", self.inner.name, handles.len()))
            .spawn(move || worker_loop(&inner));
        match spawned {
            Ok(handle) => {
                handles.push(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.queue.lock().threads -= 1;
                Err(e.into())
            }
        }
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if queue.shutdown {
                    queue.threads -= 1;
                    return;
                }
                if let Some(queued) = queue.tasks.pop() {
                    break queued.task;
                }
                queue.idle += 1;
                let timed_out = match inner.keep_alive {
                    Some(keep_alive) => inner.available.wait_for(&mut queue, keep_alive).timed_out(),
                    None => {
                        inner.available.wait(&mut queue);
                        false
                    }
                };
                queue.idle -= 1;
                if timed_out && queue.tasks.is_empty() && !queue.shutdown {
                    queue.threads -= 1;
                    return;
                }
            }
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            error!("Task panicked on the {} pool", inner.name);
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .field("threads", &self.threads())
            .field("queued", &self.queued())
            .finish()
    }
}

/// The engine's worker pools.
#[derive(Debug, Clone)]
pub(crate) struct Executors {
    pub disk_cache: Executor,
    pub source: Executor,
    pub source_unlimited: Executor,
    pub animation: Executor,
}

impl Executors {
    pub fn new(config: &ExecutorConfig) -> Result<Self, EngineError> {
        Ok(Self {
            disk_cache: Executor::fixed("disk-cache", config.disk_cache_threads)?,
            source: Executor::fixed("source", config.source_threads)?,
            source_unlimited: Executor::unlimited(
                "source-unlimited",
                Duration::from_millis(config.unlimited_keep_alive_ms),
            ),
            animation: Executor::fixed("animation", config.animation_threads)?,
        })
    }

    /// The pool for work that may touch the source.
    pub fn active_source(&self, use_unlimited: bool, use_animation: bool) -> &Executor {
        if use_unlimited {
            &self.source_unlimited
        } else if use_animation {
            &self.animation
        } else {
            &self.source
        }
    }

    pub fn shutdown(&self) {
        for executor in [&self.disk_cache, &self.source, &self.source_unlimited, &self.animation] {
            executor.shutdown();
        }
    }
}
