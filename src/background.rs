//! Fire-and-forget work that runs after a handler has produced its reply.
//!
//! Tasks run on `may` coroutines sized by [`RuntimeConfig::stack_size`]. A task that fails or
//! panics is logged and counted; it never changes the response that was already produced.

use crate::runtime_config::RuntimeConfig;
use may::coroutine;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Cloneable handle for scheduling background tasks. Clones share counters.
#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    counters: Arc<Counters>,
    stack_size: usize,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::with_config(&RuntimeConfig::from_env())
    }
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: &RuntimeConfig) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            stack_size: config.stack_size,
        }
    }

    /// Schedule `task` on its own coroutine.
    ///
    /// Only a failure to create the coroutine is reported to the caller.
    pub fn spawn<F>(&self, name: &str, task: F) -> std::io::Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let counters = Arc::clone(&self.counters);
        let task_name = name.to_string();
        counters.pending.fetch_add(1, Ordering::SeqCst);

        // SAFETY: `Builder::spawn` is unsafe because the coroutine must not touch
        // thread-local storage it does not own. The closure only captures owned, `Send` data
        // and reports through the shared atomic counters.
        let spawned = unsafe {
            coroutine::Builder::new()
                .name(task_name.clone())
                .stack_size(self.stack_size)
                .spawn({
                    let counters = Arc::clone(&counters);
                    move || {
                        let started = Instant::now();
                        match catch_unwind(AssertUnwindSafe(task)) {
                            Ok(Ok(())) => {
                                counters.completed.fetch_add(1, Ordering::SeqCst);
                                debug!(
                                    task = %task_name,
                                    duration_us = started.elapsed().as_micros(),
                                    "Background task complete"
                                );
                            }
                            Ok(Err(e)) => {
                                counters.failed.fetch_add(1, Ordering::SeqCst);
                                error!(task = %task_name, error = ?e, "Background task failed");
                            }
                            Err(panic) => {
                                counters.failed.fetch_add(1, Ordering::SeqCst);
                                error!(
                                    task = %task_name,
                                    panic_message = %panic_message(panic.as_ref()),
                                    "Background task panicked"
                                );
                            }
                        }
                        counters.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                })
        };

        if let Err(e) = spawned {
            counters.pending.fetch_sub(1, Ordering::SeqCst);
            counters.failed.fetch_add(1, Ordering::SeqCst);
            error!(
                task = %name,
                error = %e,
                stack_size = self.stack_size,
                "Failed to spawn background task"
            );
            return Err(e);
        }
        Ok(())
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::SeqCst)
    }

    /// Block until no task is pending or `timeout` elapses. Returns `true` when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            coroutine::sleep(Duration::from_millis(1));
        }
        true
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
