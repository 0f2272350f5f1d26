//! Task executor for removal notifications and refresh reloads.
//!
//! User callbacks never run while internal locks are held; they are handed
//! to an [`Executor`] after the triggering operation has finished its
//! bookkeeping.  The default executor runs tasks on the triggering thread,
//! which keeps single-threaded usage deterministic.  Callers that want
//! notifications and reloads fully off their hot path can pick
//! [`Executor::thread_per_task`] or supply their own dispatcher (e.g. a
//! thread-pool handle) via [`Executor::custom`].

use std::sync::Arc;

/// A unit of deferred work: a removal notification or a refresh reload.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone)]
enum Kind {
    CallerRuns,
    ThreadPerTask,
    Custom(Arc<dyn Fn(Task) + Send + Sync>),
}

/// Dispatches deferred cache work.
///
/// # Example
/// ```
/// use cortado::exec::Executor;
///
/// // Collect dispatched tasks on a rayon-style pool of your own:
/// let exec = Executor::custom(|task| {
///     std::thread::spawn(task);
/// });
/// let _ = exec;
/// ```
#[derive(Clone)]
pub struct Executor {
    kind: Kind,
}

impl Executor {
    /// Runs each task immediately on the thread that submitted it.
    ///
    /// This is the default.  Tasks run after the cache has released its
    /// internal locks, so re-entrancy is safe but the submitting operation
    /// pays the callback's cost.
    pub fn caller_runs() -> Self {
        Executor {
            kind: Kind::CallerRuns,
        }
    }

    /// Spawns a detached thread per task.
    pub fn thread_per_task() -> Self {
        Executor {
            kind: Kind::ThreadPerTask,
        }
    }

    /// Dispatches tasks through `f`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Task) + Send + Sync + 'static,
    {
        Executor {
            kind: Kind::Custom(Arc::new(f)),
        }
    }

    pub(crate) fn execute(&self, task: Task) {
        match &self.kind {
            Kind::CallerRuns => task(),
            Kind::ThreadPerTask => {
                std::thread::spawn(task);
            }
            Kind::Custom(f) => f(task),
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::caller_runs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn caller_runs_executes_inline() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        Executor::caller_runs().execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_executor_receives_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let exec = Executor::custom(move |task| {
            c.fetch_add(1, Ordering::SeqCst);
            task();
        });
        exec.execute(Box::new(|| {}));
        exec.execute(Box::new(|| {}));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
