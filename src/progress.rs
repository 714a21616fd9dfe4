//! Progress reporting and cancellation handed into the solvers.
//!
//! Nothing in the core writes to a global logger configuration or reads global state:
//! callers pass a [`SolverContext`] that names the reporter and, optionally, an abort
//! flag that is checked between two iterations.

use std::sync::atomic::AtomicBool;
use std::sync::RwLock;

/// Receives per-iteration progress of a running solver.
pub trait Reporter: Send + Sync {
    /// Called after every finished iteration, `completed` counts from 1.
    fn iteration(&self, solver: &str, completed: usize, total: usize);

    /// Called once when a solver or filter is done.
    fn finished(&self, solver: &str) {
        log::debug!("{solver} finished");
    }
}

/// Forwards progress to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn iteration(&self, solver: &str, completed: usize, total: usize) {
        log::debug!("{solver}: iteration {completed}/{total}");
    }
}

/// Progress lock shared with a UI thread: holds the finished fraction while a solver
/// runs and `None` otherwise.
impl Reporter for RwLock<Option<f32>> {
    fn iteration(&self, _solver: &str, completed: usize, total: usize) {
        if let Ok(mut p) = self.write() {
            *p = Some(completed as f32 / total.max(1) as f32);
        }
    }

    fn finished(&self, _solver: &str) {
        if let Ok(mut p) = self.write() {
            *p = None;
        }
    }
}

/// Everything a solver needs from its caller besides the numeric inputs.
#[derive(Clone, Copy)]
pub struct SolverContext<'a> {
    pub reporter: &'a dyn Reporter,
    pub abort_flag: Option<&'a AtomicBool>,
}

impl<'a> SolverContext<'a> {
    pub fn new(reporter: &'a dyn Reporter) -> Self {
        SolverContext {
            reporter,
            abort_flag: None,
        }
    }

    pub fn with_abort_flag(mut self, abort_flag: &'a AtomicBool) -> Self {
        self.abort_flag = Some(abort_flag);
        self
    }
}

impl Default for SolverContext<'static> {
    fn default() -> Self {
        SolverContext::new(&LogReporter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_lock_tracks_fraction_and_resets() {
        let lock: RwLock<Option<f32>> = RwLock::new(None);
        lock.iteration("test", 3, 4);
        assert_eq!(*lock.read().unwrap(), Some(0.75));
        lock.finished("test");
        assert_eq!(*lock.read().unwrap(), None);
    }

    #[test]
    fn context_carries_abort_flag() {
        let flag = AtomicBool::new(false);
        let ctx = SolverContext::default().with_abort_flag(&flag);
        assert!(ctx.abort_flag.is_some());
    }
}
