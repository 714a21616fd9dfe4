//! # cancellable_loops
//!
//! A small utility crate for running fixed-budget iterative solvers that can be
//! interrupted between two iterations.
//!
//! Iterative restoration algorithms (Richardson-Lucy, FISTA, ...) run for a fixed
//! number of steps and carry their whole state from one step to the next. This crate
//! threads that state through a step function by value, checks an optional abort flag
//! before every step and reports how far the loop got.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::AtomicBool;
//! use cancellable_loops::iterate_cancellable;
//!
//! let abort_flag = AtomicBool::new(false);
//!
//! // Halve a value ten times.
//! let run = iterate_cancellable(1024.0_f64, 10, Some(&abort_flag), |_, x| x / 2.0);
//!
//! assert_eq!(run.completed, 10);
//! assert!(!run.aborted);
//! assert_eq!(run.state, 1.0);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

/// Result of an [`iterate_cancellable`] run.
///
/// `state` is the value returned by the last executed step (or the initial value
/// if no step ran).
#[derive(Debug, Clone, PartialEq)]
pub struct Iterated<S> {
    pub state: S,
    pub completed: usize,
    pub aborted: bool,
}

impl<S> Iterated<S> {
    /// Returns the state only if every requested iteration was executed.
    pub fn finished(self) -> Option<S> {
        if self.aborted { None } else { Some(self.state) }
    }
}

/// Runs `step` `iterations` times, passing the state by value from one call to the next.
///
/// The abort flag is checked before each step. Once it reads `true`, the loop stops and
/// the returned [`Iterated`] is marked as aborted. The flag is left untouched so the
/// caller decides when to clear it.
///
/// # Arguments
///
/// * `init` - The initial state
/// * `iterations` - The fixed iteration budget
/// * `abort_flag` - Optional flag that requests cancellation when set to `true`
/// * `step` - Called with the zero-based iteration index and the current state
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use cancellable_loops::iterate_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
///
/// let run = iterate_cancellable(0_u32, 100, Some(&abort_flag), |i, sum| {
///     if i == 4 {
///         abort_flag.store(true, Ordering::Relaxed);
///     }
///     sum + 1
/// });
///
/// // Steps 0..=4 ran, the check before step 5 saw the flag.
/// assert_eq!(run.completed, 5);
/// assert!(run.aborted);
/// assert_eq!(run.state, 5);
/// ```
pub fn iterate_cancellable<S, F>(
    init: S,
    iterations: usize,
    abort_flag: Option<&AtomicBool>,
    mut step: F,
) -> Iterated<S>
where
    F: FnMut(usize, S) -> S,
{
    let mut state = init;
    for i in 0..iterations {
        if abort_flag.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Iterated {
                state,
                completed: i,
                aborted: true,
            };
        }
        state = step(i, state);
    }
    Iterated {
        state,
        completed: iterations,
        aborted: false,
    }
}
