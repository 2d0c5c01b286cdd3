//! Miscellaneous solver state.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Satisfiability state.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SatState {
    Unknown,
    Sat,
    Unsat,
    UnsatUnderAssumptions,
}

impl Default for SatState {
    fn default() -> SatState {
        SatState::Unknown
    }
}

/// Miscellaneous solver state.
///
/// Anything larger or any larger group of related state variables should be moved into a separate
/// part of [`Context`](crate::context::Context).
#[derive(Default)]
pub struct SolverState {
    pub sat_state: SatState,
    /// Whether a solve call was made since the formula was last extended.
    ///
    /// Clauses added after the first solve need to be recorded in generated proofs.
    pub solve_started: bool,
    /// Glue of the most recently learned clause, driving the dynamic restart heuristic.
    pub last_learned_glue: usize,
    /// Cooperative cancellation flag.
    ///
    /// Solving is single threaded, but the flag can be set from another thread through an
    /// [`InterruptHandle`](crate::solver::InterruptHandle), so it has to be atomic. It is polled
    /// between conflicts and between inprocessing passes.
    interrupt: Arc<AtomicBool>,
    /// State of the pseudo random number generator used for random decision polarities.
    rng: u64,
}

impl SolverState {
    /// Shared handle to the cancellation flag.
    pub fn interrupt_flag(&self) -> &Arc<AtomicBool> {
        &self.interrupt
    }

    /// Whether an interrupt was requested since the flag was last cleared.
    pub fn interrupt_requested(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// Clear the cancellation flag.
    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::Relaxed);
    }

    /// Generate a pseudo random bool.
    ///
    /// This is a splitmix64 step. The sequence is deterministic so solver runs stay reproducible.
    pub fn rng_bool(&mut self) -> bool {
        self.rng = self.rng.wrapping_add(0x9e3779b97f4a7c15);
        let mut mixed = self.rng;
        mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94d049bb133111eb);
        mixed ^= mixed >> 31;
        mixed & 1 != 0
    }
}
