//! Per-variable lifecycle state.
//!
//! Assignments, decision levels and activities are stored in the respective
//! parts of the solver ([`crate::prop::assignment`], [`crate::prop::graph`],
//! [`crate::decision::vsids`]). This part tracks what inprocessing did to a
//! variable: whether it is still free, was replaced by an equivalent literal or
//! was eliminated by resolution. Replaced and eliminated variables are never
//! watched, never assigned directly and never offered as decisions; their
//! values are recovered during model reconstruction.
use xsat_formula::{Lit, Var};

/// Lifecycle state of a single variable.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VarState {
    /// Takes part in search and propagation.
    Free,
    /// Known equivalent to the stored literal.
    ///
    /// The stored literal is a representative, i.e. itself a free variable's
    /// literal, not another replaced variable.
    Replaced(Lit),
    /// Removed by bounded variable elimination.
    Eliminated,
}

impl Default for VarState {
    fn default() -> VarState {
        VarState::Free
    }
}

/// Per-variable lifecycle state.
#[derive(Default)]
pub struct Variables {
    state: Vec<VarState>,
    /// Whether the decision heuristic may branch on the variable.
    decision: Vec<bool>,
}

impl Variables {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.state.resize(count, VarState::Free);
        self.decision.resize(count, true);
    }

    /// Number of variables.
    pub fn count(&self) -> usize {
        self.state.len()
    }

    /// Increase the variable count to cover the given variable.
    pub fn ensure_var(&mut self, var: Var) {
        if var.index() >= self.state.len() {
            self.set_var_count(var.index() + 1);
        }
    }

    /// Lifecycle state of a variable.
    pub fn state(&self, var: Var) -> VarState {
        self.state[var.index()]
    }

    /// Whether a variable still takes part in search.
    pub fn is_free(&self, var: Var) -> bool {
        self.state[var.index()] == VarState::Free
    }

    /// The literal a replaced variable is equivalent to.
    pub fn replacement(&self, var: Var) -> Option<Lit> {
        match self.state[var.index()] {
            VarState::Replaced(lit) => Some(lit),
            _ => None,
        }
    }

    /// Mark a variable as replaced by an equivalent literal.
    pub fn set_replaced(&mut self, var: Var, replacement: Lit) {
        debug_assert_ne!(var, replacement.var());
        self.state[var.index()] = VarState::Replaced(replacement);
        self.decision[var.index()] = false;
    }

    /// Mark a variable as eliminated by resolution.
    pub fn set_eliminated(&mut self, var: Var) {
        debug_assert_eq!(self.state[var.index()], VarState::Free);
        self.state[var.index()] = VarState::Eliminated;
        self.decision[var.index()] = false;
    }

    /// Return an eliminated variable to the free state.
    ///
    /// Used when an assumption forces an eliminated variable back into the
    /// search, after its defining clauses were restored.
    pub fn set_free(&mut self, var: Var) {
        self.state[var.index()] = VarState::Free;
        self.decision[var.index()] = true;
    }

    /// Whether the decision heuristic may branch on the variable.
    pub fn is_decision_candidate(&self, var: Var) -> bool {
        self.decision.get(var.index()).cloned().unwrap_or(true)
    }

    /// Iterator over all variables that are currently replaced.
    pub fn replaced_vars(&self) -> impl Iterator<Item = (Var, Lit)> + '_ {
        self.state
            .iter()
            .enumerate()
            .filter_map(|(index, state)| match state {
                VarState::Replaced(lit) => Some((Var::from_index(index), *lit)),
                _ => None,
            })
    }
}
