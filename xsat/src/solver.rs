//! Boolean satisfiability solver.
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use partial_ref::{IntoPartialRef, IntoPartialRefMut, PartialRef};

use anyhow::Error;
use log::info;

use crate::config::SolverConfigUpdate;
use crate::context::{config_changed, ensure_var_count, Context};
use crate::context::parts::*;
use crate::dimacs::DimacsParser;
use crate::incremental::set_assumptions;
use crate::load::{load_clause, load_xor_clause};
use crate::model::reconstruct_model;
use crate::proof::ProofError;
use crate::schedule::schedule_step;
use crate::state::SatState;
use xsat_checker::ProofProcessor;
use xsat_formula::{CnfFormula, ExtendFormula, Lit, Var};

pub use crate::proof::ProofFormat;

/// Errors a solve call can report.
///
/// An unsatisfiable formula is not an error, it is reported through the result value.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("solving was interrupted")]
    Interrupted,
    #[error("conflict limit reached")]
    ConflictLimitReached,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Proof(#[from] ProofError),
}

/// Shared handle to interrupt a running solve call.
///
/// Solving is single threaded, but the handle can be moved to another thread or a signal handler
/// to cancel a running solve cooperatively.
#[derive(Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Request cancellation of the running solve call.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// A boolean satisfiability solver with native XOR constraint support.
#[derive(Default)]
pub struct Solver<'a> {
    ctx: Box<Context<'a>>,
}

impl<'a> Solver<'a> {
    /// Create a new solver.
    pub fn new() -> Solver<'a> {
        Solver::default()
    }

    /// Change the solver configuration.
    pub fn config(&mut self, update: &SolverConfigUpdate) -> Result<(), SolverError> {
        if let Some(num_threads) = update.num_threads {
            if num_threads != 1 {
                return Err(SolverError::InvalidConfig(
                    "num_threads is reserved and must be 1".to_owned(),
                ));
            }
        }
        for &(name, decay) in &[
            ("vsids_decay", update.vsids_decay),
            ("clause_activity_decay", update.clause_activity_decay),
        ] {
            if let Some(decay) = decay {
                if !(decay < 1.0 && decay > 1.0 / 16.0) {
                    return Err(SolverError::InvalidConfig(format!(
                        "{} must be within (1/16, 1)",
                        name
                    )));
                }
            }
        }

        let mut ctx = self.ctx.into_partial_ref_mut();
        update.apply_to(ctx.part_mut(SolverConfigP));
        config_changed(ctx.borrow(), update);
        Ok(())
    }

    /// Allocate a new variable.
    pub fn new_var(&mut self) -> Var {
        let var = Var::from_index(self.ctx.variables.count());
        self.ensure_var_count(var.index() + 1);
        var
    }

    /// Allocate a batch of new variables, returning the first one.
    pub fn new_vars(&mut self, count: usize) -> Var {
        let first = Var::from_index(self.ctx.variables.count());
        self.ensure_var_count(first.index() + count);
        first
    }

    /// Grow all variable indexed structures and declare the new variables in the proof.
    fn ensure_var_count(&mut self, count: usize) {
        let mut ctx = self.ctx.into_partial_ref_mut();
        ensure_var_count(ctx.borrow(), count);
        ctx.part_mut(ProofP).ensure_vars_named(count);
    }

    /// Add a clause to the solver.
    pub fn add_clause(&mut self, clause: &[Lit]) {
        let required = clause
            .iter()
            .map(|lit| lit.index() + 1)
            .max()
            .unwrap_or(0);
        if required > self.ctx.variables.count() {
            self.ensure_var_count(required);
        }

        let mut ctx = self.ctx.into_partial_ref_mut();
        load_clause(ctx.borrow(), clause);
    }

    /// Add an XOR constraint over the given variables to the solver.
    ///
    /// The values of the variables have to sum to `rhs` over GF(2).
    pub fn add_xor_clause(&mut self, vars: &[Var], rhs: bool) {
        let lits: Vec<Lit> = vars.iter().map(|&var| var.positive()).collect();
        self.add_xor_clause_lits(&lits, rhs);
    }

    /// Add an XOR constraint given as literals.
    ///
    /// Each negated literal flips the required parity. This matches the `x` prefixed lines of the
    /// extended DIMACS format.
    pub fn add_xor_clause_lits(&mut self, lits: &[Lit], rhs: bool) {
        let required = lits.iter().map(|lit| lit.index() + 1).max().unwrap_or(0);
        if required > self.ctx.variables.count() {
            self.ensure_var_count(required);
        }

        let mut ctx = self.ctx.into_partial_ref_mut();
        load_xor_clause(ctx.borrow(), lits, rhs);
    }

    /// Add a formula to the solver.
    pub fn add_formula(&mut self, formula: &CnfFormula) {
        if formula.var_count() > self.ctx.variables.count() {
            self.ensure_var_count(formula.var_count());
        }
        for clause in formula.iter() {
            self.add_clause(clause);
        }
    }

    /// Reads and adds a formula in DIMACS CNF format, including `x` prefixed XOR clause lines.
    ///
    /// Using this avoids creating a temporary [`CnfFormula`].
    pub fn add_dimacs_cnf(&mut self, input: impl io::Read) -> Result<(), Error> {
        let parser = DimacsParser::parse_incremental(input, |parser| {
            self.add_formula(&parser.take_formula());
            for xor_lits in parser.take_xor_clauses() {
                self.add_xor_clause_lits(&xor_lits, true);
            }
            Ok(())
        })?;

        info!(
            "Parsed formula with {} variables and {} clauses",
            parser.var_count(),
            parser.clause_count()
        );

        Ok(())
    }

    /// Set the assumptions for the following solve calls.
    ///
    /// Assumptions are cleared by passing an empty slice.
    pub fn assume(&mut self, assumptions: &[Lit]) {
        let required = assumptions
            .iter()
            .map(|lit| lit.index() + 1)
            .max()
            .unwrap_or(0);
        if required > self.ctx.variables.count() {
            self.ensure_var_count(required);
        }

        let mut ctx = self.ctx.into_partial_ref_mut();
        set_assumptions(ctx.borrow(), assumptions);
    }

    /// Check the satisfiability of the current formula under the current assumptions.
    pub fn solve(&mut self) -> Result<bool, SolverError> {
        let mut ctx = self.ctx.into_partial_ref_mut();

        ctx.part_mut(SolverStateP).solve_started = true;

        while schedule_step(ctx.borrow()) {}

        ctx.part_mut(ProofP).solve_finished();

        let result = match ctx.part(SolverStateP).sat_state {
            SatState::Unknown => {
                if ctx.part(SolverStateP).interrupt_requested() {
                    // Cancellation is per call and does not persist.
                    ctx.part(SolverStateP).clear_interrupt();
                    Err(SolverError::Interrupted)
                } else {
                    Err(SolverError::ConflictLimitReached)
                }
            }
            SatState::Sat => {
                reconstruct_model(ctx.borrow());
                Ok(true)
            }
            SatState::Unsat => {
                // Unconditional unsatisfiability is sticky, no further proof steps can follow.
                ctx.part_mut(ProofP).emit_end();
                Ok(false)
            }
            SatState::UnsatUnderAssumptions => Ok(false),
        };

        ctx.part_mut(ProofP).take_error()?;

        result
    }

    /// Set of literals that satisfy the formula.
    pub fn model(&self) -> Option<Vec<Lit>> {
        let ctx = self.ctx.into_partial_ref();
        if ctx.part(SolverStateP).sat_state == SatState::Sat {
            Some(
                ctx.part(ModelP)
                    .assignment()
                    .iter()
                    .enumerate()
                    .flat_map(|(index, assignment)| {
                        assignment.map(|value| Var::from_index(index).lit(value))
                    })
                    .collect(),
            )
        } else {
            None
        }
    }

    /// Subset of the assumptions that made the formula unsatisfiable.
    ///
    /// Only valid directly after a solve call that returned `false` under assumptions.
    pub fn failed_core(&self) -> Option<&[Lit]> {
        match self.ctx.solver_state.sat_state {
            SatState::UnsatUnderAssumptions => Some(self.ctx.incremental.failed_core()),
            _ => None,
        }
    }

    /// Set the phase used when branching on a variable in the `user` polarity mode.
    pub fn set_phase(&mut self, var: Var, phase: bool) {
        self.ensure_var_count(var.index() + 1);
        self.ctx.assignment.set_user_phase(var, phase);
    }

    /// Handle to interrupt a solve call running on this solver.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flag: self.ctx.solver_state.interrupt_flag().clone(),
        }
    }

    /// Write all future proof steps to the given target.
    ///
    /// This has to be called before adding any clauses and cannot be undone.
    pub fn write_proof(&mut self, target: impl Write + 'a, format: ProofFormat) {
        self.ctx.proof.write_proof(target, format);
        let count = self.ctx.variables.count();
        self.ctx.proof.ensure_vars_named(count);
    }

    /// Stop writing proof steps.
    pub fn close_proof(&mut self) -> Result<(), SolverError> {
        self.ctx.proof.close_proof()?;
        Ok(())
    }

    /// Enable checking of the proof steps as they are generated.
    ///
    /// This has to be called before adding any clauses and cannot be undone.
    pub fn enable_self_checking(&mut self) {
        self.ctx.proof.begin_checking();
        let count = self.ctx.variables.count();
        self.ctx.proof.ensure_vars_named(count);
    }

    /// Add a [`ProofProcessor`] that observes all checked proof steps.
    ///
    /// This implies self checking, see [`enable_self_checking`](Solver::enable_self_checking).
    pub fn add_proof_processor(&mut self, processor: &'a mut dyn ProofProcessor) {
        self.ctx.proof.add_processor(processor);
        let count = self.ctx.variables.count();
        self.ctx.proof.ensure_vars_named(count);
    }
}

impl<'a> ExtendFormula for Solver<'a> {
    fn add_clause(&mut self, literals: &[Lit]) {
        Solver::add_clause(self, literals);
    }

    fn new_var(&mut self) -> Var {
        Solver::new_var(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use xsat_formula::{lits, vars};

    use crate::dimacs::write_dimacs;

    use xsat_formula::test::{sat_formula, sgen_unsat_formula};

    fn check_model_satisfies(model: &[Lit], formula: &CnfFormula) -> bool {
        formula
            .iter()
            .all(|clause| clause.iter().any(|lit| model.contains(lit)))
    }

    #[test]
    fn unit_chain_sat() {
        let mut solver = Solver::new();

        solver.add_clause(&lits![1]);
        solver.add_clause(&lits![-1, 2]);
        solver.add_clause(&lits![-2, 3]);

        assert_eq!(solver.solve().ok(), Some(true));

        let model = solver.model().unwrap();
        for lit in lits![1, 2, 3].iter() {
            assert!(model.contains(lit));
        }
    }

    #[test]
    fn binary_contradiction_unsat() {
        let mut solver = Solver::new();

        solver.add_clause(&lits![1]);
        solver.add_clause(&lits![-1]);

        assert_eq!(solver.solve().ok(), Some(false));
    }

    #[test]
    fn pigeon_hole_3_in_2_unsat() {
        let mut solver = Solver::new();

        // Three pigeons in two holes: at-least-one hole per pigeon, at-most-one pigeon per hole.
        solver.add_clause(&lits![1, 2]);
        solver.add_clause(&lits![3, 4]);
        solver.add_clause(&lits![5, 6]);
        solver.add_clause(&lits![-1, -3]);
        solver.add_clause(&lits![-1, -5]);
        solver.add_clause(&lits![-3, -5]);
        solver.add_clause(&lits![-2, -4]);
        solver.add_clause(&lits![-2, -6]);
        solver.add_clause(&lits![-4, -6]);

        assert_eq!(solver.solve().ok(), Some(false));
    }

    #[test]
    fn xor_equivalence_chain() {
        // 1 + 2 = 1 and 2 + 3 = 0 give 1 = -2 and 2 = 3, hence 1 = -3.
        let mut solver = Solver::new();

        solver.add_xor_clause(&vars![1, 2], true);
        solver.add_xor_clause(&vars![2, 3], false);
        solver.add_clause(&lits![1, 3]);

        assert_eq!(solver.solve().ok(), Some(true));

        let model = solver.model().unwrap();
        // 1 = -2, 2 = 3, so 1 = -3: exactly one of 1 and 3 is true.
        assert!(model.contains(&lits![1][0]) ^ model.contains(&lits![3][0]));
        assert!(model.contains(&lits![1][0]) ^ model.contains(&lits![2][0]));

        // Forcing 1 and 3 to equal values now contradicts 1 = -3.
        let mut solver = Solver::new();
        solver.add_xor_clause(&vars![1, 2], true);
        solver.add_xor_clause(&vars![2, 3], false);
        solver.add_xor_clause(&vars![1, 3], false);

        assert_eq!(solver.solve().ok(), Some(false));
    }

    #[test]
    fn xor_clause_sat_matches_parity() {
        let mut solver = Solver::new();

        solver.add_xor_clause(&vars![1, 2, 3], true);
        solver.add_xor_clause(&vars![2, 3, 4], false);
        solver.add_clause(&lits![1, 4]);

        assert_eq!(solver.solve().ok(), Some(true));

        let model = solver.model().unwrap();
        let value = |var: isize| model.contains(&Lit::from_dimacs(var));

        assert_eq!(value(1) ^ value(2) ^ value(3), true);
        assert_eq!(value(2) ^ value(3) ^ value(4), false);
        assert!(value(1) || value(4));
    }

    #[test]
    fn elimination_preserves_model() {
        let mut solver = Solver::new();

        solver.add_clause(&lits![1, 2]);
        solver.add_clause(&lits![1, -2]);
        solver.add_clause(&lits![-1, 3]);

        assert_eq!(solver.solve().ok(), Some(true));

        let model = solver.model().unwrap();
        assert!(model.contains(&lits![1][0]));
        assert!(model.contains(&lits![3][0]));
    }

    #[test]
    fn interrupt_returns_unknown() {
        let mut solver = Solver::new();

        solver.add_clause(&lits![1, 2]);

        let handle = solver.interrupt_handle();
        handle.interrupt();

        match solver.solve() {
            Err(SolverError::Interrupted) => (),
            other => panic!("expected interrupt, got {:?}", other.map(|_| ())),
        }

        // The interrupt does not persist into the next call.
        assert_eq!(solver.solve().ok(), Some(true));
    }

    #[test]
    fn conflict_limit_returns_unknown() {
        let mut solver = Solver::new();

        let mut config = SolverConfigUpdate::new();
        config.confl_limit = Some(1);
        solver.config(&config).unwrap();

        let formula = xsat_formula::cnf_formula![
            1, 2, 3;
            -1, -2, 3;
            1, -2, -3;
            -1, 2, -3;
            2, 3, -4;
            -2, -3, -4;
            1, 3, 4;
            -1, -3, 4;
        ];
        solver.add_formula(&formula);

        match solver.solve() {
            Err(SolverError::ConflictLimitReached) | Ok(_) => (),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn num_threads_must_be_one() {
        let mut solver = Solver::new();

        let mut config = SolverConfigUpdate::new();
        config.num_threads = Some(2);

        assert!(solver.config(&config).is_err());
    }

    proptest! {
        #[test]
        fn sgen_unsat(formula in sgen_unsat_formula(1..7usize)) {
            let mut solver = Solver::new();

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve().ok(), Some(false));
        }

        #[test]
        fn sat(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut solver = Solver::new();

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve().ok(), Some(true));

            let model = solver.model().unwrap();

            prop_assert!(check_model_satisfies(&model, &formula));
        }

        #[test]
        fn sat_via_dimacs(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut solver = Solver::new();

            let mut dimacs = vec![];

            write_dimacs(&mut dimacs, &formula).unwrap();

            solver.add_dimacs_cnf(&mut &dimacs[..]).unwrap();

            prop_assert_eq!(solver.solve().ok(), Some(true));

            let model = solver.model().unwrap();

            prop_assert!(check_model_satisfies(&model, &formula));
        }

        #[test]
        fn sgen_unsat_incremetal_clauses(formula in sgen_unsat_formula(1..7usize)) {
            let mut solver = Solver::new();

            let mut last_state = Some(true);

            for clause in formula.iter() {
                let single_clause = CnfFormula::from(Some(clause));
                solver.add_formula(&single_clause);

                let state = solver.solve().ok();
                if state != last_state {
                    prop_assert_eq!(state, Some(false));
                    prop_assert_eq!(last_state, Some(true));
                    last_state = state;
                }
            }

            prop_assert_eq!(last_state, Some(false));
        }

        #[test]
        fn sat_under_assumptions(formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0)) {
            let mut solver = Solver::new();

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve().ok(), Some(true));

            let model = solver.model().unwrap();
            let assumptions: Vec<_> = model.iter().take(4).cloned().collect();

            solver.assume(&assumptions);

            prop_assert_eq!(solver.solve().ok(), Some(true));

            let model = solver.model().unwrap();
            for &lit in assumptions.iter() {
                prop_assert!(model.contains(&lit));
            }

            solver.assume(&[]);
        }
    }
}
