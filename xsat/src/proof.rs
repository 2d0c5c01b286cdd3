//! Proof generation.
//!
//! Proof steps use the wire format of the `xsat-internal-proof` crate. They can be written to a
//! file in the native format or as (binary) DRAT, and can simultaneously be fed into an in-process
//! [`Checker`] for on-the-fly self checking.
//!
//! The checker identifies clauses by hashes over named solver variables, so before any clause
//! step is emitted the identity naming of all allocated variables has to be declared. The solver
//! does this through [`ensure_vars_named`](Proof::ensure_vars_named) whenever the variable count
//! grows while proof generation is active.
//!
//! IO or checking failures are sticky: the first error is stored and all further steps are
//! ignored, the error surfaces when the proof is closed or the current solve call finishes.

use std::io::{self, sink, BufWriter, Write};

use partial_ref::{partial, PartialRef};

use xsat_checker::internal::SelfChecker;
use xsat_checker::{Checker, CheckerError, ProofProcessor};
use xsat_formula::{Lit, Var};

pub use xsat_internal_proof::{clause_hash, lit_hash, ClauseHash, DeleteClauseProof, ProofStep};

use xsat_internal_proof::binary_format;

use crate::context::{parts::*, Context};

mod drat;

/// Proof formats that can be generated during solving.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ProofFormat {
    Xsat,
    Drat,
    BinaryDrat,
}

/// A failure during proof generation.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    #[error("error writing to proof file: {0}")]
    Io(#[from] io::Error),
    #[error("self check failed: {0}")]
    SelfCheck(#[from] CheckerError),
    #[error("unsupported while generating proofs: {0}")]
    Unsupported(String),
}

/// Proof generation.
pub struct Proof<'a> {
    format: Option<ProofFormat>,
    target: BufWriter<Box<dyn Write + 'a>>,
    checker: Option<Checker<'a>>,
    /// Variables whose identity naming was already declared.
    named_vars: usize,
    /// Whether the end of proof marker was written.
    ended: bool,
    /// First error encountered, making all further operations no-ops.
    error: Option<ProofError>,
}

impl<'a> Default for Proof<'a> {
    fn default() -> Proof<'a> {
        Proof {
            format: None,
            target: BufWriter::new(Box::new(sink())),
            checker: None,
            named_vars: 0,
            ended: false,
            error: None,
        }
    }
}

impl<'a> Proof<'a> {
    /// Start writing proof steps to the given target with the given format.
    pub fn write_proof(&mut self, target: impl Write + 'a, format: ProofFormat) {
        self.format = Some(format);
        self.target = BufWriter::new(Box::new(target));
        // Var names have to be re-declared for the new proof target.
        self.named_vars = 0;
        self.ended = false;
    }

    /// Write the end of proof marker once.
    ///
    /// Called when the formula becomes unconditionally unsatisfiable, as no further steps can
    /// follow. The marker is required by the native proof checker.
    pub fn emit_end(&mut self) {
        if !self.ended {
            self.add_step(&ProofStep::End);
            self.ended = true;
        }
    }

    /// Stop writing proof steps, emitting the end of proof marker.
    pub fn close_proof(&mut self) -> Result<(), ProofError> {
        self.emit_end();
        let flush_result = self.target.flush();
        self.format = None;
        self.target = BufWriter::new(Box::new(sink()));
        if self.error.is_none() {
            if let Err(io_error) = flush_result {
                self.error = Some(io_error.into());
            }
        }
        self.take_error()
    }

    /// Begin on-the-fly checking of all following proof steps.
    ///
    /// Has to be enabled before the first clause is added to the solver.
    pub fn begin_checking(&mut self) {
        if self.checker.is_none() {
            self.checker = Some(Checker::new());
        }
    }

    /// Add a [`ProofProcessor`] that observes all checked proof steps.
    ///
    /// Implies on-the-fly checking.
    pub fn add_processor(&mut self, processor: &'a mut dyn ProofProcessor) {
        self.begin_checking();
        if let Some(checker) = &mut self.checker {
            checker.add_processor(processor);
        }
    }

    /// Whether proof generation is active.
    pub fn is_active(&self) -> bool {
        self.checker.is_some() || self.format.is_some()
    }

    /// Whether the emitted steps carry clause hashes.
    pub fn clause_hashes_required(&self) -> bool {
        self.checker.is_some() || self.format == Some(ProofFormat::Xsat)
    }

    /// Whether unit clauses discovered through unit propagation have to be proven.
    pub fn prove_propagated_unit_clauses(&self) -> bool {
        self.clause_hashes_required()
    }

    /// Whether found models are part of the proof.
    pub fn models_in_proof(&self) -> bool {
        self.clause_hashes_required()
    }

    /// Whether incremental steps (added clauses, assumptions) are part of the proof.
    ///
    /// DRAT cannot express them.
    pub fn incremental_steps_in_proof(&self) -> bool {
        self.clause_hashes_required()
    }

    /// Take the first error encountered since proof generation started.
    pub fn take_error(&mut self) -> Result<(), ProofError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Record that an unsupported operation was requested while proofs are generated.
    pub fn record_unsupported(&mut self, what: &str) {
        if self.error.is_none() {
            self.error = Some(ProofError::Unsupported(what.to_owned()));
        }
    }

    /// Declare the identity solver variable naming for all variables below the given count.
    ///
    /// The checker computes clause hashes over named solver variables, so this has to run before
    /// a clause over new variables is part of any step.
    pub fn ensure_vars_named(&mut self, count: usize) {
        if !self.clause_hashes_required() {
            self.named_vars = count.max(self.named_vars);
            return;
        }
        while self.named_vars < count {
            let var = Var::from_index(self.named_vars);
            self.named_vars += 1;
            self.add_step(&ProofStep::SolverVarName {
                global: var,
                solver: Some(var),
            });
        }
    }

    /// Record an input clause for on-the-fly checking.
    pub fn add_input_clause(&mut self, clause: &[Lit]) {
        if self.error.is_some() {
            return;
        }
        if let Some(checker) = &mut self.checker {
            if let Err(error) = checker.add_clause(clause) {
                self.error = Some(error.into());
            }
        }
    }

    /// Add a step to the proof.
    ///
    /// Ignored when proof generation is disabled or a previous step failed.
    pub fn add_step<'s>(&mut self, step: &'s ProofStep<'s>) {
        if self.error.is_some() {
            return;
        }

        let io_result = match self.format {
            None => Ok(()),
            Some(ProofFormat::Xsat) => binary_format::write_step(&mut self.target, step),
            Some(ProofFormat::Drat) => drat::write_step(&mut self.target, step),
            Some(ProofFormat::BinaryDrat) => drat::write_binary_step(&mut self.target, step),
        };

        if let Err(io_error) = io_result {
            self.error = Some(io_error.into());
            return;
        }

        if let Some(checker) = &mut self.checker {
            if let Err(check_error) = checker.self_check_step(*step) {
                self.error = Some(check_error.into());
            }
        }
    }

    /// Flush delayed checking work at the end of a solve call.
    pub fn solve_finished(&mut self) {
        if self.error.is_some() {
            return;
        }
        if let Some(checker) = &mut self.checker {
            if let Err(check_error) = checker.self_check_delayed_steps() {
                self.error = Some(check_error.into());
            }
        }
    }
}

/// Add a step to the proof.
///
/// See [`Proof::add_step`]; this form is convenient inside `partial_ref` heavy code.
pub fn add_step<'a, 's>(
    mut ctx: partial!(Context<'a>, mut ProofP<'a>),
    step: &'s ProofStep<'s>,
) {
    ctx.part_mut(ProofP).add_step(step);
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use std::fs::File;
    use std::process::Command;

    use tempfile::TempDir;

    use crate::dimacs::write_dimacs;
    use crate::solver::Solver;
    use crate::test::io::RcWriteBuffer;

    use xsat_formula::test::sgen_unsat_formula;
    use xsat_formula::Lit;

    #[test]
    fn drat_output_is_textual() {
        let buffer = RcWriteBuffer::default();

        let mut solver = Solver::new();
        solver.write_proof(buffer.clone(), ProofFormat::Drat);

        for &clause in &[[1, 2], [1, -2], [-1, 2], [-1, -2]] {
            let lits: Vec<Lit> = clause.iter().map(|&lit| Lit::from_dimacs(lit)).collect();
            solver.add_clause(&lits);
        }

        assert_eq!(solver.solve().ok(), Some(false));
        solver.close_proof().unwrap();

        let proof = buffer.take();
        assert!(!proof.is_empty());
        // Textual DRAT: ascii lines of literals terminated by zeros.
        let text = std::str::from_utf8(&proof).unwrap();
        for line in text.lines() {
            assert!(line.ends_with('0'));
        }
    }

    proptest! {

        #[cfg_attr(not(test_drat_trim), ignore)]
        #[test]
        fn sgen_unsat_drat(
            formula in sgen_unsat_formula(1..7usize),
        ) {
            let mut solver = Solver::new();

            let tmp = TempDir::new()?;

            let drat_proof = tmp.path().join("proof.drat");
            let cnf_file = tmp.path().join("input.cnf");

            write_dimacs(&mut File::create(&cnf_file)?, &formula)?;

            solver.write_proof(File::create(&drat_proof)?, ProofFormat::Drat);

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve().ok(), Some(false));

            solver.close_proof()?;

            let output = Command::new("drat-trim")
                .arg(&cnf_file)
                .arg(&drat_proof)
                .output()?;

            prop_assert!(std::str::from_utf8(&output.stdout)?.contains("s VERIFIED"));
        }

        #[cfg_attr(not(test_drat_trim), ignore)]
        #[test]
        fn sgen_unsat_binary_drat(
            formula in sgen_unsat_formula(1..7usize),
        ) {
            let mut solver = Solver::new();

            let tmp = TempDir::new()?;

            let drat_proof = tmp.path().join("proof.bdrat");
            let cnf_file = tmp.path().join("input.cnf");

            write_dimacs(&mut File::create(&cnf_file)?, &formula)?;

            solver.write_proof(File::create(&drat_proof)?, ProofFormat::BinaryDrat);

            solver.add_formula(&formula);

            prop_assert_eq!(solver.solve().ok(), Some(false));

            solver.close_proof()?;

            let output = Command::new("drat-trim")
                .arg(&cnf_file)
                .arg(&drat_proof)
                .arg("-i")
                .output()?;

            prop_assert!(std::str::from_utf8(&output.stdout)?.contains("s VERIFIED"));
        }
    }
}
