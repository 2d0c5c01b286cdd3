//! Model reconstruction.
//!
//! The search assignment only covers the free variables. A complete model additionally derives
//! the values of replaced variables from their representatives and replays the elimination log
//! backwards: every clause removed by variable elimination has to be satisfied, and the
//! eliminated variable is the only one left that can do so.

use partial_ref::{partial, PartialRef};

use xsat_formula::{Lit, Var};

use crate::context::{parts::*, Context};
use crate::proof;
use xsat_internal_proof::ProofStep;

/// Reconstructed model.
#[derive(Default)]
pub struct Model {
    /// Assignment of the model.
    ///
    /// Whenever the solver state is SAT this is up to date.
    assignment: Vec<Option<bool>>,
}

impl Model {
    /// Assignment of the model.
    ///
    /// Only valid if the solver state is SAT.
    pub fn assignment(&self) -> &[Option<bool>] {
        &self.assignment
    }

    /// Whether a literal is true in the model assignment.
    ///
    /// Only valid if the solver state is SAT.
    pub fn lit_is_true(&self, lit: Lit) -> bool {
        self.assignment[lit.index()] == Some(lit.is_positive())
    }
}

/// Rebuild the model from the search assignment.
///
/// Runs when the search found all free variables assigned without a conflict.
pub fn reconstruct_model<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut ModelP,
        mut ProofP<'a>,
        mut TmpDataP,
        AssignmentP,
        SubsumerP,
        VarReplacerP,
        VariablesP,
    ),
) {
    let (model, mut ctx) = ctx.split_part_mut(ModelP);

    let var_count = ctx.part(VariablesP).count();

    model.assignment.clear();
    model
        .assignment
        .extend((0..var_count).map(|index| ctx.part(AssignmentP).var_value(Var::from_index(index))));

    derive_replaced_values(ctx.borrow(), &mut model.assignment);

    // Replay the elimination log backwards. All neighbors of an eliminated variable were either
    // assigned by the search or eliminated later, so they already have values at this point.
    {
        let subsumer = ctx.part(SubsumerP);
        for entry in subsumer.eliminated().iter().rev() {
            let mut value = false;

            for clause in entry.clauses.iter() {
                let mut satisfied_by_others = false;
                let mut own_polarity = false;

                for &lit in clause.iter() {
                    if lit.var() == entry.var {
                        own_polarity = lit.is_positive();
                    } else if model.assignment[lit.index()] == Some(lit.is_positive()) {
                        satisfied_by_others = true;
                        break;
                    }
                }

                if !satisfied_by_others {
                    value = own_polarity;
                }
            }

            model.assignment[entry.var.index()] = Some(value);
        }
    }

    // Variables whose representative was eliminated get their value now.
    derive_replaced_values(ctx.borrow(), &mut model.assignment);

    if ctx.part(ProofP).models_in_proof() {
        let (tmp, mut ctx) = ctx.split_part_mut(TmpDataP);
        tmp.lits.clear();
        for (index, value) in model.assignment.iter().enumerate() {
            if let Some(value) = *value {
                tmp.lits.push(Var::from_index(index).lit(value));
            }
        }
        proof::add_step(ctx.borrow(), &ProofStep::Model { model: &tmp.lits });
    }
}

/// Fill in the values of replaced variables whose representative has a value.
///
/// A variable that was a representative can itself be replaced by a later commit, so the
/// dependency chains are walked to a fixed point.
fn derive_replaced_values(
    ctx: partial!(Context, VarReplacerP, VariablesP),
    assignment: &mut Vec<Option<bool>>,
) {
    let replacer = ctx.part(VarReplacerP);
    let variables = ctx.part(VariablesP);

    loop {
        let mut changed = false;

        for index in 0..variables.count() {
            let root = Var::from_index(index);
            let root_value = match assignment[root.index()] {
                Some(value) => value,
                None => continue,
            };

            for &dependent in replacer.dependents(root) {
                if assignment[dependent.index()].is_some() {
                    continue;
                }
                if let Some(replacement) = variables.replacement(dependent) {
                    assignment[dependent.index()] = Some(root_value ^ replacement.is_negative());
                    changed = true;
                }
            }
        }

        if !changed {
            break;
        }
    }
}
