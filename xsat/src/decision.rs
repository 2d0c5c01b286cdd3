//! Decision heuristics.

pub mod vsids;

use partial_ref::{partial, PartialRef};

use crate::config::PolarityMode;
use crate::context::{
    AssignmentP, Context, ImplGraphP, SolverConfigP, SolverStateP, TrailP, VariablesP, VsidsP,
};
use crate::prop::{enqueue_assignment, Reason};
use xsat_formula::{Lit, Var};

/// Make a decision and enqueue it.
///
/// Picks the unassigned variable with the highest VSIDS activity, skipping entries that are
/// already assigned or no longer decision candidates (those are removed lazily instead of on
/// every assignment). The decision's polarity is chosen according to the configured polarity
/// mode, defaulting to the variable's last assigned value.
///
/// Returns `false` if no decision was made because all variables are assigned.
pub fn make_decision(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut VsidsP,
        SolverConfigP,
        VariablesP,
    ),
) -> bool {
    loop {
        let var = match ctx.part_mut(VsidsP).next() {
            Some(var) => var,
            None => return false,
        };

        if ctx.part(AssignmentP).var_value(var).is_some()
            || !ctx.part(VariablesP).is_decision_candidate(var)
        {
            continue;
        }

        let polarity = match ctx.part(SolverConfigP).polarity_mode {
            PolarityMode::Auto => ctx.part(AssignmentP).last_var_value(var),
            PolarityMode::Pos => true,
            PolarityMode::Neg => false,
            PolarityMode::Rnd => ctx.part_mut(SolverStateP).rng_bool(),
            PolarityMode::User => ctx.part(AssignmentP).user_phase(var),
        };
        let decision = Lit::from_var(var, polarity);

        ctx.part_mut(TrailP).new_decision_level();

        enqueue_assignment(ctx.borrow(), decision, Reason::Unit);

        return true;
    }
}

/// Remove a variable from the decision heap.
///
/// Called when a variable is replaced or eliminated and can no longer be branched on.
pub fn remove_var(mut ctx: partial!(Context, mut VsidsP), var: Var) {
    ctx.part_mut(VsidsP).remove(var);
}

/// Make a variable available for branching again.
///
/// Called whenever a variable becomes unassigned, e.g. during backtracking. Variables that are no
/// longer decision candidates are kept out of the heap.
pub fn make_available(mut ctx: partial!(Context, mut VsidsP, VariablesP), var: Var) {
    if ctx.part(VariablesP).is_decision_candidate(var) {
        ctx.part_mut(VsidsP).make_available(var);
    }
}
