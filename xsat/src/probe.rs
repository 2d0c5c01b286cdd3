//! Failed literal probing with hyper binary resolution.
//!
//! At decision level 0 a trial decision is made for both polarities of a candidate variable and
//! propagated. A polarity whose propagation conflicts is a failed literal: its negation holds
//! unconditionally and is enqueued at level 0. When both trials succeed, their propagation sets
//! are compared: a literal propagated by both polarities holds unconditionally, and a variable
//! propagated to opposite values by the two trials is equivalent (up to sign) to the probed
//! variable and is handed to the variable replacer. XOR clauses that shrink to the same two
//! unassigned variables under both trials yield an unconditional two variable XOR, which is
//! likewise an equivalence.
//!
//! Hyper binary resolution compares the full propagation set of a trial against the set reachable
//! through binary clauses alone. Every literal reachable only through longer clauses gets a new
//! binary clause connecting it to the probe, which shortens future implication chains without
//! changing the formula's semantics.
//!
//! The pass is budgeted in bogoprops. The budget is scaled by an adaptive multiplier that grows
//! when the previous pass fixed a noticeable fraction of the free variables and shrinks
//! otherwise. Hyper binary resolution is disabled for a pass when it dominated the previous
//! pass's cost.

use partial_ref::{partial, PartialRef};

use xsat_formula::{Lit, Var};

use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, Context, ImplGraphP, ProbeP, SolverConfigP,
    SolverStateP, TrailP, VarReplacerP, VariablesP, VsidsP, WatchlistsP, XorClausesP,
};
use crate::prop::{backtrack, enqueue_assignment, propagate, Reason};
use crate::prop::binary::propagate_binary;
use crate::state::SatState;
use crate::var_replacer;

/// An XOR clause reduced to two unassigned variables under a trial assignment.
///
/// `vars` is sorted; `rhs` is the parity the two variables have to sum to after substituting the
/// assigned variables.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct TwoLongXor {
    vars: [Var; 2],
    rhs: bool,
}

/// Failed literal probing state.
#[derive(Default)]
pub struct Probe {
    /// Literal set of the first trial.
    seen: Vec<bool>,
    /// Literals to clear in `seen`.
    seen_lits: Vec<Lit>,
    /// Round robin position over the variables, so successive passes probe different variables.
    cursor: usize,
    /// Adaptive scaling of the bogoprop budget.
    budget_multiplier: f64,
    /// Whether hyper binary resolution dominated the previous pass's cost.
    hyper_bin_overloaded: bool,
}

impl Probe {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.seen.resize(count * 2, false);
    }

    fn mark(&mut self, lit: Lit) {
        if !self.seen[lit.code()] {
            self.seen[lit.code()] = true;
            self.seen_lits.push(lit);
        }
    }

    fn clear_marks(&mut self) {
        for lit in self.seen_lits.drain(..) {
            self.seen[lit.code()] = false;
        }
    }
}

/// Outcome of propagating a single trial decision.
enum Trial {
    Failed,
    Propagated {
        lits: Vec<Lit>,
        two_long_xors: Vec<TwoLongXor>,
    },
}

/// Run one probing pass over the free variables.
///
/// Requires decision level 0 with all assignments propagated.
pub fn run(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ImplGraphP,
        mut ProbeP,
        mut SolverStateP,
        mut TrailP,
        mut VarReplacerP,
        mut VsidsP,
        mut WatchlistsP,
        mut XorClausesP,
        SolverConfigP,
        VariablesP,
    ),
) {
    debug_assert_eq!(ctx.part(TrailP).current_level(), 0);
    debug_assert!(ctx.part(TrailP).fully_propagated());

    let var_count = ctx.part(VariablesP).count();
    if var_count == 0 {
        return;
    }

    let multiplier = {
        let probe = ctx.part(ProbeP);
        if probe.budget_multiplier == 0.0 {
            1.0
        } else {
            probe.budget_multiplier
        }
    };
    let budget = (ctx.part(SolverConfigP).probe_budget as f64 * multiplier) as u64;

    let hyper_bin = ctx.part(SolverConfigP).hyper_bin && !ctx.part(ProbeP).hyper_bin_overloaded;

    let free_vars_before = count_unassigned_free_vars(ctx.borrow());

    let mut bogoprops = 0u64;
    let mut hyper_bogoprops = 0u64;

    for offset in 0..var_count {
        if bogoprops > budget {
            break;
        }
        if ctx.part(SolverStateP).sat_state == SatState::Unsat {
            break;
        }

        let var = Var::from_index((ctx.part(ProbeP).cursor + offset) % var_count);

        if !ctx.part(VariablesP).is_free(var)
            || ctx.part(AssignmentP).var_value(var).is_some()
            || !has_binary_occurrence(ctx.borrow(), var)
        {
            continue;
        }

        let lit = var.positive();

        let pos_trial = probe_trial(ctx.borrow(), lit, hyper_bin, &mut bogoprops, &mut hyper_bogoprops);

        let pos = match pos_trial {
            Trial::Failed => {
                if failed_literal(ctx.borrow(), lit) {
                    break;
                }
                continue;
            }
            Trial::Propagated {
                lits,
                two_long_xors,
            } => (lits, two_long_xors),
        };

        let neg_trial = probe_trial(ctx.borrow(), !lit, hyper_bin, &mut bogoprops, &mut hyper_bogoprops);

        let (neg_lits, neg_xors) = match neg_trial {
            Trial::Failed => {
                if failed_literal(ctx.borrow(), !lit) {
                    break;
                }
                continue;
            }
            Trial::Propagated {
                lits,
                two_long_xors,
            } => (lits, two_long_xors),
        };

        // Mark the positive trial's literals and compare the negative trial against them.
        for &pos_lit in pos.0.iter() {
            ctx.part_mut(ProbeP).mark(pos_lit);
        }

        let mut both_propagated: Vec<Lit> = vec![];
        let mut equivalences: Vec<Lit> = vec![];

        for &neg_lit in neg_lits.iter() {
            if neg_lit.var() == var {
                continue;
            }
            bogoprops += 1;
            if ctx.part(ProbeP).seen[neg_lit.code()] {
                both_propagated.push(neg_lit);
            } else if ctx.part(ProbeP).seen[(!neg_lit).code()] {
                // lit implies !neg_lit and !lit implies neg_lit, so neg_lit = !lit.
                equivalences.push(neg_lit);
            }
        }

        ctx.part_mut(ProbeP).clear_marks();

        for &implied in both_propagated.iter() {
            if ctx.part(AssignmentP).lit_is_unk(implied) {
                enqueue_assignment(ctx.borrow(), implied, Reason::Unit);
            }
        }
        if !both_propagated.is_empty() {
            if propagate(ctx.borrow()).is_err() {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                break;
            }
        }

        for &equivalent in equivalences.iter() {
            var_replacer::request(ctx.borrow(), equivalent, !lit);
        }

        // A two variable XOR that holds under both trial polarities holds unconditionally.
        for pos_xor in pos.1.iter() {
            bogoprops += 1;
            if neg_xors.contains(pos_xor) {
                var_replacer::request(
                    ctx.borrow(),
                    pos_xor.vars[0].positive(),
                    pos_xor.vars[1].positive() ^ pos_xor.rhs,
                );
            }
        }
    }

    let cursor = ctx.part(ProbeP).cursor;
    ctx.part_mut(ProbeP).cursor = (cursor + 1) % var_count;

    // Adapt the budget to the productivity of this pass and track the hyper binary share.
    let free_vars_after = count_unassigned_free_vars(ctx.borrow());
    let fixed = free_vars_before.saturating_sub(free_vars_after);

    let probe = ctx.part_mut(ProbeP);
    if fixed * 10 >= free_vars_before.max(1) {
        probe.budget_multiplier = (multiplier * 1.3).min(2.0);
    } else {
        probe.budget_multiplier = (multiplier * 0.7).max(0.5);
    }

    let ratio = ctx.part(SolverConfigP).probe_hyper_bin_cost_ratio;
    ctx.part_mut(ProbeP).hyper_bin_overloaded =
        hyper_bin && (hyper_bogoprops as f64) > (bogoprops.max(1) as f64) * ratio;
}

/// Number of unassigned free variables.
fn count_unassigned_free_vars(
    ctx: partial!(Context, AssignmentP, VariablesP),
) -> usize {
    let assignment = ctx.part(AssignmentP);
    let variables = ctx.part(VariablesP);
    (0..variables.count())
        .filter(|&index| {
            let var = Var::from_index(index);
            variables.is_free(var) && assignment.var_value(var).is_none()
        })
        .count()
}

/// Whether a variable occurs in any binary clause.
fn has_binary_occurrence(ctx: partial!(Context, BinaryClausesP), var: Var) -> bool {
    let binary_clauses = ctx.part(BinaryClausesP);
    !binary_clauses.implied(var.positive()).is_empty()
        || !binary_clauses.implied(var.negative()).is_empty()
}

/// Propagate a trial decision and collect its implication set.
fn probe_trial(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ImplGraphP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
        mut XorClausesP,
        SolverConfigP,
        VariablesP,
    ),
    lit: Lit,
    hyper_bin: bool,
    bogoprops: &mut u64,
    hyper_bogoprops: &mut u64,
) -> Trial {
    let trail_start = ctx.part(TrailP).trail().len();

    ctx.part_mut(TrailP).new_decision_level();
    enqueue_assignment(ctx.borrow(), lit, Reason::Unit);

    if propagate(ctx.borrow()).is_err() {
        backtrack(ctx.borrow(), 0);
        return Trial::Failed;
    }

    let lits: Vec<Lit> = ctx.part(TrailP).trail()[trail_start + 1..].to_vec();
    *bogoprops += lits.len() as u64 + 1;

    let two_long_xors = if ctx.part(SolverConfigP).enable_xor {
        collect_two_long_xors(ctx.borrow(), bogoprops)
    } else {
        vec![]
    };

    backtrack(ctx.borrow(), 0);

    if hyper_bin && !lits.is_empty() {
        add_hyper_binaries(ctx.borrow(), lit, &lits, hyper_bogoprops);
    }

    Trial::Propagated {
        lits,
        two_long_xors,
    }
}

/// XOR clauses with exactly two unassigned variables under the current trial assignment.
fn collect_two_long_xors(
    ctx: partial!(Context, AssignmentP, ClauseAllocP, XorClausesP),
    bogoprops: &mut u64,
) -> Vec<TwoLongXor> {
    let alloc = ctx.part(ClauseAllocP);
    let assignment = ctx.part(AssignmentP);

    let mut result = vec![];

    for &cref in ctx.part(XorClausesP).clauses() {
        let header = alloc.header(cref);
        if header.deleted() {
            continue;
        }
        let lits = alloc.clause(cref).lits();
        *bogoprops += lits.len() as u64;

        let mut unassigned = [None; 2];
        let mut unassigned_count = 0;
        let mut rhs = header.xor_rhs();

        for &clause_lit in lits {
            match assignment.var_value(clause_lit.var()) {
                Some(value) => rhs ^= value,
                None => {
                    if unassigned_count == 2 {
                        unassigned_count = 3;
                        break;
                    }
                    unassigned[unassigned_count] = Some(clause_lit.var());
                    unassigned_count += 1;
                }
            }
        }

        if unassigned_count == 2 {
            let mut vars = [unassigned[0].unwrap(), unassigned[1].unwrap()];
            if vars[1] < vars[0] {
                vars.swap(0, 1);
            }
            result.push(TwoLongXor { vars, rhs });
        }
    }

    result
}

/// Add hyper binary clauses for literals not reachable through binary clauses alone.
///
/// Re-propagates the trial decision using only binary clauses, then connects every literal of the
/// full implication set that the binary-only propagation missed directly to the probe.
fn add_hyper_binaries(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ImplGraphP,
        mut TrailP,
        mut VsidsP,
        VariablesP,
    ),
    lit: Lit,
    full_set: &[Lit],
    hyper_bogoprops: &mut u64,
) {
    let trail_start = ctx.part(TrailP).trail().len();

    ctx.part_mut(TrailP).new_decision_level();
    enqueue_assignment(ctx.borrow(), lit, Reason::Unit);

    loop {
        let next = match ctx.part_mut(TrailP).pop_queue() {
            Some(next) => next,
            None => break,
        };
        *hyper_bogoprops += 1;
        if propagate_binary(ctx.borrow(), next).is_err() {
            // A binary only conflict implies the full propagation conflicts as well, which the
            // caller already ruled out.
            unreachable!("binary propagation conflicts where full propagation did not");
        }
    }

    let binary_reached: Vec<Lit> = ctx.part(TrailP).trail()[trail_start + 1..].to_vec();

    backtrack(ctx.borrow(), 0);

    for &implied in full_set.iter() {
        *hyper_bogoprops += 1;
        if !binary_reached.contains(&implied)
            && !ctx.part(BinaryClausesP).contains([!lit, implied])
        {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([!lit, implied]);
        }
    }
}

/// Handle a failed trial literal.
///
/// The negation is enqueued at level 0 and propagated; a conflict there makes the formula
/// unsatisfiable. Returns whether solving can stop.
fn failed_literal(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut WatchlistsP,
        mut XorClausesP,
    ),
    lit: Lit,
) -> bool {
    if ctx.part(AssignmentP).lit_is_unk(!lit) {
        enqueue_assignment(ctx.borrow(), !lit, Reason::Unit);
    }

    if propagate(ctx.borrow()).is_err() {
        ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use xsat_formula::lits;

    use crate::context::set_var_count;
    use crate::load::load_clause;

    #[test]
    fn failed_literal_becomes_unit() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        // Probing 1 propagates both 2 and -2, so -1 holds.
        load_clause(ctx.borrow(), &lits![-1, 2]);
        load_clause(ctx.borrow(), &lits![-1, -2]);

        run(ctx.borrow());

        assert_eq!(ctx.part(AssignmentP).lit_value(lits![-1][0]), Some(true));
        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);
    }

    #[test]
    fn both_failing_polarities_are_unsat() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        load_clause(ctx.borrow(), &lits![-1, 2]);
        load_clause(ctx.borrow(), &lits![-1, -2]);
        load_clause(ctx.borrow(), &lits![1, 3]);
        load_clause(ctx.borrow(), &lits![1, -3]);

        run(ctx.borrow());

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }

    #[test]
    fn opposite_propagation_records_equivalence() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        // 1 implies 2 and -1 implies -2, so 1 and 2 are equivalent.
        load_clause(ctx.borrow(), &lits![-1, 2]);
        load_clause(ctx.borrow(), &lits![1, -2]);

        run(ctx.borrow());

        let replacer = ctx.part(VarReplacerP);
        assert_eq!(
            replacer.repr_lit(lits![2][0]),
            replacer.repr_lit(lits![1][0])
        );
    }
}
