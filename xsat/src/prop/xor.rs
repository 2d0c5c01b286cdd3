//! Propagation of XOR clauses.
//!
//! XOR clauses are watched by *variable*: as long as at least two variables of the clause are
//! unassigned, the parity constraint cannot force anything, so two unassigned variables are kept
//! in the first two literal positions and watched. When one of them is assigned, the watch either
//! moves to another unassigned variable, or the clause has at most one unassigned variable left:
//! the parity of the assigned values then either forces the remaining variable (unit propagation
//! with parity), is already satisfied, or contradicts the rhs.
//!
//! The signs of the stored literals are scratch space (see [`crate::xor`]). Before a propagation
//! or conflict is reported, the signs are rewritten to the clause's CNF image under the current
//! assignment: the propagated literal, if any, is moved to position 0 and every other literal is
//! made false. Conflict analysis can then treat [`Reason::Xor`] and [`Conflict::Xor`] exactly
//! like their long clause counterparts.

use partial_ref::{partial, PartialRef};

use xsat_formula::Lit;

use crate::context::{AssignmentP, ClauseAllocP, Context, ImplGraphP, TrailP, XorClausesP};

use super::enqueue_assignment;
use super::{Conflict, Reason};

/// Propagate all XOR clauses watched by the assigned literal's variable.
///
/// On conflict returns the clause, with its literals rewritten to the conflicting CNF image.
pub fn propagate_xor(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ImplGraphP,
        mut TrailP,
        mut XorClausesP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    let var = lit.var();

    let mut watch_pos = 0;

    'watches: loop {
        let cref = {
            let watch_list = ctx.part_mut(XorClausesP).watched_by_mut(var);
            if watch_pos >= watch_list.len() {
                break;
            }
            watch_list[watch_pos]
        };

        if ctx.part(ClauseAllocP).header(cref).deleted() {
            // Deleted clauses are dropped from the watch list lazily.
            ctx.part_mut(XorClausesP)
                .watched_by_mut(var)
                .swap_remove(watch_pos);
            continue;
        }

        // Keep the just assigned watched variable in position 0.
        {
            let clause = ctx.part_mut(ClauseAllocP).clause_mut(cref);
            let lits = clause.lits_mut();
            if lits[0].var() != var {
                lits.swap(0, 1);
            }
            debug_assert_eq!(lits[0].var(), var);
        }

        // Look for an unassigned unwatched variable to move the watch to.
        let swap_target = {
            let mut ctx = ctx.borrow();
            let (alloc, ctx) = ctx.split_part(ClauseAllocP);
            let assignment = ctx.part(AssignmentP);
            alloc.clause(cref).lits()[2..]
                .iter()
                .position(|rest_lit| assignment.var_value(rest_lit.var()).is_none())
                .map(|offset| offset + 2)
        };

        if let Some(swap_target) = swap_target {
            let new_watch = {
                let clause = ctx.part_mut(ClauseAllocP).clause_mut(cref);
                clause.lits_mut().swap(0, swap_target);
                clause.lits()[0].var()
            };
            let xor_clauses = ctx.part_mut(XorClausesP);
            xor_clauses.watched_by_mut(var).swap_remove(watch_pos);
            xor_clauses.add_watch(new_watch, cref);
            continue 'watches;
        }

        // Every variable except possibly the other watched one is assigned. The parity of the
        // assigned values determines the value of the remaining variable.
        let (other_value, forced) = {
            let mut ctx = ctx.borrow();
            let (alloc, ctx) = ctx.split_part(ClauseAllocP);
            let assignment = ctx.part(AssignmentP);
            let clause = alloc.clause(cref);

            let mut parity = clause.header().xor_rhs();
            for &clause_lit in clause.lits().iter() {
                if clause_lit.var() != clause.lits()[1].var() {
                    parity ^= assignment
                        .var_value(clause_lit.var())
                        .expect("unwatched xor variable is unassigned");
                }
            }
            (assignment.var_value(clause.lits()[1].var()), parity)
        };

        match other_value {
            None => {
                // Rewrite the literals into the propagating CNF image: the forced literal in
                // position 0, false literals everywhere else.
                let propagated = {
                    let mut ctx = ctx.borrow();
                    let (alloc, ctx) = ctx.split_part_mut(ClauseAllocP);
                    let assignment = ctx.part(AssignmentP);
                    let clause = alloc.clause_mut(cref);
                    let lits = clause.lits_mut();

                    lits.swap(0, 1);
                    let propagated = lits[0].var().lit(forced);
                    lits[0] = propagated;
                    for clause_lit in lits[1..].iter_mut() {
                        let value = assignment.var_value(clause_lit.var()).unwrap();
                        *clause_lit = clause_lit.var().lit(!value);
                    }
                    propagated
                };

                // Both positions stay watched: the swap exchanged two watched variables.
                enqueue_assignment(ctx.borrow(), propagated, Reason::Xor(cref));
                watch_pos += 1;
            }
            Some(other_value) => {
                // `forced` is the value position 1 would need; a mismatch violates parity.
                if other_value == forced {
                    watch_pos += 1;
                    continue;
                }

                // Conflict: rewrite all literals into their false image and report the clause.
                {
                    let mut ctx = ctx.borrow();
                    let (alloc, ctx) = ctx.split_part_mut(ClauseAllocP);
                    let assignment = ctx.part(AssignmentP);
                    let clause = alloc.clause_mut(cref);
                    for clause_lit in clause.lits_mut().iter_mut() {
                        let value = assignment.var_value(clause_lit.var()).unwrap();
                        *clause_lit = clause_lit.var().lit(!value);
                    }
                }
                return Err(Conflict::Xor(cref));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use xsat_formula::{lits, vars};

    use crate::context::set_var_count;
    use crate::prop::propagate;
    use crate::xor::add_xor_clause;

    #[test]
    fn xor_unit_propagation_with_parity() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 6);

        // 1 + 2 + 3 = 1
        add_xor_clause(ctx.borrow(), &vars![1, 2, 3], true);

        enqueue_assignment(ctx.borrow(), lits![1][0], Reason::Unit);
        enqueue_assignment(ctx.borrow(), lits![2][0], Reason::Unit);

        assert!(propagate(ctx.borrow()).is_ok());

        // 1 = true, 2 = true forces 3 = true.
        assert_eq!(ctx.part(AssignmentP).lit_value(lits![3][0]), Some(true));
    }

    #[test]
    fn xor_conflict_on_wrong_parity() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 6);

        // 1 + 2 + 3 = 0
        add_xor_clause(ctx.borrow(), &vars![1, 2, 3], false);

        enqueue_assignment(ctx.borrow(), lits![1][0], Reason::Unit);
        enqueue_assignment(ctx.borrow(), lits![2][0], Reason::Unit);
        enqueue_assignment(ctx.borrow(), lits![3][0], Reason::Unit);

        let result = propagate(ctx.borrow());

        match result {
            Err(Conflict::Xor(cref)) => {
                // The conflict clause is the all false CNF image.
                let clause = ctx.part(ClauseAllocP).clause(cref);
                for &clause_lit in clause.lits() {
                    assert!(ctx.part(AssignmentP).lit_is_false(clause_lit));
                }
            }
            other => panic!("expected xor conflict, got {:?}", other),
        }
    }

    #[test]
    fn xor_watch_moves_to_unassigned_var() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 6);

        // 1 + 2 + 3 + 4 = 0
        add_xor_clause(ctx.borrow(), &vars![1, 2, 3, 4], false);

        enqueue_assignment(ctx.borrow(), lits![1][0], Reason::Unit);
        assert!(propagate(ctx.borrow()).is_ok());

        // Two variables are still unassigned, nothing may propagate.
        assert!(ctx.part(AssignmentP).lit_is_unk(lits![3][0]));
        assert!(ctx.part(AssignmentP).lit_is_unk(lits![4][0]));

        enqueue_assignment(ctx.borrow(), lits![-2][0], Reason::Unit);
        enqueue_assignment(ctx.borrow(), lits![3][0], Reason::Unit);
        assert!(propagate(ctx.borrow()).is_ok());

        // 1 = true, 2 = false, 3 = true forces 4 = false.
        assert_eq!(ctx.part(AssignmentP).lit_value(lits![4][0]), Some(false));
    }
}
