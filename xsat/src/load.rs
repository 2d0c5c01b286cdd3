//! Loading a formula into the solver.
use partial_ref::{partial, PartialRef};

use crate::clause::{db, ClauseHeader, Tier};
use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, ClauseDbP, Context, GaussP, ImplGraphP,
    IncrementalP, ProofP, SolverStateP, SubsumerP, TmpDataP, TrailP, VarReplacerP, VariablesP,
    VsidsP, WatchlistsP, XorClausesP,
};
use crate::proof::clause_hash;
use crate::prop::{assignment, full_restart, Reason};
use crate::state::SatState;
use crate::subsumer;
use crate::var_replacer;
use crate::variables::VarState;
use crate::xor;
use xsat_formula::{Lit, Var};
use xsat_internal_proof::{DeleteClauseProof, ProofStep};

/// Adds a clause to the current formula.
///
/// Removes duplicated literals, ignores tautological clauses (eg. x v -x v y), handles empty
/// clauses and dispatches among unit, binary and long clauses. Literals over variables that were
/// replaced or eliminated by earlier inprocessing are mapped back into the current formula first.
///
/// Does not adjust the solvers variable count. If necessary that has to be done before calling
/// this.
pub fn load_clause<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ProofP<'a>,
        mut SolverStateP,
        mut SubsumerP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    lits: &[Lit],
) {
    match ctx.part(SolverStateP).sat_state {
        SatState::Unsat => return,
        SatState::Sat => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unknown;
        }
        _ => {}
    }

    // Restart the search when the user adds new clauses.
    full_restart(ctx.borrow());

    restore_and_map_lits(ctx.borrow(), lits);

    {
        let mut ctx = ctx.borrow();
        let solve_started = ctx.part(SolverStateP).solve_started;
        let (tmp_data, mut ctx) = ctx.split_part_mut(TmpDataP);
        let proof = ctx.part_mut(ProofP);

        proof.add_input_clause(&tmp_data.lits);

        if solve_started && proof.incremental_steps_in_proof() {
            proof.add_step(&ProofStep::AddClause {
                clause: &tmp_data.lits,
            });
        }
    }

    let (tmp_data, mut ctx) = ctx.split_part_mut(TmpDataP);
    let (proof, mut ctx) = ctx.split_part_mut(ProofP);

    let lits = &mut tmp_data.lits;
    let simplified_lits = &mut tmp_data.lits_2;

    lits.sort_unstable();
    lits.dedup();

    // Detect tautological clauses
    let mut last = None;

    for &lit in lits.iter() {
        if last == Some(!lit) {
            proof.add_step(&ProofStep::DeleteClause {
                clause: &lits[..],
                proof: DeleteClauseProof::Satisfied,
            });
            return;
        }
        last = Some(lit);
    }

    // Remove false literals and satisfied clauses
    simplified_lits.clear();

    for &lit in lits.iter() {
        match ctx.part(AssignmentP).lit_value(lit) {
            Some(true) => {
                proof.add_step(&ProofStep::DeleteClause {
                    clause: &lits[..],
                    proof: DeleteClauseProof::Satisfied,
                });
                return;
            }
            Some(false) => (),
            None => {
                simplified_lits.push(lit);
            }
        }
    }

    if proof.is_active() && simplified_lits.len() < lits.len() {
        let hash = [clause_hash(lits)];
        proof.add_step(&ProofStep::AtClause {
            redundant: false,
            clause: &simplified_lits[..],
            propagation_hashes: &hash[..],
        });
        proof.add_step(&ProofStep::DeleteClause {
            clause: &lits[..],
            proof: DeleteClauseProof::Simplified,
        });
    }

    match simplified_lits[..] {
        [] => ctx.part_mut(SolverStateP).sat_state = SatState::Unsat,
        [lit] => assignment::enqueue_assignment(ctx.borrow(), lit, Reason::Unit),
        [lit_0, lit_1] => {
            ctx.part_mut(BinaryClausesP)
                .add_binary_clause([lit_0, lit_1]);
        }
        _ => {
            let mut header = ClauseHeader::new();
            header.set_tier(Tier::Irred);

            db::add_clause(ctx.borrow(), header, simplified_lits);
        }
    }
}

/// Adds an XOR constraint over the given literals to the current formula.
///
/// Literal signs are absorbed into the rhs. Constraints shrinking below three variables after
/// canonicalization turn into units or equivalences. While proof generation is active the
/// constraint is expanded into its CNF encoding instead, as neither DRAT nor the native proof
/// format can express XOR reasoning; the expansion has `2^(n-1)` clauses for `n` variables.
pub fn load_xor_clause<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ProofP<'a>,
        mut SolverStateP,
        mut SubsumerP,
        mut TmpDataP,
        mut TrailP,
        mut VarReplacerP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        mut XorClausesP,
    ),
    lits: &[Lit],
    rhs: bool,
) {
    match ctx.part(SolverStateP).sat_state {
        SatState::Unsat => return,
        SatState::Sat => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unknown;
        }
        _ => {}
    }

    full_restart(ctx.borrow());

    restore_and_map_lits(ctx.borrow(), lits);

    let mut vars = vec![];
    let rhs = {
        let tmp_data = ctx.part(TmpDataP);
        xor::normalize_xor(&tmp_data.lits, rhs, &mut vars)
    };

    if ctx.part(ProofP).is_active() {
        load_xor_as_cnf(ctx.borrow(), &vars, rhs);
        return;
    }

    // Fold assigned variables into the rhs.
    let mut rhs = rhs;
    vars.retain(|&var| match ctx.part(AssignmentP).var_value(var) {
        Some(value) => {
            rhs ^= value;
            false
        }
        None => true,
    });

    match vars[..] {
        [] => {
            if rhs {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            }
        }
        [var] => {
            assignment::enqueue_assignment(ctx.borrow(), var.lit(rhs), Reason::Unit);
        }
        [var_0, var_1] => {
            // a + b = rhs is the equivalence a = b + rhs.
            var_replacer::request(ctx.borrow(), var_0.positive(), var_1.positive() ^ rhs);
        }
        _ => {
            xor::add_xor_clause(ctx.borrow(), &vars, rhs);
        }
    }
}

/// Expand an XOR constraint into its CNF encoding.
///
/// Emits the `2^(n-1)` clauses whose negation count parity contradicts the rhs.
fn load_xor_as_cnf<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ProofP<'a>,
        mut SolverStateP,
        mut SubsumerP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    vars: &[Var],
    rhs: bool,
) {
    if vars.is_empty() {
        if rhs {
            // An empty XOR with rhs true is the empty clause.
            load_clause(ctx.borrow(), &[]);
        }
        return;
    }

    if vars.len() > 16 {
        // The expansion doubles per variable; refusing keeps the proof sound instead of silently
        // dropping the constraint.
        ctx.part_mut(ProofP)
            .record_unsupported("xor constraint too wide for proof generation");
        return;
    }

    let mut clause = vec![];

    for mask in 0u32..(1 << vars.len()) {
        if (mask.count_ones() & 1 == 1) == rhs {
            continue;
        }
        clause.clear();
        for (index, &var) in vars.iter().enumerate() {
            clause.push(var.lit(mask & (1 << index) == 0));
        }
        load_clause(ctx.borrow(), &clause);
        if ctx.part(SolverStateP).sat_state == SatState::Unsat {
            return;
        }
    }
}

/// Copy the literals into the tmp buffer, restoring eliminated variables and mapping replaced
/// variables to their representatives.
fn restore_and_map_lits<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut SolverStateP,
        mut SubsumerP,
        mut TmpDataP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    lits: &[Lit],
) {
    for &lit in lits {
        if ctx.part(VariablesP).state(lit.var()) == VarState::Eliminated {
            subsumer::restore_var(ctx.borrow(), lit.var());
        }
    }

    let (tmp_data, ctx) = ctx.split_part_mut(TmpDataP);
    let variables = ctx.part(VariablesP);

    tmp_data.lits.clear();
    tmp_data.lits.extend(lits.iter().map(|&lit| {
        match variables.state(lit.var()) {
            VarState::Replaced(replacement) => replacement ^ lit.is_negative(),
            _ => lit,
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use crate::clause::Tier;
    use crate::context::set_var_count;
    use xsat_formula::lits;

    #[test]
    fn unsat_on_empty_clause() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        load_clause(ctx.borrow(), &[]);

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }

    #[test]
    fn unit_clauses() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        load_clause(ctx.borrow(), &lits![1]);

        assert_eq!(ctx.part(TrailP).trail().len(), 1);

        load_clause(ctx.borrow(), &lits![3, -3]);

        assert_eq!(ctx.part(TrailP).trail().len(), 1);

        load_clause(ctx.borrow(), &lits![-2]);

        assert_eq!(ctx.part(TrailP).trail().len(), 2);

        load_clause(ctx.borrow(), &lits![1, 1]);

        assert_eq!(ctx.part(TrailP).trail().len(), 2);

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);

        load_clause(ctx.borrow(), &lits![2]);

        assert_eq!(ctx.part(TrailP).trail().len(), 2);

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }

    #[test]
    fn binary_clauses() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        load_clause(ctx.borrow(), &lits![1, 2]);

        assert_eq!(ctx.part(BinaryClausesP).count(), 1);

        load_clause(ctx.borrow(), &lits![-1, 3, 3]);

        assert_eq!(ctx.part(BinaryClausesP).count(), 2);

        load_clause(ctx.borrow(), &lits![4, -4]);

        assert_eq!(ctx.part(BinaryClausesP).count(), 2);

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);
    }

    #[test]
    fn long_clauses() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        load_clause(ctx.borrow(), &lits![1, 2, 3]);

        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Irred), 1);

        load_clause(ctx.borrow(), &lits![-2, 3, 3, 4]);

        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Irred), 2);

        load_clause(ctx.borrow(), &lits![4, -5, 5, 2]);

        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Irred), 2);

        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);
    }

    #[test]
    fn xor_clause_dispatch() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        // Three variables and more are stored as XOR clauses.
        load_xor_clause(ctx.borrow(), &lits![1, 2, 3], true);
        assert_eq!(ctx.part(XorClausesP).clauses().len(), 1);

        // A two variable XOR is an equivalence.
        load_xor_clause(ctx.borrow(), &lits![4, 5], true);
        let replacer = ctx.part(VarReplacerP);
        assert_eq!(replacer.repr_lit(lits![5][0]), lits![-4][0]);

        // A single variable XOR is a unit.
        load_xor_clause(ctx.borrow(), &lits![6], true);
        assert!(ctx.part(AssignmentP).lit_is_true(lits![6][0]));

        // An empty XOR with rhs true is a contradiction.
        load_xor_clause(ctx.borrow(), &lits![7, 7], true);
        assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unsat);
    }
}
