//! Simplification using unit clauses.

use partial_ref::{partial, PartialRef};

use crate::binary::simplify_binary;
use crate::clause::db::filter_clauses;
use crate::clause::db::Tier;
use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, ClauseDbP, Context, GaussP, ImplGraphP, ProofP,
    SolverStateP, TmpDataP, TrailP, VarReplacerP, VariablesP, VsidsP, WatchlistsP, XorClausesP,
};
use crate::proof::{clause_hash, lit_hash};
use crate::var_replacer;
use crate::xor;
use xsat_internal_proof::{DeleteClauseProof, ProofStep};

/// Turn level 0 propagations into unit clauses and prove them.
pub fn prove_units<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut ImplGraphP,
        mut ProofP<'a>,
        mut TrailP,
        AssignmentP,
        ClauseAllocP,
    ),
) -> bool {
    let mut new_unit = false;

    if ctx.part(TrailP).current_level() == 0 {
        let (impl_graph, mut ctx) = ctx.split_part_mut(ImplGraphP);

        let mut unit_proofs = vec![];

        let (trail, mut ctx) = ctx.split_part_mut(TrailP);

        for &lit in trail.trail() {
            new_unit = true;
            let (proof, mut ctx) = ctx.split_part_mut(ProofP);
            if proof.prove_propagated_unit_clauses() {
                let ctx_lits = ctx.borrow();
                let reason = impl_graph.reason(lit.var());
                if !reason.is_unit() {
                    let lits = impl_graph.reason(lit.var()).lits(&ctx_lits);
                    let hash = clause_hash(lits) ^ lit_hash(lit);

                    unit_proofs.push((lit, hash));
                }
            }

            impl_graph.update_removed_unit(lit.var());
        }

        trail.clear();

        if !unit_proofs.is_empty() {
            ctx.part_mut(ProofP).add_step(&ProofStep::UnitClauses {
                units: &unit_proofs,
            });
        }
    }

    new_unit
}

/// Remove satisfied clauses and false literals from all clause stores.
///
/// Runs at decision level 0 with all assignments propagated. CNF clauses lose their false
/// literals, XOR clauses fold assigned variables into their rhs, and equivalences recorded while
/// doing so are committed before returning.
pub fn simplify<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut ProofP<'a>,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VarReplacerP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        mut XorClausesP,
    ),
) {
    simplify_binary(ctx.borrow());

    simplify_long(ctx.borrow());

    xor::clean_xor_clauses(ctx.borrow());

    var_replacer::perform_replace(ctx.borrow());
}

/// Remove satisfied long clauses and drop false literals in place.
fn simplify_long<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ProofP<'a>,
        mut WatchlistsP,
        AssignmentP,
    ),
) {
    let (assignment, mut ctx) = ctx.split_part(AssignmentP);

    let mut new_lits = vec![];

    let (proof, mut ctx) = ctx.split_part_mut(ProofP);
    let (ctx_2, mut ctx) = ctx.split_borrow();

    filter_clauses(ctx_2, |alloc, cref| {
        let clause = alloc.clause_mut(cref);
        new_lits.clear();
        for &lit in clause.lits() {
            match assignment.lit_value(lit) {
                None => new_lits.push(lit),
                Some(true) => {
                    proof.add_step(&ProofStep::DeleteClause {
                        clause: clause.lits(),
                        proof: DeleteClauseProof::Satisfied,
                    });
                    return false;
                }
                Some(false) => (),
            }
        }
        if new_lits.len() < clause.lits().len() {
            if proof.is_active() {
                let redundant = clause.header().tier() != Tier::Irred;
                let hash = [clause_hash(clause.lits())];
                proof.add_step(&ProofStep::AtClause {
                    redundant,
                    clause: &new_lits[..],
                    propagation_hashes: &hash[..],
                });
                proof.add_step(&ProofStep::DeleteClause {
                    clause: clause.lits(),
                    proof: DeleteClauseProof::Simplified,
                });
            }

            match new_lits[..] {
                // Cannot have empty or unit clauses after full propagation. An empty clause would
                // have been a conflict and a unit clause must be satisfied and thus would have been
                // dropped above.
                [] | [_] => unreachable!(),
                [lit_0, lit_1] => {
                    ctx.part_mut(BinaryClausesP)
                        .add_binary_clause([lit_0, lit_1]);
                    false
                }
                ref lits => {
                    clause.lits_mut()[..lits.len()].copy_from_slice(lits);
                    clause.header_mut().set_len(lits.len());
                    true
                }
            }
        } else {
            true
        }
    })
}
