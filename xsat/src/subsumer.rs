//! Subsumption, self-subsuming resolution and bounded variable elimination.
//!
//! All three phases work on occurrence lists that are built at the start of a pass and thrown
//! away at the end; they are disjoint from the propagator's watch lists. Each occurrence entry
//! carries a 32 bit abstraction of its clause, a Bloom style fingerprint with one bit per
//! `var % 32`, which lets most non-subsumptions be rejected without touching the clause data.
//!
//! Occurrence entries are not eagerly removed when clauses are deleted or strengthened; scans
//! skip entries whose clause is deleted or no longer contains the list's literal. The pass is
//! budgeted in bogoprops, an abstract work counter bumped for every occurrence scanned and every
//! clause compared; when the budget runs out the pass returns at the next safe point.
//!
//! Eliminated variables record the clauses they occurred in, so model reconstruction can replay
//! the log backwards and pick a satisfying value, and so an eliminated variable can be restored
//! when a later solve call assumes it.

use partial_ref::{partial, PartialRef};

use xsat_formula::{Lit, Var};

use crate::clause::{db, ClauseHeader, ClauseRef, Tier};
use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, ClauseDbP, Context, ImplGraphP, IncrementalP,
    SolverConfigP, SolverStateP, SubsumerP, TrailP, VariablesP, VsidsP, WatchlistsP, XorClausesP,
};
use crate::decision;
use crate::prop::{enqueue_assignment, Reason};
use crate::state::SatState;

/// Clauses a variable occurred in when it was eliminated.
pub struct EliminatedVar {
    pub var: Var,
    pub clauses: Vec<Vec<Lit>>,
}

/// Subsumption and elimination state.
#[derive(Default)]
pub struct Subsumer {
    /// Elimination log in chronological order.
    elim: Vec<EliminatedVar>,
}

impl Subsumer {
    /// Elimination log in chronological order.
    pub fn eliminated(&self) -> &[EliminatedVar] {
        &self.elim
    }

    /// Remove and return the log entry of a variable, if it was eliminated.
    pub fn take_eliminated(&mut self, var: Var) -> Option<EliminatedVar> {
        let pos = self.elim.iter().position(|entry| entry.var == var)?;
        Some(self.elim.remove(pos))
    }
}

/// One occurrence list entry: a clause and its abstraction at registration time.
///
/// The abstraction can be stale after strengthening; it only ever gains spurious bits, which
/// keeps the filter sound.
#[derive(Copy, Clone)]
struct Occur {
    cref: ClauseRef,
    abstraction: u32,
}

/// Per literal occurrence lists, rebuilt for every pass.
struct OccLists {
    by_lit: Vec<Vec<Occur>>,
}

impl OccLists {
    fn build(ctx: partial!(Context, ClauseAllocP, ClauseDbP), var_count: usize) -> OccLists {
        let mut by_lit = vec![vec![]; var_count * 2];

        let alloc = ctx.part(ClauseAllocP);
        for &cref in ctx.part(ClauseDbP).clauses_iter() {
            let header = alloc.header(cref);
            if header.deleted() || header.is_xor() {
                continue;
            }
            let lits = alloc.clause(cref).lits();
            let abstraction = clause_abstraction(lits);
            for &lit in lits {
                by_lit[lit.code()].push(Occur { cref, abstraction });
            }
        }

        OccLists { by_lit }
    }

    fn of(&self, lit: Lit) -> &[Occur] {
        &self.by_lit[lit.code()]
    }

    fn add(&mut self, alloc_lits: &[Lit], cref: ClauseRef) {
        let abstraction = clause_abstraction(alloc_lits);
        for &lit in alloc_lits {
            self.by_lit[lit.code()].push(Occur { cref, abstraction });
        }
    }
}

/// Bloom style literal fingerprint with one bit per `var % 32`.
fn clause_abstraction(lits: &[Lit]) -> u32 {
    let mut abstraction = 0;
    for &lit in lits {
        abstraction |= 1 << (lit.index() % 32);
    }
    abstraction
}

/// Run one subsumption, strengthening and elimination pass.
///
/// Requires decision level 0 with all assignments propagated and the clause stores cleaned.
pub fn run(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut SolverStateP,
        mut SubsumerP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        IncrementalP,
        SolverConfigP,
        XorClausesP,
    ),
) {
    debug_assert_eq!(ctx.part(TrailP).current_level(), 0);
    debug_assert!(ctx.part(TrailP).fully_propagated());

    let budget = ctx.part(SolverConfigP).subsume_budget;

    let var_count = ctx.part(VariablesP).count();
    let mut occ = OccLists::build(ctx.borrow(), var_count);

    subsume_pass(ctx.borrow(), &mut occ, budget);
    strengthen_pass(ctx.borrow(), &mut occ, budget);

    if ctx.part(SolverConfigP).enable_elim {
        eliminate_pass(ctx.borrow(), &mut occ, budget);
    }
}

/// Phase A: remove clauses subsumed by another clause.
fn subsume_pass(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
    occ: &mut OccLists,
    budget: u64,
) {
    let crefs: Vec<ClauseRef> = ctx.part(ClauseDbP).clauses_iter().cloned().collect();
    let mut bogoprops = 0u64;

    for cref in crefs {
        if bogoprops > budget {
            break;
        }
        bogoprops += 1;

        let (sub_lits, sub_abstraction, sub_is_learnt) = {
            let alloc = ctx.part(ClauseAllocP);
            let header = alloc.header(cref);
            if header.deleted() || header.is_xor() {
                continue;
            }
            let lits = alloc.clause(cref).lits().to_vec();
            let abstraction = clause_abstraction(&lits);
            (lits, abstraction, header.tier() != Tier::Irred)
        };

        // Scan the occurrence list of the least occurring literal of the clause.
        let scan_lit = sub_lits
            .iter()
            .cloned()
            .min_by_key(|&lit| occ.of(lit).len())
            .unwrap();

        let candidates: Vec<Occur> = occ.of(scan_lit).to_vec();
        let mut subsumed_irred = false;

        for occur in candidates {
            bogoprops += 1;
            if occur.cref == cref {
                continue;
            }
            if sub_abstraction & !occur.abstraction != 0 {
                continue;
            }

            let is_subsumed = {
                let alloc = ctx.part(ClauseAllocP);
                let header = alloc.header(occur.cref);
                if header.deleted() || header.is_xor() {
                    false
                } else {
                    let other_lits = alloc.clause(occur.cref).lits();
                    bogoprops += other_lits.len() as u64;
                    other_lits.len() >= sub_lits.len()
                        && other_lits.contains(&scan_lit)
                        && sub_lits.iter().all(|lit| other_lits.contains(lit))
                }
            };

            if is_subsumed {
                if ctx.part(ClauseAllocP).header(occur.cref).tier() == Tier::Irred {
                    subsumed_irred = true;
                }
                db::detach_and_delete_clause(ctx.borrow(), occur.cref);
            }
        }

        // A learnt clause that subsumed an irredundant one is needed for completeness.
        if subsumed_irred && sub_is_learnt {
            db::set_clause_tier(ctx.borrow(), cref, Tier::Irred);
        }
    }
}

/// Phase B: self-subsuming resolution.
///
/// When a clause `D = (C \ {l}) u {!l}` with `|D| <= |C|` exists, resolving `C` with `D` on `l`
/// yields `C \ {l}`, so `l` can be dropped from `C`.
fn strengthen_pass(
    mut ctx: partial!(
        Context,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut WatchlistsP,
    ),
    occ: &mut OccLists,
    budget: u64,
) {
    let crefs: Vec<ClauseRef> = ctx.part(ClauseDbP).clauses_iter().cloned().collect();
    let mut bogoprops = 0u64;

    for cref in crefs {
        if bogoprops > budget {
            break;
        }

        'strengthen: loop {
            bogoprops += 1;

            let (lits, abstraction) = {
                let alloc = ctx.part(ClauseAllocP);
                let header = alloc.header(cref);
                if header.deleted() || header.is_xor() {
                    break 'strengthen;
                }
                let lits = alloc.clause(cref).lits().to_vec();
                let abstraction = clause_abstraction(&lits);
                (lits, abstraction)
            };

            let mut remove: Option<Lit> = None;

            'lits: for &lit in lits.iter() {
                for occur in occ.of(!lit).iter() {
                    bogoprops += 1;
                    if occur.abstraction & !abstraction != 0 {
                        continue;
                    }

                    let strengthens = {
                        let alloc = ctx.part(ClauseAllocP);
                        let header = alloc.header(occur.cref);
                        if header.deleted() || header.is_xor() || occur.cref == cref {
                            false
                        } else {
                            let other_lits = alloc.clause(occur.cref).lits();
                            bogoprops += other_lits.len() as u64;
                            other_lits.len() <= lits.len()
                                && other_lits.contains(&!lit)
                                && other_lits
                                    .iter()
                                    .all(|&other| other == !lit || lits.contains(&other))
                        }
                    };

                    if strengthens {
                        remove = Some(lit);
                        break 'lits;
                    }
                }
            }

            let remove = match remove {
                Some(remove) => remove,
                None => break 'strengthen,
            };

            strengthen_clause(ctx.borrow(), occ, cref, remove);

            if bogoprops > budget {
                break 'strengthen;
            }
        }
    }
}

/// Remove a literal from an attached clause, converting it if it gets too short.
fn strengthen_clause(
    mut ctx: partial!(
        Context,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut WatchlistsP,
    ),
    occ: &mut OccLists,
    cref: ClauseRef,
    remove: Lit,
) {
    db::detach_clause(ctx.borrow(), cref);

    let new_len = {
        let clause = ctx.part_mut(ClauseAllocP).clause_mut(cref);
        let lits = clause.lits_mut();
        let pos = lits.iter().position(|&lit| lit == remove).unwrap();
        let last = lits.len() - 1;
        lits.swap(pos, last);
        let new_len = last;
        clause.header_mut().set_len(new_len);
        new_len
    };

    match new_len {
        2 => {
            let lits = {
                let lits = ctx.part(ClauseAllocP).clause(cref).lits();
                [lits[0], lits[1]]
            };
            db::delete_clause(ctx.borrow(), cref);
            if !ctx.part(BinaryClausesP).contains(lits) {
                ctx.part_mut(BinaryClausesP).add_binary_clause(lits);
            }
        }
        _ => {
            db::attach_clause(ctx.borrow(), cref);
            let lits = ctx.part(ClauseAllocP).clause(cref).lits().to_vec();
            occ.add(&lits, cref);
        }
    }
}

/// Phase C: bounded variable elimination.
fn eliminate_pass(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut SolverStateP,
        mut SubsumerP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        IncrementalP,
        SolverConfigP,
        XorClausesP,
    ),
    occ: &mut OccLists,
    budget: u64,
) {
    let occurrence_limit = ctx.part(SolverConfigP).elim_occurrence_limit;
    let grow_limit = ctx.part(SolverConfigP).elim_grow_limit;
    let var_count = ctx.part(VariablesP).count();

    // Order the candidates by the product of their occurrence counts, cheapest first.
    let mut candidates: Vec<(usize, Var)> = vec![];
    for index in 0..var_count {
        let var = Var::from_index(index);

        if !ctx.part(VariablesP).is_free(var)
            || ctx.part(AssignmentP).var_value(var).is_some()
            || ctx.part(XorClausesP).var_occurs(var)
            || ctx
                .part(IncrementalP)
                .assumption_vars()
                .any(|assumed| assumed == var)
        {
            continue;
        }

        let poss = occ.of(var.positive()).len()
            + ctx.part(BinaryClausesP).implied(var.negative()).len();
        let negs = occ.of(var.negative()).len()
            + ctx.part(BinaryClausesP).implied(var.positive()).len();

        if poss > occurrence_limit || negs > occurrence_limit {
            continue;
        }

        candidates.push((poss * negs, var));
    }
    candidates.sort_unstable_by_key(|&(product, _)| product);

    let mut bogoprops = 0u64;

    for (_, var) in candidates {
        if bogoprops > budget {
            break;
        }
        if ctx.part(SolverStateP).sat_state == SatState::Unsat {
            return;
        }
        if ctx.part(AssignmentP).var_value(var).is_some() {
            continue;
        }

        // Gather the irredundant clauses of both polarities. Redundant clauses containing the
        // variable are simply dropped, they are implied by the rest.
        let mut poss: Vec<Vec<Lit>> = vec![];
        let mut negs: Vec<Vec<Lit>> = vec![];
        let mut poss_refs: Vec<ClauseRef> = vec![];
        let mut negs_refs: Vec<ClauseRef> = vec![];
        let mut learnt_refs: Vec<ClauseRef> = vec![];

        let mut gather_failed = false;
        for &polarity in &[true, false] {
            let lit = var.lit(polarity);
            for occur in occ.of(lit).iter() {
                bogoprops += 1;
                let alloc = ctx.part(ClauseAllocP);
                let header = alloc.header(occur.cref);
                if header.deleted() || header.is_xor() {
                    continue;
                }
                let lits = alloc.clause(occur.cref).lits();
                if !lits.contains(&lit) {
                    // Stale entry of a strengthened clause.
                    continue;
                }
                if header.tier() != Tier::Irred {
                    learnt_refs.push(occur.cref);
                    continue;
                }
                if polarity {
                    poss.push(lits.to_vec());
                    poss_refs.push(occur.cref);
                } else {
                    negs.push(lits.to_vec());
                    negs_refs.push(occur.cref);
                }
            }
            for &implied in ctx.part(BinaryClausesP).implied(!lit).iter() {
                if implied.var() == var {
                    // Degenerate binary handled by propagation and cleaning.
                    gather_failed = true;
                    break;
                }
                if polarity {
                    poss.push(vec![lit, implied]);
                } else {
                    negs.push(vec![lit, implied]);
                }
            }
        }
        if gather_failed {
            continue;
        }

        let original_count = poss.len() + negs.len();

        // Compute the non-tautological resolvents on the variable.
        let mut resolvents: Vec<Vec<Lit>> = vec![];
        let mut too_many = false;

        'resolve: for pos_clause in poss.iter() {
            for neg_clause in negs.iter() {
                bogoprops += (pos_clause.len() + neg_clause.len()) as u64;

                let mut resolvent: Vec<Lit> = pos_clause
                    .iter()
                    .chain(neg_clause.iter())
                    .cloned()
                    .filter(|&lit| lit.var() != var)
                    .collect();
                resolvent.sort_unstable();
                resolvent.dedup();

                let mut tautology = false;
                let mut last = None;
                for &lit in resolvent.iter() {
                    if last == Some(!lit) {
                        tautology = true;
                        break;
                    }
                    last = Some(lit);
                }
                if tautology {
                    continue;
                }

                resolvents.push(resolvent);
                if resolvents.len() > original_count + grow_limit {
                    too_many = true;
                    break 'resolve;
                }
            }
        }

        if too_many {
            continue;
        }

        // Commit: log and remove the originals, add the resolvents.
        let mut log = EliminatedVar {
            var,
            clauses: vec![],
        };
        log.clauses.extend(poss.iter().cloned());
        log.clauses.extend(negs.iter().cloned());

        for &cref in poss_refs.iter().chain(negs_refs.iter()) {
            if !ctx.part(ClauseAllocP).header(cref).deleted() {
                db::detach_and_delete_clause(ctx.borrow(), cref);
            }
        }
        for &cref in learnt_refs.iter() {
            if !ctx.part(ClauseAllocP).header(cref).deleted() {
                db::detach_and_delete_clause(ctx.borrow(), cref);
            }
        }
        for clause in poss.iter().chain(negs.iter()) {
            if clause.len() == 2 {
                ctx.part_mut(BinaryClausesP)
                    .remove_binary_clause([clause[0], clause[1]]);
            }
        }

        for resolvent in resolvents {
            add_resolvent(ctx.borrow(), occ, &resolvent);
            if ctx.part(SolverStateP).sat_state == SatState::Unsat {
                return;
            }
        }

        ctx.part_mut(VariablesP).set_eliminated(var);
        decision::remove_var(ctx.borrow(), var);
        ctx.part_mut(SubsumerP).elim.push(log);
    }
}

/// Add a resolvent produced by variable elimination.
fn add_resolvent(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut WatchlistsP,
    ),
    occ: &mut OccLists,
    lits: &[Lit],
) {
    match lits {
        [] => {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
        }
        [unit] => {
            if ctx.part(AssignmentP).lit_is_unk(*unit) {
                enqueue_assignment(ctx.borrow(), *unit, Reason::Unit);
            } else if ctx.part(AssignmentP).lit_is_false(*unit) {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            }
        }
        [lit_0, lit_1] => {
            if !ctx.part(BinaryClausesP).contains([*lit_0, *lit_1]) {
                ctx.part_mut(BinaryClausesP)
                    .add_binary_clause([*lit_0, *lit_1]);
            }
        }
        _ => {
            let mut header = ClauseHeader::new();
            header.set_tier(Tier::Irred);
            let cref = db::add_clause(ctx.borrow(), header, lits);
            occ.add(lits, cref);
        }
    }
}

/// Restore an eliminated variable by re-adding its logged clauses.
///
/// Needed when a later solve call assumes a variable that was eliminated earlier.
pub fn restore_var(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut SolverStateP,
        mut SubsumerP,
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    var: Var,
) {
    let entry = match ctx.part_mut(SubsumerP).take_eliminated(var) {
        Some(entry) => entry,
        None => return,
    };

    ctx.part_mut(VariablesP).set_free(var);
    decision::make_available(ctx.borrow(), var);

    for clause in entry.clauses {
        match clause.len() {
            0 => ctx.part_mut(SolverStateP).sat_state = SatState::Unsat,
            1 => {
                if ctx.part(AssignmentP).lit_is_unk(clause[0]) {
                    enqueue_assignment(ctx.borrow(), clause[0], Reason::Unit);
                } else if ctx.part(AssignmentP).lit_is_false(clause[0]) {
                    ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                }
            }
            2 => {
                if !ctx.part(BinaryClausesP).contains([clause[0], clause[1]]) {
                    ctx.part_mut(BinaryClausesP)
                        .add_binary_clause([clause[0], clause[1]]);
                }
            }
            _ => {
                let mut header = ClauseHeader::new();
                header.set_tier(Tier::Irred);
                db::add_clause(ctx.borrow(), header, &clause);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use xsat_formula::lits;

    use crate::context::set_var_count;
    use crate::load::load_clause;

    use crate::clause::ClauseAlloc;
    use crate::clause::ClauseDb;

    fn live_clauses(alloc: &ClauseAlloc, db: &ClauseDb) -> Vec<Vec<Lit>> {
        let mut clauses = vec![];
        for &cref in db.clauses_iter() {
            let clause = alloc.clause(cref);
            if clause.header().deleted() {
                continue;
            }
            let mut lits = clause.lits().to_vec();
            lits.sort();
            clauses.push(lits);
        }
        clauses.sort();
        clauses
    }

    #[test]
    fn subsumed_clause_is_removed() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        load_clause(ctx.borrow(), &lits![1, 2, 3]);
        load_clause(ctx.borrow(), &lits![1, 2, 3, 4]);
        load_clause(ctx.borrow(), &lits![1, 2, 5]);

        run(ctx.borrow());

        // Variable elimination may rewrite further, so only check that the subsumed clause is
        // gone before elimination kicks in on disjoint variables.
        let clauses = live_clauses(ctx.part(ClauseAllocP), ctx.part(ClauseDbP));
        for clause in clauses.iter() {
            let mut sorted = lits![1, 2, 3, 4].to_vec();
            sorted.sort();
            assert_ne!(clause, &sorted);
        }
    }

    #[test]
    fn self_subsumption_strengthens() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        // (1 v 2 v 3) and (1 v 2 v -3 v 4): nothing strengthens here.
        // (1 v 2 v 3) and (-1 v 2 v 3): resolving on 1 gives (2 v 3), subsuming both.
        load_clause(ctx.borrow(), &lits![1, 2, 3]);
        load_clause(ctx.borrow(), &lits![-1, 2, 3]);

        run(ctx.borrow());

        // Both ternary clauses collapse into the binary (2 v 3).
        assert!(ctx.part(BinaryClausesP).contains(lits![2, 3]));
        assert_eq!(
            live_clauses(ctx.part(ClauseAllocP), ctx.part(ClauseDbP)).len(),
            0
        );
    }

    #[test]
    fn elimination_logs_original_clauses() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        // Variable 1 has two positive and one negative occurrence; eliminating it replaces
        // three clauses with two resolvents.
        load_clause(ctx.borrow(), &lits![1, 2, 3]);
        load_clause(ctx.borrow(), &lits![1, -2, 4]);
        load_clause(ctx.borrow(), &lits![-1, 5, 6]);

        run(ctx.borrow());

        let eliminated: Vec<Var> = ctx
            .part(SubsumerP)
            .eliminated()
            .iter()
            .map(|entry| entry.var)
            .collect();

        assert!(eliminated.contains(&lits![1][0].var()));

        let entry = &ctx.part(SubsumerP).eliminated()[0];
        if entry.var == lits![1][0].var() {
            assert_eq!(entry.clauses.len(), 3);
        }

        assert!(!ctx.part(VariablesP).is_free(lits![1][0].var()));
    }
}
