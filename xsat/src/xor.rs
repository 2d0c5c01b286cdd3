//! Storage and reasoning for XOR clauses.
//!
//! An XOR clause constrains the parity of a set of variables: the values of the variables have to
//! sum to the clause's rhs bit over GF(2). XOR clauses share the clause allocator with long CNF
//! clauses and are flagged through [`ClauseHeader::is_xor`]. The constraint is fully described by
//! the *variable* set and the header's rhs bit; the signs of the stored literals are scratch
//! space. Whenever an XOR clause propagates or conflicts, the propagator rewrites the signs so the
//! literal array is the clause's CNF image under the current assignment, which is exactly what
//! conflict analysis needs from a reason or conflict clause.
//!
//! XOR clauses are not registered in the [`ClauseDb`](crate::clause::ClauseDb). They are tracked
//! here, watched by *variable* instead of by literal, and cleaned, rewritten and summed by the
//! inprocessing passes in this module:
//!
//! * [`find_xors`] recovers XOR constraints that were encoded into CNF clauses.
//! * [`conglomerate`] sums pairs of XOR clauses sharing a variable, turning short sums into
//!   equivalences, units or a top level contradiction.
//! * [`gauss`] maintains packed bit matrices over disjoint groups of XOR clauses and performs
//!   incremental Gaussian elimination during search.

use partial_ref::{partial, PartialRef};

use rustc_hash::{FxHashMap, FxHashSet};

use xsat_formula::{Lit, Var};

use crate::clause::{db, ClauseHeader, ClauseRef, Tier};
use crate::context::{
    AssignmentP, ClauseAllocP, ClauseDbP, Context, GaussP, ImplGraphP, SolverConfigP, SolverStateP,
    TmpDataP, TrailP, VarReplacerP, WatchlistsP, XorClausesP,
};
use crate::prop::{enqueue_assignment, Reason};
use crate::state::SatState;
use crate::var_replacer;

pub mod gauss;

pub use gauss::Gauss;

/// XOR clause storage and watches.
#[derive(Default)]
pub struct XorClauses {
    /// May contain deleted clauses, which are skipped and dropped during the next cleaning pass.
    clauses: Vec<ClauseRef>,
    /// Watches by variable. Every live XOR clause is watched by the variables of its first two
    /// literals.
    watches: Vec<Vec<ClauseRef>>,
    /// Number of XOR clauses each variable occurs in.
    ///
    /// Variables occurring in XOR clauses are not candidates for variable elimination.
    occ_count: Vec<usize>,
}

impl XorClauses {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.watches.resize(count, vec![]);
        self.occ_count.resize(count, 0);
    }

    /// All stored XOR clauses, including deleted ones.
    pub fn clauses(&self) -> &[ClauseRef] {
        &self.clauses
    }

    /// Replace the clause list after a pass rewrote it.
    pub(crate) fn set_clauses(&mut self, clauses: Vec<ClauseRef>) {
        self.clauses = clauses;
    }

    /// Take the clause list, leaving an empty one.
    pub(crate) fn take_clauses(&mut self) -> Vec<ClauseRef> {
        std::mem::replace(&mut self.clauses, vec![])
    }

    /// Watches of a variable.
    pub fn watched_by_mut(&mut self, var: Var) -> &mut Vec<ClauseRef> {
        &mut self.watches[var.index()]
    }

    /// Make a variable watch an XOR clause.
    pub fn add_watch(&mut self, var: Var, cref: ClauseRef) {
        self.watches[var.index()].push(cref);
    }

    /// Whether a variable occurs in any XOR clause.
    pub fn var_occurs(&self, var: Var) -> bool {
        self.occ_count[var.index()] != 0
    }

    /// Rebuild the per variable occurrence counts and watches from the clause list.
    ///
    /// The first two literal positions of each live clause become the watched variables, so
    /// callers have to make sure those positions satisfy the watched variable invariant.
    pub fn rebuild_watches(&mut self, alloc: &crate::clause::ClauseAlloc) {
        for list in self.watches.iter_mut() {
            list.clear();
        }
        for count in self.occ_count.iter_mut() {
            *count = 0;
        }

        for &cref in self.clauses.iter() {
            if alloc.header(cref).deleted() {
                continue;
            }
            let lits = alloc.clause(cref).lits();
            self.watches[lits[0].index()].push(cref);
            self.watches[lits[1].index()].push(cref);
            for &lit in lits {
                self.occ_count[lit.index()] += 1;
            }
        }
    }
}

/// Canonicalize the variable set of an XOR constraint.
///
/// Absorbs literal signs into the rhs, sorts by variable and cancels duplicate pairs
/// (`v + v = 0`). Returns the canonical rhs. `vars` is the output buffer for the canonical
/// variable set.
pub fn normalize_xor(lits: &[Lit], rhs: bool, vars: &mut Vec<Var>) -> bool {
    let mut rhs = rhs;

    vars.clear();
    for &lit in lits {
        rhs ^= lit.is_negative();
        vars.push(lit.var());
    }
    vars.sort_unstable();

    let mut write = 0;
    let mut read = 0;
    while read < vars.len() {
        if read + 1 < vars.len() && vars[read] == vars[read + 1] {
            read += 2;
        } else {
            vars[write] = vars[read];
            write += 1;
            read += 1;
        }
    }
    vars.truncate(write);

    rhs
}

/// Add a canonicalized XOR clause of three or more variables to the store.
///
/// The variable set has to be sorted, duplicate free and free of assigned, replaced or eliminated
/// variables.
pub fn add_xor_clause(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut GaussP,
        mut TmpDataP,
        mut XorClausesP,
    ),
    vars: &[Var],
    rhs: bool,
) -> ClauseRef {
    debug_assert!(vars.len() >= 3);
    debug_assert!(vars.windows(2).all(|pair| pair[0] < pair[1]));

    let (tmp, mut ctx) = ctx.split_part_mut(TmpDataP);
    tmp.lits.clear();
    tmp.lits.extend(vars.iter().map(|&var| var.positive()));

    let mut header = ClauseHeader::new();
    header.set_tier(Tier::Irred);
    header.set_is_xor(true);
    header.set_xor_rhs(rhs);

    let cref = ctx.part_mut(ClauseAllocP).add_clause(header, &tmp.lits);

    let xor_clauses = ctx.part_mut(XorClausesP);
    xor_clauses.clauses.push(cref);
    xor_clauses.add_watch(vars[0], cref);
    xor_clauses.add_watch(vars[1], cref);
    for &var in vars {
        xor_clauses.occ_count[var.index()] += 1;
    }

    ctx.part_mut(GaussP).invalidate();

    cref
}

/// Remove assigned variables from all XOR clauses.
///
/// Requires decision level 0 with all assignments propagated. Assigned variables are folded into
/// the rhs bit. Clauses shrinking below three variables are dispatched: two variables turn into an
/// equivalence for the variable replacer, one into a unit assignment, zero into a contradiction or
/// a satisfied constraint. Watches of the surviving clauses are rebuilt.
pub fn clean_xor_clauses(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut VarReplacerP,
        mut XorClausesP,
    ),
) {
    debug_assert_eq!(ctx.part(TrailP).current_level(), 0);

    let mut clauses = ctx.part_mut(XorClausesP).take_clauses();
    let mut changed = false;

    clauses.retain(|&cref| {
        if ctx.part(ClauseAllocP).header(cref).deleted() {
            changed = true;
            return false;
        }

        let mut assigned_parity = false;
        let mut has_assigned = false;
        {
            let mut ctx: partial!(Context, ClauseAllocP, AssignmentP) = ctx.borrow();
            let (alloc, ctx) = ctx.split_part(ClauseAllocP);
            let assignment = ctx.part(AssignmentP);
            for &lit in alloc.clause(cref).lits() {
                if let Some(value) = assignment.var_value(lit.var()) {
                    assigned_parity ^= value;
                    has_assigned = true;
                }
            }
        }

        if !has_assigned {
            return true;
        }

        changed = true;

        // Drop the assigned variables and fold their parity into the rhs.
        let new_rhs;
        {
            let mut ctx = ctx.borrow();
            let (alloc, ctx) = ctx.split_part_mut(ClauseAllocP);
            let assignment = ctx.part(AssignmentP);
            let clause = alloc.clause_mut(cref);

            let mut write = 0;
            for read in 0..clause.lits().len() {
                let lit = clause.lits()[read];
                if assignment.var_value(lit.var()).is_none() {
                    clause.lits_mut()[write] = lit.var().positive();
                    write += 1;
                }
            }
            new_rhs = clause.header().xor_rhs() ^ assigned_parity;
            clause.header_mut().set_xor_rhs(new_rhs);
            clause.header_mut().set_len(write);
        }

        let remaining = ctx.part(ClauseAllocP).clause(cref).lits().len();

        match remaining {
            0 => {
                if new_rhs {
                    ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                }
                db::delete_unregistered_clause(ctx.borrow(), cref);
                false
            }
            1 => {
                let var = ctx.part(ClauseAllocP).clause(cref).lits()[0].var();
                enqueue_assignment(ctx.borrow(), var.lit(new_rhs), Reason::Unit);
                db::delete_unregistered_clause(ctx.borrow(), cref);
                false
            }
            2 => {
                let lits = {
                    let lits = ctx.part(ClauseAllocP).clause(cref).lits();
                    [lits[0], lits[1]]
                };
                // a + b = rhs is the equivalence a = b + rhs.
                var_replacer::request(ctx.borrow(), lits[0], lits[1] ^ new_rhs);
                db::delete_unregistered_clause(ctx.borrow(), cref);
                false
            }
            _ => true,
        }
    });

    ctx.part_mut(XorClausesP).set_clauses(clauses);

    if changed {
        rebuild_xor_occ_and_watches(ctx.borrow());
        ctx.part_mut(GaussP).invalidate();
    }
}

/// Rebuild the per variable occurrence counts and watches from the clause list.
pub fn rebuild_xor_occ_and_watches(mut ctx: partial!(Context, mut XorClausesP, ClauseAllocP)) {
    let (xor_clauses, ctx) = ctx.split_part_mut(XorClausesP);
    xor_clauses.rebuild_watches(ctx.part(ClauseAllocP));
}

/// Recover XOR constraints from their CNF encoding.
///
/// A width `k` XOR constraint is encoded as the `2^(k-1)` clauses over its variables that have an
/// even number of negations (rhs true) or an odd number (rhs false). Clauses over the same
/// variable set are bucketed and the sign patterns of each parity are counted. Recovered clauses
/// are removed and replaced by a single XOR clause.
pub fn find_xors(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut TmpDataP,
        mut WatchlistsP,
        mut XorClausesP,
        SolverConfigP,
    ),
) -> usize {
    let max_width = ctx.part(SolverConfigP).xor_finder_max_width;

    // Bucket irredundant clauses by their sorted variable set, tracking the distinct sign
    // patterns seen together with the pattern's parity.
    let mut buckets: FxHashMap<Vec<Var>, Vec<(ClauseRef, u32, bool)>> = FxHashMap::default();

    {
        let mut ctx: partial!(Context, ClauseAllocP, ClauseDbP) = ctx.borrow();
        let (alloc, ctx) = ctx.split_part(ClauseAllocP);
        let db = ctx.part(ClauseDbP);

        for &cref in db.clauses_iter() {
            let header = alloc.header(cref);
            if header.deleted() || header.is_xor() || header.tier() != Tier::Irred {
                continue;
            }
            let lits = alloc.clause(cref).lits();
            if lits.len() > max_width {
                continue;
            }

            let mut vars: Vec<Var> = lits.iter().map(|lit| lit.var()).collect();
            vars.sort_unstable();

            let mut pattern = 0u32;
            let mut parity = false;
            for &lit in lits {
                let pos = vars.iter().position(|&var| var == lit.var()).unwrap();
                if lit.is_negative() {
                    pattern |= 1 << pos;
                    parity = !parity;
                }
            }

            buckets.entry(vars).or_default().push((cref, pattern, parity));
        }
    }

    let mut found = 0;

    for (vars, mut entries) in buckets {
        let width = vars.len();
        if width < 3 {
            continue;
        }
        let needed = 1usize << (width - 1);
        if entries.len() < needed {
            continue;
        }

        entries.sort_unstable_by_key(|&(_, pattern, _)| pattern);
        entries.dedup_by_key(|&mut (_, pattern, _)| pattern);

        for &rhs in &[true, false] {
            // rhs true needs all the even parity patterns, rhs false all the odd ones.
            let matching: Vec<ClauseRef> = entries
                .iter()
                .filter(|&&(_, _, parity)| parity != rhs)
                .map(|&(cref, _, _)| cref)
                .collect();

            if matching.len() == needed {
                for cref in matching {
                    db::detach_and_delete_clause(ctx.borrow(), cref);
                }
                add_xor_clause(ctx.borrow(), &vars, rhs);
                found += 1;
                break;
            }
        }
    }

    found
}

/// Sum pairs of XOR clauses sharing a variable.
///
/// For a variable `v` occurring in exactly two XOR clauses their sum over GF(2) eliminates `v`.
/// Only short sums are acted on: a two variable sum is an equivalence handed to the variable
/// replacer, a one variable sum forces an assignment and an empty sum with rhs true is a
/// contradiction. Longer sums are left alone, both summands stay in the store. A blocked set
/// prevents revisiting a variable within one pass.
pub fn conglomerate(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut VarReplacerP,
        ClauseAllocP,
        XorClausesP,
    ),
) -> usize {
    let mut var_to_xors: FxHashMap<Var, Vec<ClauseRef>> = FxHashMap::default();

    {
        let mut ctx: partial!(Context, ClauseAllocP, XorClausesP) = ctx.borrow();
        let (alloc, ctx) = ctx.split_part(ClauseAllocP);
        for &cref in ctx.part(XorClausesP).clauses() {
            if alloc.header(cref).deleted() {
                continue;
            }
            for &lit in alloc.clause(cref).lits() {
                var_to_xors.entry(lit.var()).or_default().push(cref);
            }
        }
    }

    let mut blocked: FxHashSet<Var> = FxHashSet::default();
    let mut sum_vars: Vec<Var> = vec![];
    let mut derived = 0;

    for (&var, crefs) in var_to_xors.iter() {
        if crefs.len() != 2 || blocked.contains(&var) {
            continue;
        }
        if ctx.part(SolverStateP).sat_state == SatState::Unsat {
            break;
        }

        let sum_rhs;
        {
            let alloc = ctx.part(ClauseAllocP);
            let first = alloc.clause(crefs[0]);
            let second = alloc.clause(crefs[1]);

            sum_vars.clear();
            sum_vars.extend(first.lits().iter().map(|lit| lit.var()));
            sum_vars.extend(second.lits().iter().map(|lit| lit.var()));
            sum_vars.sort_unstable();

            let mut write = 0;
            let mut read = 0;
            while read < sum_vars.len() {
                if read + 1 < sum_vars.len() && sum_vars[read] == sum_vars[read + 1] {
                    read += 2;
                } else {
                    sum_vars[write] = sum_vars[read];
                    write += 1;
                    read += 1;
                }
            }
            sum_vars.truncate(write);

            sum_rhs = first.header().xor_rhs() ^ second.header().xor_rhs();
        }

        match sum_vars.len() {
            0 => {
                if sum_rhs {
                    ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                }
            }
            1 => {
                let unit = sum_vars[0];
                if ctx.part(AssignmentP).var_value(unit).is_none() {
                    enqueue_assignment(ctx.borrow(), unit.lit(sum_rhs), Reason::Unit);
                    derived += 1;
                }
            }
            2 => {
                // a + b = rhs is the equivalence a = b + rhs.
                var_replacer::request(
                    ctx.borrow(),
                    sum_vars[0].positive(),
                    sum_vars[1].positive() ^ sum_rhs,
                );
                derived += 1;
            }
            _ => continue,
        }

        blocked.insert(var);
        blocked.extend(sum_vars.iter().cloned());
    }

    derived
}

#[cfg(test)]
mod tests {
    use super::*;

    use xsat_formula::{lits, vars};

    #[test]
    fn normalize_absorbs_signs_and_duplicates() {
        let mut vars_buf = vec![];

        let rhs = normalize_xor(&lits![3, -1, 2], true, &mut vars_buf);
        assert_eq!(rhs, false);
        assert_eq!(vars_buf, vars![1, 2, 3]);

        // v + v cancels, -v + v flips the rhs and cancels.
        let rhs = normalize_xor(&lits![2, 1, -1, 2, 3], false, &mut vars_buf);
        assert_eq!(rhs, true);
        assert_eq!(vars_buf, vars![3]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut first = vec![];
        let rhs_1 = normalize_xor(&lits![5, -2, 4, -2], true, &mut first);

        let relits: Vec<_> = first.iter().map(|&var| var.positive()).collect();
        let mut second = vec![];
        let rhs_2 = normalize_xor(&relits, rhs_1, &mut second);

        assert_eq!(rhs_1, rhs_2);
        assert_eq!(first, second);
    }
}
