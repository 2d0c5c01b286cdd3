//! Binary clauses.
//!
//! Binary clauses are not stored in the clause database. Instead each binary clause `(a v b)` is
//! represented by two mirrored implication entries, `b` in the list of `!a` and `a` in the list of
//! `!b`. This makes binary propagation a single indexed lookup and keeps the clause database free
//! of two literal clauses.

use partial_ref::{partial, PartialRef};

use xsat_formula::Lit;
use xsat_internal_proof::{DeleteClauseProof, ProofStep};

use crate::context::{AssignmentP, BinaryClausesP, Context, ProofP};

/// Binary clauses.
#[derive(Default)]
pub struct BinaryClauses {
    by_lit: Vec<Vec<Lit>>,
    count: usize,
}

impl BinaryClauses {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.by_lit.resize(count * 2, vec![]);
    }

    /// Add a binary clause.
    pub fn add_binary_clause(&mut self, lits: [Lit; 2]) {
        for i in 0..2 {
            self.by_lit[(!lits[i]).code()].push(lits[i ^ 1]);
        }
        self.count += 1;
    }

    /// Remove a binary clause, deleting both mirrored implication entries.
    ///
    /// Does nothing if the clause is not present.
    pub fn remove_binary_clause(&mut self, lits: [Lit; 2]) {
        let mut removed = true;
        for i in 0..2 {
            let list = &mut self.by_lit[(!lits[i]).code()];
            match list.iter().position(|&implied| implied == lits[i ^ 1]) {
                Some(pos) => {
                    list.swap_remove(pos);
                }
                None => removed = false,
            }
        }
        if removed {
            self.count -= 1;
        }
    }

    /// Implications of a given literal
    pub fn implied(&self, lit: Lit) -> &[Lit] {
        &self.by_lit[lit.code()]
    }

    /// Whether the given binary clause is present.
    pub fn contains(&self, lits: [Lit; 2]) -> bool {
        self.by_lit[(!lits[0]).code()].contains(&lits[1])
    }

    /// Number of binary clauses.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Invoke a closure for each stored binary clause.
    ///
    /// Each clause is reported once, even though it is stored as two mirrored entries.
    pub fn for_each_clause(&self, mut handler: impl FnMut([Lit; 2])) {
        for (code, implied_lits) in self.by_lit.iter().enumerate() {
            let lit = !Lit::from_code(code);
            for &implied in implied_lits.iter() {
                if lit < implied {
                    handler([lit, implied]);
                }
            }
        }
    }

    /// Remove all binary clauses.
    pub fn clear(&mut self) {
        for list in self.by_lit.iter_mut() {
            list.clear();
        }
        self.count = 0;
    }
}

/// Remove all binary clauses that contain an assigned variable.
///
/// Requires decision level 0 with all assignments propagated. At that point every binary clause
/// that contains an assigned variable is satisfied: a false literal in a binary clause would have
/// propagated its partner.
pub fn simplify_binary<'a>(
    mut ctx: partial!(Context<'a>, mut BinaryClausesP, mut ProofP<'a>, AssignmentP),
) {
    let (binary_clauses, mut ctx) = ctx.split_part_mut(BinaryClausesP);
    let (proof, ctx) = ctx.split_part_mut(ProofP);
    let assignment = ctx.part(AssignmentP);

    let mut removed = 0;

    for (code, implied_lits) in binary_clauses.by_lit.iter_mut().enumerate() {
        let lit = !Lit::from_code(code);
        let lit_assigned = assignment.var_value(lit.var()).is_some();

        implied_lits.retain(|&implied| {
            let retain = !lit_assigned && assignment.var_value(implied.var()).is_none();
            if !retain && lit < implied {
                removed += 1;
                proof.add_step(&ProofStep::DeleteClause {
                    clause: &[lit, implied],
                    proof: DeleteClauseProof::Satisfied,
                });
            }
            retain
        });
    }

    binary_clauses.count -= removed;
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use xsat_formula::lits;

    use crate::context::set_var_count;
    use crate::prop::{enqueue_assignment, Reason};

    #[test]
    fn add_remove_and_count() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        let binary_clauses = ctx.part_mut(BinaryClausesP);

        binary_clauses.add_binary_clause(lits![1, 2]);
        binary_clauses.add_binary_clause(lits![-2, 3]);
        assert_eq!(binary_clauses.count(), 2);
        assert!(binary_clauses.contains(lits![1, 2]));
        assert!(binary_clauses.contains(lits![2, 1]));

        binary_clauses.remove_binary_clause(lits![1, 2]);
        assert_eq!(binary_clauses.count(), 1);
        assert!(!binary_clauses.contains(lits![1, 2]));
        assert!(binary_clauses.contains(lits![-2, 3]));
    }

    #[test]
    fn simplify_removes_clauses_of_assigned_vars() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        set_var_count(ctx.borrow(), 10);

        ctx.part_mut(BinaryClausesP).add_binary_clause(lits![1, 2]);
        ctx.part_mut(BinaryClausesP).add_binary_clause(lits![3, 4]);
        ctx.part_mut(BinaryClausesP).add_binary_clause(lits![-1, 2]);

        enqueue_assignment(ctx.borrow(), lits![2][0], Reason::Unit);

        simplify_binary(ctx.borrow());

        let binary_clauses = ctx.part(BinaryClausesP);
        assert_eq!(binary_clauses.count(), 1);
        assert!(binary_clauses.contains(lits![3, 4]));

        let mut remaining = vec![];
        binary_clauses.for_each_clause(|lits| remaining.push(lits));
        assert_eq!(remaining, vec![lits![3, 4]]);
    }
}
