//! Database for long clauses.
use partial_ref::{partial, PartialRef};

use super::{header::HEADER_LEN, ClauseAlloc, ClauseHeader, ClauseRef};

use crate::context::{ClauseAllocP, ClauseDbP, Context, ImplGraphP, WatchlistsP};
use crate::prop::Reason;
use xsat_formula::Lit;

use std::mem::transmute;

/// Partitions of the clause database.
///
/// The long clauses are partitioned into 4 [`Tier`]s. This follows the approach described by
/// Chanseok Oh in ["Between SAT and UNSAT: The Fundamental Difference in CDCL
/// SAT"](https://doi.org/10.1007/978-3-319-24318-4_23), section 4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Tier {
    Irred = 0,
    Core = 1,
    Mid = 2,
    Local = 3,
}

impl Tier {
    /// Total number of tiers.
    pub const fn count() -> usize {
        4
    }

    /// Cast an index into the corresponding tier.
    pub unsafe fn from_index(index: usize) -> Tier {
        debug_assert!(index < Tier::count());
        transmute(index as u8)
    }
}

#[derive(Default)]
/// Database for long clauses.
///
/// Removal of clauses from the `clauses` and the `by_tier` fields can be delayed. The clause
/// header's deleted and tier fields need to be checked when iterating over these. `by_tier` may
/// also contain duplicate entries.
pub struct ClauseDb {
    /// May contain deleted clauses, see above
    pub(super) clauses: Vec<ClauseRef>,
    /// May contain deleted and moved clauses, see above
    pub(super) by_tier: [Vec<ClauseRef>; Tier::count()],
    /// These counts should always be up to date
    pub(super) count_by_tier: [usize; Tier::count()],
    /// Size of deleted but not collected clauses
    pub(super) garbage_size: usize,
}

impl ClauseDb {
    /// The number of long clauses of a given tier.
    pub fn count_by_tier(&self, tier: Tier) -> usize {
        self.count_by_tier[tier as usize]
    }

    /// Iterator over all clauses in the database.
    ///
    /// May yield deleted clauses, the caller has to check the clause header.
    pub fn clauses_iter(&self) -> impl Iterator<Item = &ClauseRef> {
        self.clauses.iter()
    }
}

/// Add a long clause to the database.
///
/// The clause is watched at its first two literals, which therefore have to satisfy the watchlist
/// invariant described in [`crate::prop::watch`].
pub fn add_clause(
    mut ctx: partial!(Context, mut ClauseDbP, mut ClauseAllocP, mut WatchlistsP),
    header: ClauseHeader,
    lits: &[Lit],
) -> ClauseRef {
    let tier = header.tier();

    let cref = ctx.part_mut(ClauseAllocP).add_clause(header, lits);

    let db = ctx.part_mut(ClauseDbP);

    db.clauses.push(cref);
    db.by_tier[tier as usize].push(cref);
    db.count_by_tier[tier as usize] += 1;

    if ctx.part(WatchlistsP).enabled() {
        ctx.part_mut(WatchlistsP)
            .watch_clause(cref, [lits[0], lits[1]]);
    }

    cref
}

/// Change the tier of a long clause.
///
/// This is a noop for a clause already of the specified tier.
pub fn set_clause_tier(
    mut ctx: partial!(Context, mut ClauseDbP, mut ClauseAllocP),
    cref: ClauseRef,
    tier: Tier,
) {
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let db = ctx.part_mut(ClauseDbP);

    let old_tier = alloc.header(cref).tier();
    if old_tier != tier {
        db.count_by_tier[old_tier as usize] -= 1;
        db.count_by_tier[tier as usize] += 1;

        alloc.header_mut(cref).set_tier(tier);
        db.by_tier[tier as usize].push(cref);
    }
}

/// Remove the watches of an attached long clause.
///
/// Part of the detach protocol: callers that rewrite the first two literals of a clause must
/// detach it at the pre-mutation positions, mutate, and then [`attach_clause`] it again.
pub fn detach_clause(
    mut ctx: partial!(Context, mut WatchlistsP, ClauseAllocP),
    cref: ClauseRef,
) {
    let (alloc, mut ctx) = ctx.split_part(ClauseAllocP);
    let lits = alloc.clause(cref).lits();
    let watchlists = ctx.part_mut(WatchlistsP);
    watchlists.remove_watch(!lits[0], cref);
    watchlists.remove_watch(!lits[1], cref);
}

/// Watch an unattached long clause at its first two literals.
pub fn attach_clause(
    mut ctx: partial!(Context, mut WatchlistsP, ClauseAllocP),
    cref: ClauseRef,
) {
    let (alloc, mut ctx) = ctx.split_part(ClauseAllocP);
    let lits = alloc.clause(cref).lits();
    ctx.part_mut(WatchlistsP)
        .watch_clause(cref, [lits[0], lits[1]]);
}

/// Detach and unconditionally delete a long clause.
pub fn detach_and_delete_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
    cref: ClauseRef,
) {
    detach_clause(ctx.borrow(), cref);
    delete_clause(ctx.borrow(), cref);
}

/// Mark a clause that is not registered in the clause database as deleted.
///
/// XOR clauses live in the clause allocator but are tracked by
/// [`XorClauses`](crate::xor::XorClauses) instead of the `ClauseDb`, so deleting them only needs
/// to account for the garbage they leave in the allocator.
pub fn delete_unregistered_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP),
    cref: ClauseRef,
) {
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let db = ctx.part_mut(ClauseDbP);

    let header = alloc.header_mut(cref);

    debug_assert!(!header.deleted(), "delete for already deleted clause");

    header.set_deleted(true);
    db.garbage_size += header.len() + HEADER_LEN;
}

/// Unconditionally delete a long clause from the database.
///
/// Panics if the clause is currently the reason for a propagated assignment. Use
/// [`try_delete_clause`] when that is possible.
pub fn delete_clause(mut ctx: partial!(Context, mut ClauseDbP, mut ClauseAllocP), cref: ClauseRef) {
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let db = ctx.part_mut(ClauseDbP);

    let header = alloc.header_mut(cref);

    debug_assert!(
        !header.deleted(),
        "delete_clause for already deleted clause"
    );

    header.set_deleted(true);

    db.count_by_tier[header.tier() as usize] -= 1;

    db.garbage_size += header.len() + HEADER_LEN;
}

/// Delete a long clause unless it is locked as the reason for a propagated assignment.
///
/// Returns whether the clause was deleted.
pub fn try_delete_clause(
    mut ctx: partial!(Context, mut ClauseDbP, mut ClauseAllocP, ImplGraphP),
    cref: ClauseRef,
) -> bool {
    let locked = {
        let (alloc, ctx) = ctx.split_part(ClauseAllocP);
        let asserted_lit = alloc.clause(cref).lits()[0];
        ctx.part(ImplGraphP).reason(asserted_lit.var()) == &Reason::Long(cref)
    };

    if locked {
        false
    } else {
        delete_clause(ctx.borrow(), cref);
        true
    }
}

/// Remove clauses for which `keep` returns `false` from the database.
///
/// `keep` is called with the clause allocator and a reference to every non-deleted clause. Already
/// deleted clauses are skipped without calling `keep`.
pub fn filter_clauses(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP),
    mut keep: impl FnMut(&mut ClauseAlloc, ClauseRef) -> bool,
) {
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let db = ctx.part_mut(ClauseDbP);

    let ClauseDb {
        by_tier,
        count_by_tier,
        garbage_size,
        ..
    } = db;

    for tier_clauses in by_tier.iter_mut() {
        tier_clauses.retain(|&cref| {
            if alloc.header(cref).deleted() {
                return false;
            }

            if keep(alloc, cref) {
                true
            } else {
                let header = alloc.header_mut(cref);
                header.set_deleted(true);
                count_by_tier[header.tier() as usize] -= 1;
                *garbage_size += header.len() + HEADER_LEN;
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;
    use proptest::*;

    use xsat_formula::cnf::strategy::*;
    use xsat_formula::cnf_formula;

    #[test]
    fn set_tiers_and_deletes() {
        let mut ctx = Context::default();

        let mut ctx = ctx.into_partial_ref_mut();

        crate::context::set_var_count(ctx.borrow(), 16);

        let clauses = cnf_formula![
            1, 2, 3;
            4, -5, 6;
            -2, 3, -4;
            -3, 5, 2, 7, 5;
        ];

        let tiers = vec![Tier::Irred, Tier::Core, Tier::Mid, Tier::Local];
        let new_tiers = vec![Tier::Irred, Tier::Local, Tier::Local, Tier::Core];

        let mut crefs = vec![];

        for (clause, &tier) in clauses.iter().zip(tiers.iter()) {
            let mut header = ClauseHeader::new();
            header.set_tier(tier);
            let cref = add_clause(ctx.borrow(), header, clause);
            crefs.push(cref);
        }

        for (&cref, &tier) in crefs.iter().rev().zip(new_tiers.iter().rev()) {
            set_clause_tier(ctx.borrow(), cref, tier);
        }

        // We only check presence, as deletion from these lists is delayed
        assert!(ctx.part(ClauseDbP).by_tier[Tier::Irred as usize].contains(&crefs[0]));
        assert!(ctx.part(ClauseDbP).by_tier[Tier::Core as usize].contains(&crefs[3]));
        assert!(ctx.part(ClauseDbP).by_tier[Tier::Local as usize].contains(&crefs[1]));
        assert!(ctx.part(ClauseDbP).by_tier[Tier::Local as usize].contains(&crefs[2]));

        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Irred), 1);
        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Core), 1);
        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Mid), 0);
        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Local), 2);

        delete_clause(ctx.borrow(), crefs[0]);
        delete_clause(ctx.borrow(), crefs[2]);

        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Irred), 0);
        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Core), 1);
        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Mid), 0);
        assert_eq!(ctx.part(ClauseDbP).count_by_tier(Tier::Local), 1);
    }

    proptest! {
        #[test]
        fn garbage_collection(
            input_a in cnf_formula(1..100usize, 500..1000, 3..30),
            input_b in cnf_formula(1..100usize, 0..500, 3..30),
        ) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            crate::context::set_var_count(
                ctx.borrow(),
                std::cmp::max(input_a.var_count(), input_b.var_count()),
            );

            let mut crefs_a = vec![];
            let mut crefs_b = vec![];

            for lits in input_a.iter() {
                let header = ClauseHeader::new();
                let cref = add_clause(ctx.borrow(), header, lits);
                crefs_a.push(cref);
            }

            for lits in input_b.iter() {
                let header = ClauseHeader::new();
                let cref = add_clause(ctx.borrow(), header, lits);
                crefs_b.push(cref);
            }

            for cref in crefs_a {
                delete_clause(ctx.borrow(), cref);
                prop_assert!(ctx.part(ClauseDbP).garbage_size > 0);
                crate::clause::gc::collect_garbage(ctx.borrow());
            }

            prop_assert!(
                ctx.part(ClauseDbP).garbage_size * 2 < ctx.part(ClauseAllocP).buffer_size()
            );

            for (lits, &cref) in input_b.iter().zip(crefs_b.iter()) {
                prop_assert_eq!(ctx.part(ClauseAllocP).clause(cref).lits(), lits);
            }
        }
    }
}
