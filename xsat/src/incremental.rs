//! Incremental solving.

use partial_ref::{partial, split_borrow, PartialRef};

use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, ClauseDbP, Context, ImplGraphP, IncrementalP,
    ProofP, SolverStateP, SubsumerP, TmpDataP, TrailP, VarReplacerP, VariablesP, VsidsP,
    WatchlistsP,
};
use crate::proof::{clause_hash, lit_hash, ClauseHash};
use crate::prop::{enqueue_assignment, full_restart, Reason};
use crate::state::SatState;
use crate::subsumer;
use crate::variables::VarState;
use xsat_formula::Lit;
use xsat_internal_proof::ProofStep;

/// Incremental solving.
#[derive(Default)]
pub struct Incremental {
    /// Assumptions as given by the user.
    user_assumptions: Vec<Lit>,
    /// Assumptions mapped through the replacement table, used for enqueuing.
    ///
    /// Assumptions implied by earlier ones are removed from this list during enqueuing, so it
    /// does not stay index aligned with `user_assumptions`; `mapped_from_user` keeps the full
    /// correspondence.
    assumptions: Vec<Lit>,
    /// Pairs of mapped and user assumption literals, used to translate failed cores back.
    mapped_from_user: Vec<(Lit, Lit)>,
    failed_core: Vec<Lit>,
    assumption_levels: usize,
}

impl Incremental {
    /// Current number of decision levels used for assumptions.
    pub fn assumption_levels(&self) -> usize {
        self.assumption_levels
    }

    /// Resets assumption_levels to zero on a full restart.
    pub fn full_restart(&mut self) {
        self.assumption_levels = 0;
    }

    /// Subset of assumptions that made the formula unsatisfiable.
    pub fn failed_core(&self) -> &[Lit] {
        &self.failed_core
    }

    /// Currently active assumptions, as given by the user.
    pub fn assumptions(&self) -> &[Lit] {
        &self.user_assumptions
    }

    /// Variables of the currently active assumptions after replacement mapping.
    pub fn assumption_vars(&self) -> impl Iterator<Item = xsat_formula::Var> + '_ {
        self.assumptions.iter().map(|lit| lit.var())
    }
}

/// Return type of [`enqueue_assumption`].
pub enum EnqueueAssumption {
    Done,
    Enqueued,
    Conflict,
}

/// Change the currently active assumptions.
///
/// Assumptions over eliminated variables restore those variables first; assumptions over replaced
/// variables are enqueued through their representative.
pub fn set_assumptions<'a>(
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
        mut TrailP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    assumptions: &[Lit],
) {
    full_restart(ctx.borrow());

    let state = ctx.part_mut(SolverStateP);

    state.sat_state = match state.sat_state {
        SatState::Unsat => SatState::Unsat,
        SatState::Sat | SatState::UnsatUnderAssumptions | SatState::Unknown => SatState::Unknown,
    };

    for &lit in assumptions {
        if ctx.part(VariablesP).state(lit.var()) == VarState::Eliminated {
            subsumer::restore_var(ctx.borrow(), lit.var());
        }
    }

    {
        let mut ctx = ctx.borrow();
        let (incremental, ctx) = ctx.split_part_mut(IncrementalP);
        let variables = ctx.part(VariablesP);

        incremental.user_assumptions.clear();
        incremental.user_assumptions.extend_from_slice(assumptions);

        incremental.assumptions.clear();
        incremental.mapped_from_user.clear();
        for &lit in assumptions {
            let mapped = match variables.state(lit.var()) {
                VarState::Replaced(replacement) => replacement ^ lit.is_negative(),
                _ => lit,
            };
            incremental.assumptions.push(mapped);
            incremental.mapped_from_user.push((mapped, lit));
        }
    }

    if ctx.part(ProofP).incremental_steps_in_proof() {
        let (incremental, mut ctx) = ctx.split_part(IncrementalP);
        ctx.part_mut(ProofP).add_step(&ProofStep::Assumptions {
            assumptions: &incremental.assumptions,
        });
    }
}

/// Enqueue another assumption if possible.
///
/// Returns whether an assumption was enqueued, whether no assumptions are left or whether the
/// assumptions result in a conflict.
pub fn enqueue_assumption<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ProofP<'a>,
        mut TmpDataP,
        mut TrailP,
        ClauseAllocP,
    ),
) -> EnqueueAssumption {
    while let Some(&assumption) = ctx
        .part(IncrementalP)
        .assumptions
        .get(ctx.part(TrailP).current_level())
    {
        match ctx.part(AssignmentP).lit_value(assumption) {
            Some(false) => {
                analyze_assumption_conflict(ctx.borrow(), assumption);
                return EnqueueAssumption::Conflict;
            }
            Some(true) => {
                // The next assumption is already implied by other assumptions so we can remove it.
                let level = ctx.part(TrailP).current_level();
                let incremental = ctx.part_mut(IncrementalP);
                incremental.assumptions.swap_remove(level);
            }
            None => {
                ctx.part_mut(TrailP).new_decision_level();
                enqueue_assignment(ctx.borrow(), assumption, Reason::Unit);
                let (incremental, ctx) = ctx.split_part_mut(IncrementalP);
                incremental.assumption_levels = ctx.part(TrailP).current_level();
                return EnqueueAssumption::Enqueued;
            }
        }
    }
    EnqueueAssumption::Done
}

/// Analyze a conflicting set of assumptions.
///
/// Compute a set of incompatible assumptions given an assumption that is incompatible with the
/// assumptions enqueued so far. Walks the implication graph backwards from the conflicting
/// assumption, collecting the assumptions reached and the hashes of the clauses resolved on.
fn analyze_assumption_conflict<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut IncrementalP,
        mut ProofP<'a>,
        mut TmpDataP,
        ClauseAllocP,
        ImplGraphP,
        TrailP,
    ),
    assumption: Lit,
) {
    split_borrow!(lit_ctx = &(ClauseAllocP) ctx);

    let (incremental, mut ctx) = ctx.split_part_mut(IncrementalP);
    let (tmp, mut ctx) = ctx.split_part_mut(TmpDataP);

    let flags = &mut tmp.flags;

    let hashes_required = ctx.part(ProofP).incremental_steps_in_proof();
    let mut hashes: Vec<ClauseHash> = vec![];

    let mut mapped_core = vec![assumption];

    flags[assumption.index()] = true;
    let mut flag_count = 1;

    for &lit in ctx.part(TrailP).trail().iter().rev() {
        if flags[lit.index()] {
            flags[lit.index()] = false;
            flag_count -= 1;

            match ctx.part(ImplGraphP).reason(lit.var()) {
                Reason::Unit => {
                    if ctx.part(ImplGraphP).level(lit.var()) > 0 {
                        mapped_core.push(lit);
                    }
                }
                reason => {
                    let reason_lits = reason.lits(&lit_ctx);
                    if hashes_required {
                        hashes.push(clause_hash(reason_lits) ^ lit_hash(lit));
                    }
                    for &reason_lit in reason_lits {
                        // Level 0 literals are implied regardless of the assumptions and are
                        // not tracked, which also keeps all flags reachable through the trail.
                        if !flags[reason_lit.index()]
                            && ctx.part(ImplGraphP).level(reason_lit.var()) > 0
                        {
                            flags[reason_lit.index()] = true;
                            flag_count += 1;
                        }
                    }
                }
            }

            if flag_count == 0 {
                break;
            }
        }
    }

    // Hashes were collected in reverse propagation order.
    hashes.reverse();

    // Translate the core back to the user's assumption literals.
    incremental.failed_core.clear();
    for &(mapped, user_lit) in incremental.mapped_from_user.iter() {
        if mapped_core
            .iter()
            .any(|&core_lit| core_lit.var() == mapped.var())
        {
            incremental.failed_core.push(user_lit);
        }
    }

    if hashes_required {
        ctx.part_mut(ProofP).add_step(&ProofStep::FailedAssumptions {
            failed_core: &mapped_core,
            propagation_hashes: &hashes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::{bool, prelude::*};

    use partial_ref::IntoPartialRefMut;

    use crate::cdcl::conflict_step;
    use crate::context::{set_var_count, SolverStateP};
    use crate::load::load_clause;
    use crate::state::SatState;

    use xsat_formula::test::conditional_pigeon_hole;

    proptest! {
        #[test]
        fn pigeon_hole_unsat_assumption_core(
            (enable_row, columns, formula) in conditional_pigeon_hole(1..5usize, 1..5usize),
            chain in bool::ANY,
        ) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            set_var_count(ctx.borrow(), formula.var_count());

            for clause in formula.iter() {
                load_clause(ctx.borrow(), clause);
            }

            if chain {
                for (&a, &b) in enable_row.iter().zip(enable_row.iter().skip(1)) {
                    load_clause(ctx.borrow(), &[!a, b]);
                }
            }

            while ctx.part(SolverStateP).sat_state == SatState::Unknown {
                conflict_step(ctx.borrow());
            }

            prop_assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Sat);

            set_assumptions(ctx.borrow(), &enable_row);

            prop_assert_eq!(ctx.part(SolverStateP).sat_state, SatState::Unknown);

            while ctx.part(SolverStateP).sat_state == SatState::Unknown {
                conflict_step(ctx.borrow());
            }

            prop_assert_eq!(ctx.part(SolverStateP).sat_state, SatState::UnsatUnderAssumptions);

            let mut candidates = ctx.part(IncrementalP).failed_core().to_owned();
            let mut core: Vec<Lit> = vec![];

            loop {
                set_assumptions(ctx.borrow(), &candidates[0..candidates.len() - 1]);

                while ctx.part(SolverStateP).sat_state == SatState::Unknown {
                    conflict_step(ctx.borrow());
                }

                match ctx.part(SolverStateP).sat_state {
                    SatState::Unknown => unreachable!(),
                    SatState::Unsat => break,
                    SatState::Sat => {
                        let skipped = *candidates.last().unwrap();
                        core.push(skipped);
                        load_clause(ctx.borrow(), &[skipped]);
                    },
                    SatState::UnsatUnderAssumptions => {
                        candidates = ctx.part(IncrementalP).failed_core().to_owned();
                    }
                }
            }
            if chain {
                prop_assert_eq!(core.len(), 1);
            } else {
                prop_assert_eq!(core.len(), columns + 1);
            }
        }
    }
}
