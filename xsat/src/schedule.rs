//! Scheduling of inprocessing and search steps.
//!
//! The schedule drives a loop of search until restart or budget, followed by an optional
//! inprocessing batch. Inprocessing always happens at decision level 0: the batch first settles
//! the clause stores into a cleaned, fully propagated state, then runs probing, subsumption and
//! elimination, XOR recovery and conglomeration, commits recorded equivalences and finally
//! rebuilds the Gaussian elimination matrices. Every pass is budgeted internally, leaves the
//! solver attached and level 0 consistent when its budget runs out, and is skipped while proof
//! generation is active if it cannot be expressed in the emitted proof.
use log::info;

use partial_ref::{partial, PartialRef};

use crate::cdcl::conflict_step;
use crate::clause::collect_garbage;
use crate::clause::reduce::{reduce_locals, reduce_mids};
use crate::clause::Tier;
use crate::config::RestartType;
use crate::context::{
    AnalyzeConflictP, AssignmentP, BinaryClausesP, ClauseActivityP, ClauseAllocP, ClauseDbP,
    Context, GaussP, ImplGraphP, IncrementalP, ProbeP, ProofP, ScheduleP, SolverConfigP,
    SolverStateP, SubsumerP, TmpDataP, TrailP, VarReplacerP, VariablesP, VsidsP, WatchlistsP,
    XorClausesP,
};
use crate::probe;
use crate::prop::{backtrack, propagate, restart};
use crate::simplify::{prove_units, simplify};
use crate::state::SatState;
use crate::subsumer;
use crate::xor;
use crate::xor::gauss;

mod luby;

use luby::LubySequence;

/// Scheduling of inprocessing and search steps.
#[derive(Default)]
pub struct Schedule {
    conflicts: u64,
    next_restart: u64,
    restarts: u64,
    luby: LubySequence,
    /// Short and long term exponential moving averages of learned clause glues.
    glue_ema_fast: f64,
    glue_ema_slow: f64,
    conflicts_since_restart: u64,
    /// Conflict count that triggers the next inprocessing batch.
    ///
    /// Zero initially, so the first batch runs before the first decision.
    next_inprocess: u64,
}

impl Schedule {
    /// Number of conflicts so far.
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }
}

/// Perform one step of the schedule.
///
/// Returns `false` when solving finished or was interrupted.
pub fn schedule_step<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseActivityP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ProbeP,
        mut ProofP<'a>,
        mut ScheduleP,
        mut SolverStateP,
        mut SubsumerP,
        mut TmpDataP,
        mut TrailP,
        mut VarReplacerP,
        mut VariablesP,
        mut VsidsP,
        mut WatchlistsP,
        mut XorClausesP,
        SolverConfigP,
    ),
) -> bool {
    if ctx.part(SolverStateP).sat_state != SatState::Unknown {
        return false;
    }
    if ctx.part(SolverStateP).interrupt_requested() {
        return false;
    }
    if ctx.part(ScheduleP).conflicts >= ctx.part(SolverConfigP).confl_limit {
        return false;
    }

    if ctx.part(SolverConfigP).verbosity > 0 {
        let schedule = ctx.part(ScheduleP);
        if schedule.conflicts > 0 && schedule.conflicts % 5000 == 0 {
            let restarts = schedule.restarts;
            let conflicts = schedule.conflicts;
            let db = ctx.part(ClauseDbP);
            let units = ctx.part(TrailP).top_level_trail_length();
            info!(
                "confl: {}k rest: {} vars: {} bin: {} irred: {} core: {} mid: {} local: {}",
                conflicts / 1000,
                restarts,
                ctx.part(AssignmentP).assignment().len() - units,
                ctx.part(BinaryClausesP).count(),
                db.count_by_tier(Tier::Irred),
                db.count_by_tier(Tier::Core),
                db.count_by_tier(Tier::Mid),
                db.count_by_tier(Tier::Local)
            );
        }
    }

    if ctx.part(ScheduleP).conflicts >= ctx.part(ScheduleP).next_inprocess {
        inprocess(ctx.borrow());

        let next = ctx.part(ScheduleP).conflicts + ctx.part(SolverConfigP).inprocess_interval;
        ctx.part_mut(ScheduleP).next_inprocess = next;

        if ctx.part(SolverStateP).sat_state != SatState::Unknown {
            return false;
        }
    }

    // Restarts, according to the configured policy.
    match ctx.part(SolverConfigP).restart_type {
        RestartType::Luby => {
            if ctx.part(ScheduleP).next_restart == ctx.part(ScheduleP).conflicts {
                restart(ctx.borrow());
                let scale = ctx.part(SolverConfigP).luby_restart_interval_scale;
                let schedule = ctx.part_mut(ScheduleP);
                schedule.restarts += 1;
                schedule.conflicts_since_restart = 0;
                schedule.next_restart += scale * schedule.luby.advance();
            }
        }
        RestartType::Glue => {
            let config = ctx.part(SolverConfigP);
            let schedule = ctx.part(ScheduleP);
            if schedule.conflicts_since_restart >= config.restart_glue_min_interval
                && schedule.glue_ema_fast > schedule.glue_ema_slow * config.restart_glue_margin
            {
                restart(ctx.borrow());
                let schedule = ctx.part_mut(ScheduleP);
                schedule.restarts += 1;
                schedule.conflicts_since_restart = 0;
                schedule.glue_ema_fast = schedule.glue_ema_slow;
            }
        }
    }

    // Clause database reductions; cleaning already happened in the inprocessing batch above.
    {
        let conflicts = ctx.part(ScheduleP).conflicts;
        let config = ctx.part(SolverConfigP);
        let reduce_locals_interval = config.reduce_locals_interval.max(1);
        let reduce_mids_interval = config.reduce_mids_interval.max(1);

        if conflicts > 0 && conflicts % reduce_locals_interval == 0 {
            reduce_locals(ctx.borrow());
        }
        if conflicts > 0 && conflicts % reduce_mids_interval == 0 {
            reduce_mids(ctx.borrow());
        }
    }

    collect_garbage(ctx.borrow());

    conflict_step(ctx.borrow());

    // Update the restart heuristic with the glue of the learned clause.
    let glue = ctx.part(SolverStateP).last_learned_glue as f64;
    let schedule = ctx.part_mut(ScheduleP);
    schedule.glue_ema_fast += (glue - schedule.glue_ema_fast) / 32.0;
    schedule.glue_ema_slow += (glue - schedule.glue_ema_slow) / 4096.0;
    schedule.conflicts += 1;
    schedule.conflicts_since_restart += 1;

    true
}

/// Run one inprocessing batch at decision level 0.
fn inprocess<'a>(
    mut ctx: partial!(
        Context<'a>,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut IncrementalP,
        mut ProbeP,
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
        SolverConfigP,
    ),
) {
    backtrack(ctx.borrow(), 0);
    ctx.part_mut(IncrementalP).full_restart();

    if !settle(ctx.borrow()) {
        return;
    }

    // Passes that rewrite the formula without emitting justifications are skipped while proofs
    // are generated.
    let proof_active = ctx.part(ProofP).is_active();

    if !proof_active {
        if ctx.part(SolverConfigP).enable_probing {
            probe::run(ctx.borrow());
            if !settle(ctx.borrow()) {
                return;
            }
        }

        subsumer::run(ctx.borrow());
        if !settle(ctx.borrow()) {
            return;
        }

        if ctx.part(SolverConfigP).enable_xor {
            xor::find_xors(ctx.borrow());
            xor::conglomerate(ctx.borrow());
            if !settle(ctx.borrow()) {
                return;
            }
        }
    }

    if ctx.part(SolverConfigP).enable_gauss
        && !proof_active
        && ctx.part(GaussP).needs_rebuild()
    {
        gauss::init_matrices(ctx.borrow());
        settle(ctx.borrow());
    }
}

/// Propagate, prove units and simplify until a fixed point at decision level 0.
///
/// Returns `false` when a top level conflict made the formula unsatisfiable.
fn settle<'a>(
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
) -> bool {
    loop {
        if ctx.part(SolverStateP).sat_state == SatState::Unsat {
            return false;
        }

        if propagate(ctx.borrow()).is_err() {
            // A conflict without decisions has no resolution.
            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            return false;
        }

        let new_unit = prove_units(ctx.borrow());

        if new_unit || ctx.part(VarReplacerP).has_pending() {
            simplify(ctx.borrow());

            if ctx.part(SolverStateP).sat_state == SatState::Unsat {
                return false;
            }

            if !ctx.part(TrailP).fully_propagated() || ctx.part(VarReplacerP).has_pending() {
                continue;
            }
        }

        return true;
    }
}
