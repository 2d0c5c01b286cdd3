//! Unit propagation.
use partial_ref::{partial, PartialRef};

use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, Context, ImplGraphP, TrailP, WatchlistsP,
    XorClausesP,
};

pub mod assignment;
pub mod binary;
pub mod graph;
pub mod long;
pub mod watch;
pub mod xor;

pub use assignment::{backtrack, enqueue_assignment, full_restart, restart, Assignment, Trail};
pub use graph::{Conflict, ImplGraph, ImplNode, Reason};
pub use watch::{Watch, Watchlists};

use binary::propagate_binary;
use long::propagate_long;
use xor::propagate_xor;

/// Propagate all literals currently queued on the trail.
///
/// Processes the trail's propagation queue until it is empty or a conflict is found via binary,
/// long or XOR clauses.
pub fn propagate(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
        mut ClauseAllocP,
        mut XorClausesP,
        BinaryClausesP,
    ),
) -> Result<(), Conflict> {
    loop {
        let lit = match ctx.part_mut(TrailP).pop_queue() {
            Some(lit) => lit,
            None => return Ok(()),
        };

        propagate_binary(ctx.borrow(), lit)?;
        propagate_long(ctx.borrow(), lit)?;
        propagate_xor(ctx.borrow(), lit)?;
    }
}
