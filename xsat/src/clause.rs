//! Storage and management of long clauses (three or more literals).
//!
//! Unit and binary clauses are handled separately, see [`crate::binary`] and the top level
//! propagation and assignment logic.
use std::slice;

use xsat_formula::Lit;

mod activity;
mod alloc;
mod assess;
pub(crate) mod db;
mod gc;
mod header;
pub mod reduce;

pub use activity::{bump_clause, decay_clause_activities, ClauseActivity};
pub use alloc::{ClauseAlloc, ClauseRef};
pub use assess::assess_learned_clause;
pub use db::{
    add_clause, attach_clause, delete_clause, delete_unregistered_clause, detach_and_delete_clause,
    detach_clause, filter_clauses, set_clause_tier, try_delete_clause, ClauseDb, Tier,
};
pub use gc::collect_garbage;
pub use header::ClauseHeader;

use header::HEADER_LEN;

/// A long clause.
///
/// This is stored in a [`ClauseAlloc`] and thus must have a representation compatible with a slice
/// of [`xsat_formula::LitIdx`] values.
///
/// It would be nicer to use a DST struct with two members and `repr(C)`, but while that can be
/// declared in stable rust, it's almost impossible to work with.
#[repr(transparent)]
pub struct Clause {
    data: [xsat_formula::LitIdx],
}

impl Clause {
    /// The clause's header.
    pub fn header(&self) -> &ClauseHeader {
        unsafe {
            let header_ptr = self.data.as_ptr() as *const ClauseHeader;
            &*header_ptr
        }
    }

    /// Mutable reference to the clause's header.
    pub fn header_mut(&mut self) -> &mut ClauseHeader {
        unsafe {
            let header_ptr = self.data.as_mut_ptr() as *mut ClauseHeader;
            &mut *header_ptr
        }
    }

    /// The clause's literals.
    pub fn lits(&self) -> &[Lit] {
        unsafe {
            let lit_ptr = self.data.as_ptr().add(HEADER_LEN) as *const Lit;
            slice::from_raw_parts(lit_ptr, self.data.len() - HEADER_LEN)
        }
    }

    /// Mutable slice of the clause's literals.
    pub fn lits_mut(&mut self) -> &mut [Lit] {
        unsafe {
            let lit_ptr = self.data.as_mut_ptr().add(HEADER_LEN) as *mut Lit;
            slice::from_raw_parts_mut(lit_ptr, self.data.len() - HEADER_LEN)
        }
    }
}
