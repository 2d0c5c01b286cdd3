//! Incremental Gaussian elimination over XOR clauses.
//!
//! The XOR clauses are partitioned into disjoint groups connected by shared variables. Each group
//! large enough to be worthwhile becomes a packed bit matrix with one column per variable and one
//! row per XOR clause. The matrices are brought into reduced row echelon form once when they are
//! built. During search, assignments of matrix variables are substituted into the rows
//! incrementally: the assigned column is cleared and its value folded into the row's rhs. A row
//! reducing to a single unset column propagates that variable, a row reducing to no columns with
//! rhs one is a conflict.
//!
//! Every row is kept in two forms. `orig` is only changed by row operations and describes the
//! implied XOR constraint the row stands for. `cur` additionally has the substituted columns
//! cleared. When a row propagates or conflicts, the CNF image of the `orig` form under the current
//! assignment is materialized as a regular redundant clause in the clause database, which lets
//! conflict analysis, clause locking and garbage collection treat Gaussian derivations exactly
//! like any other propagation.
//!
//! Backtracking support is snapshot based: every few decision levels the `cur` rows are copied
//! together with the length of the consumed trail prefix. Backtracking is detected lazily by
//! comparing the consumed position against the trail; the newest snapshot that is still a prefix
//! of the trail is restored and the trail is replayed from there.

use partial_ref::{partial, PartialRef};

use rustc_hash::FxHashMap;

use xsat_formula::{Lit, Var};

use crate::clause::{db, ClauseHeader, ClauseRef, Tier};
use crate::context::{
    AssignmentP, BinaryClausesP, ClauseAllocP, ClauseDbP, Context, GaussP, ImplGraphP,
    SolverConfigP, SolverStateP, TrailP, WatchlistsP, XorClausesP,
};
use crate::prop::{enqueue_assignment, Conflict, Reason};
use crate::state::SatState;

/// Result of a Gaussian elimination step.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GaussResult {
    /// No matrix row became unit or conflicting.
    Idle,
    /// At least one assignment was enqueued; the caller has to run unit propagation.
    Propagated,
}

/// A single matrix row: a packed column set and a rhs parity.
#[derive(Clone, Default)]
struct Row {
    bits: Vec<u64>,
    rhs: bool,
}

impl Row {
    fn new(words: usize) -> Row {
        Row {
            bits: vec![0; words],
            rhs: false,
        }
    }

    fn get(&self, col: usize) -> bool {
        self.bits[col / 64] & (1 << (col % 64)) != 0
    }

    fn set(&mut self, col: usize) {
        self.bits[col / 64] |= 1 << (col % 64);
    }

    fn clear(&mut self, col: usize) {
        self.bits[col / 64] &= !(1 << (col % 64));
    }

    fn xor_assign(&mut self, other: &Row) {
        for (word, &other_word) in self.bits.iter_mut().zip(other.bits.iter()) {
            *word ^= other_word;
        }
        self.rhs ^= other.rhs;
    }

    fn count_ones(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    fn first_col(&self) -> Option<usize> {
        for (index, &word) in self.bits.iter().enumerate() {
            if word != 0 {
                return Some(index * 64 + word.trailing_zeros() as usize);
            }
        }
        None
    }

    fn is_zero(&self) -> bool {
        self.bits.iter().all(|&word| word == 0)
    }
}

/// Saved matrix state for backtracking.
struct Snapshot {
    /// Length of the trail prefix that was substituted into `cur` when the snapshot was taken.
    trail_len: usize,
    cur: Vec<Row>,
}

/// One matrix over a connected group of XOR clauses.
struct Matrix {
    /// Column to variable mapping.
    cols: Vec<Var>,
    /// Variable to column mapping, only contains this matrix's variables.
    col_of: FxHashMap<Var, usize>,
    /// Rows reduced by row operations only.
    orig: Vec<Row>,
    /// Rows with substituted columns cleared.
    cur: Vec<Row>,
    /// For each column, rows that contained the column when the matrix was built. Entries may be
    /// stale, the row's current bit decides.
    col_rows: Vec<Vec<usize>>,
    /// Number of trail entries substituted into `cur`.
    consumed: usize,
    /// Snapshots in increasing `trail_len` order, starting with the initial state.
    snapshots: Vec<Snapshot>,
    /// Decision level of the most recent snapshot.
    snapshot_level: usize,
}

/// Incremental Gaussian elimination state.
#[derive(Default)]
pub struct Gauss {
    matrices: Vec<Matrix>,
    /// Whether the XOR clause store changed since the matrices were built.
    dirty: bool,
    /// Whether matrices were built at all.
    initialized: bool,
}

impl Gauss {
    /// Signal that the XOR clause store changed and the matrices are stale.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Whether the matrices are built, up to date and worth stepping.
    pub fn is_active(&self) -> bool {
        self.initialized && !self.dirty && !self.matrices.is_empty()
    }

    /// Whether the matrices have to be rebuilt before the next use.
    pub fn needs_rebuild(&self) -> bool {
        !self.initialized || self.dirty
    }
}

/// Build the matrices from the current XOR clause store.
///
/// Groups the XOR clauses into connected components using a union find over their variables and
/// builds a matrix for every component with enough clauses. Each matrix is reduced to row echelon
/// form; rows that are already unit or empty at this point are resolved immediately.
pub fn init_matrices(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut GaussP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        ClauseAllocP,
        SolverConfigP,
        XorClausesP,
    ),
) {
    debug_assert_eq!(ctx.part(TrailP).current_level(), 0);

    let min_xors = ctx.part(SolverConfigP).gauss_min_xors;

    {
        let gauss = ctx.part_mut(GaussP);
        gauss.matrices.clear();
        gauss.dirty = false;
        gauss.initialized = true;
    }

    // Union find over variables, used to group connected XOR clauses.
    let mut parent: FxHashMap<Var, Var> = FxHashMap::default();

    fn find(parent: &mut FxHashMap<Var, Var>, var: Var) -> Var {
        let mut root = var;
        while let Some(&up) = parent.get(&root) {
            if up == root {
                break;
            }
            root = up;
        }
        let mut walk = var;
        while let Some(&up) = parent.get(&walk) {
            if up == walk {
                break;
            }
            parent.insert(walk, root);
            walk = up;
        }
        root
    }

    let mut live_clauses: Vec<ClauseRef> = vec![];

    {
        let alloc = ctx.part(ClauseAllocP);
        for &cref in ctx.part(XorClausesP).clauses() {
            if alloc.header(cref).deleted() {
                continue;
            }
            live_clauses.push(cref);

            let lits = alloc.clause(cref).lits();
            let first = lits[0].var();
            parent.entry(first).or_insert(first);
            for &lit in &lits[1..] {
                let var = lit.var();
                parent.entry(var).or_insert(var);
                let root_a = find(&mut parent, first);
                let root_b = find(&mut parent, var);
                if root_a != root_b {
                    parent.insert(root_a, root_b);
                }
            }
        }
    }

    let mut components: FxHashMap<Var, Vec<ClauseRef>> = FxHashMap::default();
    {
        let alloc = ctx.part(ClauseAllocP);
        for &cref in live_clauses.iter() {
            let root = find(&mut parent, alloc.clause(cref).lits()[0].var());
            components.entry(root).or_default().push(cref);
        }
    }

    let mut matrices = vec![];

    for (_root, crefs) in components {
        if crefs.len() < min_xors {
            continue;
        }

        let mut cols: Vec<Var> = vec![];
        {
            let alloc = ctx.part(ClauseAllocP);
            for &cref in crefs.iter() {
                for &lit in alloc.clause(cref).lits() {
                    cols.push(lit.var());
                }
            }
        }
        cols.sort_unstable();
        cols.dedup();

        let col_of: FxHashMap<Var, usize> = cols
            .iter()
            .enumerate()
            .map(|(index, &var)| (var, index))
            .collect();

        let words = (cols.len() + 63) / 64;
        let mut orig = vec![];

        {
            let alloc = ctx.part(ClauseAllocP);
            for &cref in crefs.iter() {
                let clause = alloc.clause(cref);
                let mut row = Row::new(words);
                for &lit in clause.lits() {
                    row.set(col_of[&lit.var()]);
                }
                row.rhs = clause.header().xor_rhs();
                orig.push(row);
            }
        }

        // Gauss-Jordan elimination brings the rows into reduced row echelon form. This is the one
        // time cost; during search only single column substitutions happen.
        let mut pivot_row = 0;
        for col in 0..cols.len() {
            let mut found = None;
            for row in pivot_row..orig.len() {
                if orig[row].get(col) {
                    found = Some(row);
                    break;
                }
            }
            let found = match found {
                Some(found) => found,
                None => continue,
            };
            orig.swap(pivot_row, found);

            let pivot = orig[pivot_row].clone();
            for (row, row_data) in orig.iter_mut().enumerate() {
                if row != pivot_row && row_data.get(col) {
                    row_data.xor_assign(&pivot);
                }
            }
            pivot_row += 1;
            if pivot_row == orig.len() {
                break;
            }
        }

        // Empty and unit rows are resolved right away; the matrix keeps only longer rows.
        orig.retain(|row| match row.count_ones() {
            0 => {
                if row.rhs {
                    ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                }
                false
            }
            1 => {
                let var = cols[row.first_col().unwrap()];
                match ctx.part(AssignmentP).var_value(var) {
                    None => enqueue_assignment(ctx.borrow(), var.lit(row.rhs), Reason::Unit),
                    Some(value) => {
                        if value != row.rhs {
                            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                        }
                    }
                }
                false
            }
            _ => true,
        });

        if orig.len() < 2 {
            continue;
        }

        let mut col_rows = vec![vec![]; cols.len()];
        for (row, row_data) in orig.iter().enumerate() {
            for col in 0..cols.len() {
                if row_data.get(col) {
                    col_rows[col].push(row);
                }
            }
        }

        let cur = orig.clone();

        matrices.push(Matrix {
            cols,
            col_of,
            cur: cur.clone(),
            orig,
            col_rows,
            consumed: 0,
            snapshots: vec![Snapshot {
                trail_len: 0,
                cur,
            }],
            snapshot_level: 0,
        });
    }

    ctx.part_mut(GaussP).matrices = matrices;
}

/// Substitute new assignments into all matrices and extract propagations and conflicts.
///
/// Called after unit propagation reached a fixed point. Returns a conflict clause when a row
/// became contradictory, whether any assignment was enqueued otherwise.
pub fn step(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
        SolverConfigP,
    ),
) -> Result<GaussResult, Conflict> {
    let snapshot_interval = ctx.part(SolverConfigP).gauss_snapshot_interval.max(1);
    let mut result = GaussResult::Idle;

    let matrix_count = ctx.part(GaussP).matrices.len();

    for matrix_index in 0..matrix_count {
        // Lazy backtrack detection: if the matrix consumed more of the trail than currently
        // exists, restore the newest snapshot that is still a trail prefix.
        loop {
            let trail_len = ctx.part(TrailP).trail().len();
            let matrix = &mut ctx.part_mut(GaussP).matrices[matrix_index];
            if matrix.consumed <= trail_len {
                break;
            }
            while matrix.snapshots.last().unwrap().trail_len > trail_len {
                matrix.snapshots.pop();
                debug_assert!(!matrix.snapshots.is_empty());
            }
            let snapshot = matrix.snapshots.last().unwrap();
            matrix.cur = snapshot.cur.clone();
            matrix.consumed = snapshot.trail_len;
            matrix.snapshot_level = 0;
        }

        // Periodic snapshot before consuming new assignments.
        {
            let level = ctx.part(TrailP).current_level();
            let matrix = &mut ctx.part_mut(GaussP).matrices[matrix_index];
            if level >= matrix.snapshot_level + snapshot_interval {
                let snapshot = Snapshot {
                    trail_len: matrix.consumed,
                    cur: matrix.cur.clone(),
                };
                matrix.snapshots.push(snapshot);
                matrix.snapshot_level = level;
            }
        }

        let mut dirty_rows: Vec<usize> = vec![];

        // Substitute newly assigned matrix variables into the rows.
        loop {
            let (lit, value) = {
                let consumed = ctx.part(GaussP).matrices[matrix_index].consumed;
                let trail = ctx.part(TrailP).trail();
                if consumed == trail.len() {
                    break;
                }
                let lit = trail[consumed];
                (lit, lit.is_positive())
            };

            let matrix = &mut ctx.part_mut(GaussP).matrices[matrix_index];
            matrix.consumed += 1;

            let col = match matrix.col_of.get(&lit.var()) {
                Some(&col) => col,
                None => continue,
            };

            for row_index in 0..matrix.col_rows[col].len() {
                let row = matrix.col_rows[col][row_index];
                let row_data = &mut matrix.cur[row];
                if row_data.get(col) {
                    row_data.clear(col);
                    row_data.rhs ^= value;
                    if !dirty_rows.contains(&row) {
                        dirty_rows.push(row);
                    }
                }
            }
        }

        // Check the touched rows for propagations and conflicts.
        for &row in dirty_rows.iter() {
            enum RowState {
                Conflicting,
                Propagating(Var, bool),
                Resolved,
            }

            let state = {
                let matrix = &ctx.part(GaussP).matrices[matrix_index];
                let row_data = &matrix.cur[row];
                if row_data.is_zero() {
                    if row_data.rhs {
                        RowState::Conflicting
                    } else {
                        RowState::Resolved
                    }
                } else if row_data.count_ones() == 1 {
                    let var = matrix.cols[row_data.first_col().unwrap()];
                    RowState::Propagating(var, row_data.rhs)
                } else {
                    RowState::Resolved
                }
            };

            match state {
                RowState::Resolved => (),
                RowState::Propagating(var, value) => {
                    match ctx.part(AssignmentP).var_value(var) {
                        Some(assigned) if assigned == value => (),
                        Some(_) => {
                            // The forced value contradicts an assignment that was not yet
                            // substituted into this row. Materializing the row as a conflict
                            // handles it uniformly.
                            return Err(materialize_conflict(ctx.borrow(), matrix_index, row));
                        }
                        None => {
                            materialize_propagation(ctx.borrow(), matrix_index, row, var, value);
                            result = GaussResult::Propagated;
                        }
                    }
                }
                RowState::Conflicting => {
                    return Err(materialize_conflict(ctx.borrow(), matrix_index, row));
                }
            }
        }
    }

    Ok(result)
}

/// The CNF image of a row's `orig` form under the current assignment.
///
/// The propagated variable, if any, is excluded; all returned literals are false.
fn row_false_image(
    ctx: partial!(Context, GaussP, AssignmentP),
    matrix_index: usize,
    row: usize,
    skip: Option<Var>,
) -> Vec<Lit> {
    let matrix = &ctx.part(GaussP).matrices[matrix_index];
    let row_data = &matrix.orig[row];
    let assignment = ctx.part(AssignmentP);

    let mut lits = vec![];
    for col in 0..matrix.cols.len() {
        if !row_data.get(col) {
            continue;
        }
        let var = matrix.cols[col];
        if skip == Some(var) {
            continue;
        }
        let value = assignment
            .var_value(var)
            .expect("gauss reason variable is unassigned");
        lits.push(var.lit(!value));
    }
    lits
}

/// Enqueue a propagation derived from a matrix row.
///
/// The row's implied constraint is materialized as a redundant clause so the propagation has a
/// regular reason.
fn materialize_propagation(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
    ),
    matrix_index: usize,
    row: usize,
    var: Var,
    value: bool,
) {
    let mut false_lits = row_false_image(ctx.borrow(), matrix_index, row, Some(var));
    let propagated = var.lit(value);

    debug_assert!(!false_lits.is_empty());

    if false_lits.len() == 1 {
        ctx.part_mut(BinaryClausesP)
            .add_binary_clause([propagated, false_lits[0]]);
        enqueue_assignment(ctx.borrow(), propagated, Reason::Binary([false_lits[0]]));
        return;
    }

    // Watch the propagated literal and the highest level false literal, keeping the watch
    // invariant intact for an asserting clause.
    let mut highest = 0;
    for (index, &lit) in false_lits.iter().enumerate() {
        if ctx.part(ImplGraphP).level(lit.var()) > ctx.part(ImplGraphP).level(false_lits[highest].var())
        {
            highest = index;
        }
    }
    false_lits.swap(0, highest);

    let mut lits = vec![propagated];
    lits.extend_from_slice(&false_lits);

    let cref = add_derived_clause(ctx.borrow(), &lits);
    enqueue_assignment(ctx.borrow(), propagated, Reason::Long(cref));
}

/// Materialize a conflicting matrix row as an attached clause.
fn materialize_conflict(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut BinaryClausesP,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut GaussP,
        mut ImplGraphP,
        mut TrailP,
        mut WatchlistsP,
    ),
    matrix_index: usize,
    row: usize,
) -> Conflict {
    let mut lits = row_false_image(ctx.borrow(), matrix_index, row, None);

    debug_assert!(lits.len() >= 2, "top level gauss conflicts are resolved during init");

    if lits.len() == 2 {
        ctx.part_mut(BinaryClausesP)
            .add_binary_clause([lits[0], lits[1]]);
        return Conflict::Binary([lits[0], lits[1]]);
    }

    // Order the two highest level literals first so the watches are valid after backtracking.
    for watched in 0..2 {
        let mut highest = watched;
        for index in watched..lits.len() {
            let level = ctx.part(ImplGraphP).level(lits[index].var());
            if level > ctx.part(ImplGraphP).level(lits[highest].var()) {
                highest = index;
            }
        }
        lits.swap(watched, highest);
    }

    let cref = add_derived_clause(ctx.borrow(), &lits);
    Conflict::Long(cref)
}

/// Add a clause derived from a matrix row to the clause database and attach it.
fn add_derived_clause(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut WatchlistsP,
        ImplGraphP,
    ),
    lits: &[Lit],
) -> ClauseRef {
    debug_assert!(lits.len() >= 3);

    // Distinct decision levels of the clause, the equivalent of the glue of a learned clause.
    let mut levels: Vec<usize> = lits
        .iter()
        .map(|lit| ctx.part(ImplGraphP).level(lit.var()))
        .collect();
    levels.sort_unstable();
    levels.dedup();
    let glue = levels.len();

    let mut header = ClauseHeader::new();
    header.set_glue(glue);
    header.set_tier(if glue <= 2 {
        Tier::Core
    } else if glue <= 6 {
        Tier::Mid
    } else {
        Tier::Local
    });

    db::add_clause(ctx.borrow(), header, lits)
}
