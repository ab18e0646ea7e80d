use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use hypercube_model::{
    CellRequest, ColumnConstraint, ColumnPredicate, Hierarchy, HierarchyId, Member, SegmentHeader,
    SegmentRegion,
};

use crate::cache::{LoadRequest, SegmentCacheIndex, SegmentLoader};
use crate::error::{EngineError, EngineResult};
use crate::value::Value;

/// Shared cancellation/deadline state for one query execution.
///
/// Checked cooperatively at iteration boundaries (`TupleCursor::forward`,
/// iterator `next`); cancellation surfaces as [`EngineError::Cancelled`], a
/// distinguished abort, never as a null value.
#[derive(Debug)]
pub struct ExecutionState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

impl ExecutionState {
    pub fn new() -> Arc<Self> {
        Arc::new(ExecutionState {
            cancelled: AtomicBool::new(false),
            deadline: None,
        })
    }

    pub fn with_deadline(deadline: Instant) -> Arc<Self> {
        Arc::new(ExecutionState {
            cancelled: AtomicBool::new(false),
            deadline: Some(deadline),
        })
    }

    /// Request cancellation; takes effect at the next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Checkpoint: `Err(Cancelled)` after [`ExecutionState::cancel`],
    /// `Err(Timeout)` past the deadline, `Ok` otherwise.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout);
            }
        }
        Ok(())
    }
}

/// Boundary to the aggregate-data layer: resolves a fully-specified cell
/// request to a value, or `None` when the source has no row for it.
///
/// The engine ships [`CachingCellReader`], which answers from the segment
/// cache index and blocks on in-flight loads; tests substitute mocks.
pub trait CellReader: Send + Sync {
    fn cell_value(&self, request: &CellRequest) -> EngineResult<Option<f64>>;
}

/// A [`CellReader`] backed by the [`SegmentCacheIndex`] plus a segment
/// loader (the relational layer's callback boundary).
///
/// Ready covering segments answer immediately; a miss mints a single-cell
/// segment header and either fulfills a new load via the loader or joins an
/// existing in-flight one. Blocking on the returned ticket is the only
/// intended suspension point in the evaluation path.
pub struct CachingCellReader {
    index: Arc<SegmentCacheIndex>,
    loader: Arc<dyn SegmentLoader>,
}

impl CachingCellReader {
    pub fn new(index: Arc<SegmentCacheIndex>, loader: Arc<dyn SegmentLoader>) -> Self {
        CachingCellReader { index, loader }
    }

    pub fn index(&self) -> &Arc<SegmentCacheIndex> {
        &self.index
    }

    fn region_for(request: &CellRequest) -> SegmentRegion {
        SegmentRegion::new(
            request.measure,
            request
                .coordinates
                .iter()
                .map(|(column, value)| ColumnConstraint {
                    column: *column,
                    predicate: ColumnPredicate::values([value.as_str()]),
                })
                .collect(),
        )
    }
}

impl CellReader for CachingCellReader {
    fn cell_value(&self, request: &CellRequest) -> EngineResult<Option<f64>> {
        loop {
            if let Some((_, body)) = self.index.smallest_covering(request) {
                return Ok(body.cell(&request.coordinate()).or_else(|| body.rollup(request)));
            }
            let header = SegmentHeader::new(Self::region_for(request));
            let body = match self.index.request_load(&header) {
                // A ready answer from `request_load` covers the minted region,
                // so it can never slice a column the request leaves open.
                LoadRequest::Ready(body) => body,
                LoadRequest::Joined(ticket) => {
                    // The joined load merely overlaps this region; its body
                    // may hold only a slice of what the request aggregates
                    // over. Once it resolves, re-check coverage from the top
                    // instead of trusting it.
                    ticket.wait()?;
                    continue;
                }
                LoadRequest::Fetch(ticket) => {
                    match self.loader.load(&header) {
                        Ok(body) => {
                            self.index.load_succeeded(&header, body);
                        }
                        Err(err) => self.index.load_failed(&header, err),
                    }
                    ticket.wait()?
                }
            };
            return Ok(body.cell(&request.coordinate()).or_else(|| body.rollup(request)));
        }
    }
}

/// Opaque marker returned by [`EvalContext::savepoint`].
///
/// Savepoints follow a strict LIFO discipline: they must be restored in
/// reverse order of creation and at most once each.
#[derive(Debug)]
#[must_use = "a savepoint that is never restored leaves context mutations in place"]
pub struct Savepoint {
    seq: u64,
    undo_len: usize,
}

/// The mutable dimensional state a calc tree is evaluated against: one
/// current member per hierarchy, parameter assignments, and the query's
/// execution state.
///
/// Owned exclusively by one query execution; never shared across threads.
/// Mutations made between [`EvalContext::savepoint`] and
/// [`EvalContext::restore`] are rolled back via an undo log.
pub struct EvalContext {
    current: AHashMap<HierarchyId, Member>,
    undo: Vec<(HierarchyId, Option<Member>)>,
    savepoints: Vec<u64>,
    next_savepoint: u64,
    params: Vec<Option<Value>>,
    reader: Arc<dyn CellReader>,
    exec: Arc<ExecutionState>,
}

impl EvalContext {
    pub fn new(reader: Arc<dyn CellReader>, exec: Arc<ExecutionState>) -> Self {
        EvalContext {
            current: AHashMap::new(),
            undo: Vec::new(),
            savepoints: Vec::new(),
            next_savepoint: 0,
            params: Vec::new(),
            reader,
            exec,
        }
    }

    pub fn execution(&self) -> &Arc<ExecutionState> {
        &self.exec
    }

    pub fn reader(&self) -> &Arc<dyn CellReader> {
        &self.reader
    }

    /// The current member for `hierarchy`; the hierarchy's null member when
    /// nothing has been set.
    pub fn current_member(&self, hierarchy: &Hierarchy) -> Member {
        self.current
            .get(&hierarchy.id())
            .cloned()
            .unwrap_or_else(|| hierarchy.null_member().clone())
    }

    /// Set the current member of the member's own hierarchy, recording the
    /// previous value in the undo log.
    pub fn set_member(&mut self, member: Member) {
        let hid = member.hierarchy().id();
        let prev = self.current.insert(hid, member);
        self.undo.push((hid, prev));
    }

    /// Mark the current context state; see [`EvalContext::restore`].
    pub fn savepoint(&mut self) -> Savepoint {
        let seq = self.next_savepoint;
        self.next_savepoint += 1;
        self.savepoints.push(seq);
        Savepoint {
            seq,
            undo_len: self.undo.len(),
        }
    }

    /// Revert every context mutation made since `sp` was taken.
    ///
    /// Panics when savepoints are restored out of LIFO order; consuming the
    /// marker prevents double restores at compile time.
    pub fn restore(&mut self, sp: Savepoint) {
        let top = self
            .savepoints
            .pop()
            .expect("restore called with no outstanding savepoint");
        assert_eq!(
            top, sp.seq,
            "savepoints must be restored in reverse order of creation"
        );
        while self.undo.len() > sp.undo_len {
            let (hid, prev) = self.undo.pop().expect("undo log entry");
            match prev {
                Some(member) => {
                    self.current.insert(hid, member);
                }
                None => {
                    self.current.remove(&hid);
                }
            }
        }
    }

    /// The parameter assignment for `slot`, if one has been made.
    pub fn parameter_value(&self, index: usize) -> Option<&Value> {
        self.params.get(index).and_then(Option::as_ref)
    }

    pub fn set_parameter(&mut self, index: usize, value: Value) {
        if self.params.len() <= index {
            self.params.resize(index + 1, None);
        }
        self.params[index] = Some(value);
    }

    pub fn unset_parameter(&mut self, index: usize) {
        if let Some(slot) = self.params.get_mut(index) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypercube_model::Catalog;

    struct NoData;
    impl CellReader for NoData {
        fn cell_value(&self, _request: &CellRequest) -> EngineResult<Option<f64>> {
            Ok(None)
        }
    }

    fn ctx_and_members() -> (EvalContext, Member, Member) {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        let m = b.add_member(&level, "M", None).unwrap();
        let f = b.add_member(&level, "F", None).unwrap();
        let _ = b.build();
        let ctx = EvalContext::new(Arc::new(NoData), ExecutionState::new());
        (ctx, m, f)
    }

    #[test]
    fn restore_reverts_member_changes() {
        let (mut ctx, m, f) = ctx_and_members();
        let hier = m.hierarchy().clone();
        ctx.set_member(m.clone());
        let sp = ctx.savepoint();
        ctx.set_member(f);
        ctx.restore(sp);
        assert_eq!(ctx.current_member(&hier), m);
    }

    #[test]
    fn restore_reverts_to_null_member_when_unset_before() {
        let (mut ctx, m, _) = ctx_and_members();
        let hier = m.hierarchy().clone();
        let sp = ctx.savepoint();
        ctx.set_member(m);
        ctx.restore(sp);
        assert!(ctx.current_member(&hier).is_null());
    }

    #[test]
    #[should_panic(expected = "reverse order")]
    fn restore_out_of_order_panics() {
        let (mut ctx, _, _) = ctx_and_members();
        let outer = ctx.savepoint();
        let _inner = ctx.savepoint();
        ctx.restore(outer);
    }

    #[test]
    fn cancellation_is_a_distinguished_abort() {
        let exec = ExecutionState::new();
        assert_eq!(exec.check(), Ok(()));
        exec.cancel();
        assert_eq!(exec.check(), Err(EngineError::Cancelled));
        assert!(EngineError::Cancelled.is_abort());
    }
}
