use std::sync::Arc;

use hypercube_model::{Member, Tuple};

use crate::context::ExecutionState;
use crate::error::EngineResult;

/// Forward-only cursor over a sequence of tuples.
///
/// State machine: unpositioned → positioned → exhausted. Calling
/// [`TupleCursor::current`] (or `member`/`current_into`) while unpositioned
/// or exhausted is a precondition violation and panics; it indicates a bug in
/// the caller, not a data condition.
///
/// `forward` is the engine's cancellation checkpoint: implementations check
/// their [`ExecutionState`] before advancing.
pub trait TupleCursor: Send {
    /// Number of members per tuple; invariant over the cursor's lifetime.
    fn arity(&self) -> usize;

    /// Advance to the next tuple. Returns `false` (and moves to the
    /// exhausted state) when none remain.
    fn forward(&mut self) -> EngineResult<bool>;

    /// The tuple at the current position.
    fn current(&self) -> Tuple;

    /// Member `i` of the current tuple. Panics when `i >= arity`.
    fn member(&self, i: usize) -> Member {
        self.current().member(i).clone()
    }

    /// Copy the current tuple's members into `buf[offset..offset + arity]`,
    /// avoiding a per-tuple allocation when the caller is assembling a larger
    /// structure.
    fn current_into(&self, buf: &mut [Member], offset: usize) {
        let tuple = self.current();
        for (i, member) in tuple.members().iter().enumerate() {
            buf[offset + i] = member.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Unpositioned,
    Positioned,
    Exhausted,
}

/// A randomly-indexable sequence of tuples with a mutability flag fixed at
/// creation.
///
/// The backing storage is `Arc`-shared: immutable lists returned from shared
/// compiled nodes clone cheaply, and mutation asserts the mutability flag, so
/// a caller handed an immutable list cannot corrupt a cached backing list.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleList {
    arity: usize,
    tuples: Arc<Vec<Tuple>>,
    mutable: bool,
}

impl TupleList {
    /// An empty list the caller may grow and mutate.
    pub fn new_mutable(arity: usize) -> Self {
        TupleList {
            arity,
            tuples: Arc::new(Vec::new()),
            mutable: true,
        }
    }

    /// A read-only list over `tuples`.
    ///
    /// Panics if any tuple's arity differs from `arity`.
    pub fn immutable(arity: usize, tuples: Vec<Tuple>) -> Self {
        for t in &tuples {
            assert_eq!(t.arity(), arity, "tuple arity mismatch in list");
        }
        TupleList {
            arity,
            tuples: Arc::new(tuples),
            mutable: false,
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Tuple at `index`. Panics when out of bounds.
    pub fn get(&self, index: usize) -> &Tuple {
        &self.tuples[index]
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    /// Append a tuple. Panics on an immutable list or an arity mismatch.
    pub fn push(&mut self, tuple: Tuple) {
        assert!(self.mutable, "push on an immutable tuple list");
        assert_eq!(tuple.arity(), self.arity, "tuple arity mismatch in list");
        Arc::make_mut(&mut self.tuples).push(tuple);
    }

    /// Replace the tuple at `index`. Panics on an immutable list, an arity
    /// mismatch, or out-of-bounds `index`.
    pub fn set(&mut self, index: usize, tuple: Tuple) {
        assert!(self.mutable, "set on an immutable tuple list");
        assert_eq!(tuple.arity(), self.arity, "tuple arity mismatch in list");
        Arc::make_mut(&mut self.tuples)[index] = tuple;
    }

    /// A deep copy the caller may mutate, regardless of this list's flag.
    pub fn to_mutable(&self) -> TupleList {
        TupleList {
            arity: self.arity,
            tuples: Arc::new(self.tuples.as_ref().clone()),
            mutable: true,
        }
    }

    /// Project one column across the whole list as a member sequence; the
    /// projection mirrors this list's mutability. Panics when
    /// `column >= arity`.
    pub fn slice(&self, column: usize) -> MemberList {
        assert!(
            column < self.arity,
            "slice column {column} out of range for arity {}",
            self.arity
        );
        MemberList {
            members: Arc::new(
                self.tuples
                    .iter()
                    .map(|t| t.member(column).clone())
                    .collect(),
            ),
            mutable: self.mutable,
        }
    }

    /// A cursor over this list, checking `exec` at each `forward`.
    pub fn cursor(&self, exec: Arc<ExecutionState>) -> ListCursor {
        ListCursor {
            list: self.clone(),
            index: 0,
            state: CursorState::Unpositioned,
            exec,
        }
    }
}

/// A single column projected out of a [`TupleList`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemberList {
    members: Arc<Vec<Member>>,
    mutable: bool,
}

impl MemberList {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn get(&self, index: usize) -> &Member {
        &self.members[index]
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Replace the member at `index`. Panics on an immutable projection.
    pub fn set(&mut self, index: usize, member: Member) {
        assert!(self.mutable, "set on an immutable member list");
        Arc::make_mut(&mut self.members)[index] = member;
    }
}

/// Cursor over a [`TupleList`].
pub struct ListCursor {
    list: TupleList,
    index: usize,
    state: CursorState,
    exec: Arc<ExecutionState>,
}

impl TupleCursor for ListCursor {
    fn arity(&self) -> usize {
        self.list.arity()
    }

    fn forward(&mut self) -> EngineResult<bool> {
        self.exec.check()?;
        match self.state {
            CursorState::Unpositioned => {
                if self.list.is_empty() {
                    self.state = CursorState::Exhausted;
                    Ok(false)
                } else {
                    self.state = CursorState::Positioned;
                    self.index = 0;
                    Ok(true)
                }
            }
            CursorState::Positioned => {
                if self.index + 1 < self.list.len() {
                    self.index += 1;
                    Ok(true)
                } else {
                    self.state = CursorState::Exhausted;
                    Ok(false)
                }
            }
            CursorState::Exhausted => Ok(false),
        }
    }

    fn current(&self) -> Tuple {
        assert_eq!(
            self.state,
            CursorState::Positioned,
            "current() called on an unpositioned or exhausted cursor"
        );
        self.list.get(self.index).clone()
    }
}

/// A forward-only, single-pass sequence of tuples: the iterator protocol
/// derived mechanically from the cursor primitives.
pub struct TupleIterable {
    cursor: Box<dyn TupleCursor>,
}

impl TupleIterable {
    pub fn new(cursor: Box<dyn TupleCursor>) -> Self {
        TupleIterable { cursor }
    }

    pub fn arity(&self) -> usize {
        self.cursor.arity()
    }

    /// Drain the remaining tuples into a list with the requested mutability.
    pub fn into_list(mut self, mutable: bool) -> EngineResult<TupleList> {
        let arity = self.cursor.arity();
        let mut tuples = Vec::new();
        while self.cursor.forward()? {
            tuples.push(self.cursor.current());
        }
        let mut list = TupleList::immutable(arity, tuples);
        list.mutable = mutable;
        Ok(list)
    }
}

impl Iterator for TupleIterable {
    type Item = EngineResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.forward() {
            Ok(true) => Some(Ok(self.cursor.current())),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypercube_model::Catalog;

    fn two_tuples() -> (Tuple, Tuple) {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        let m = b.add_member(&level, "M", None).unwrap();
        let f = b.add_member(&level, "F", None).unwrap();
        let _ = b.build();
        (Tuple::from_members([m]), Tuple::from_members([f]))
    }

    #[test]
    fn cursor_walks_the_list_in_order() {
        let (a, b) = two_tuples();
        let list = TupleList::immutable(1, vec![a.clone(), b.clone()]);
        let mut cursor = list.cursor(ExecutionState::new());
        assert!(cursor.forward().unwrap());
        assert_eq!(cursor.current(), a);
        assert!(cursor.forward().unwrap());
        assert_eq!(cursor.current(), b);
        assert!(!cursor.forward().unwrap());
    }

    #[test]
    #[should_panic(expected = "unpositioned")]
    fn current_before_forward_panics() {
        let (a, _) = two_tuples();
        let list = TupleList::immutable(1, vec![a]);
        let cursor = list.cursor(ExecutionState::new());
        let _ = cursor.current();
    }

    #[test]
    #[should_panic(expected = "unpositioned or exhausted")]
    fn current_after_exhaustion_panics() {
        let (a, _) = two_tuples();
        let list = TupleList::immutable(1, vec![a]);
        let mut cursor = list.cursor(ExecutionState::new());
        while cursor.forward().unwrap() {}
        let _ = cursor.current();
    }

    #[test]
    #[should_panic(expected = "immutable")]
    fn push_on_immutable_list_panics() {
        let (a, b) = two_tuples();
        let mut list = TupleList::immutable(1, vec![a]);
        list.push(b);
    }

    #[test]
    fn mutating_a_clone_does_not_touch_the_original() {
        let (a, b) = two_tuples();
        let original = {
            let mut l = TupleList::new_mutable(1);
            l.push(a.clone());
            l
        };
        let mut copy = original.to_mutable();
        copy.set(0, b.clone());
        assert_eq!(original.get(0), &a);
        assert_eq!(copy.get(0), &b);
    }

    #[test]
    fn slice_mirrors_mutability() {
        let (a, b) = two_tuples();
        let ro = TupleList::immutable(1, vec![a.clone(), b.clone()]);
        assert!(!ro.slice(0).is_mutable());
        let rw = ro.to_mutable();
        let slice = rw.slice(0);
        assert!(slice.is_mutable());
        assert_eq!(slice.members().len(), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn slice_out_of_range_panics() {
        let (a, _) = two_tuples();
        let list = TupleList::immutable(1, vec![a]);
        let _ = list.slice(1);
    }

    #[test]
    fn iterable_derives_iterator_from_cursor() {
        let (a, b) = two_tuples();
        let list = TupleList::immutable(1, vec![a.clone(), b.clone()]);
        let iter = TupleIterable::new(Box::new(list.cursor(ExecutionState::new())));
        let collected: Vec<Tuple> = iter.map(|t| t.unwrap()).collect();
        assert_eq!(collected, vec![a, b]);
    }

    #[test]
    fn cancellation_aborts_iteration() {
        let (a, b) = two_tuples();
        let list = TupleList::immutable(1, vec![a, b]);
        let exec = ExecutionState::new();
        let mut cursor = list.cursor(exec.clone());
        assert!(cursor.forward().unwrap());
        exec.cancel();
        assert_eq!(cursor.forward(), Err(crate::error::EngineError::Cancelled));
    }
}
