//! Set-valued calcs: hierarchy member sets, set literals, `Filter`,
//! `CrossJoin`, and the result-style conversion adapters.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use hypercube_model::{Hierarchy, Member, Tuple};

use super::{BooleanCalc, Calc, IterCalc, ListCalc, TupleCalc};
use crate::context::{EvalContext, ExecutionState};
use crate::cursor::{TupleCursor, TupleIterable, TupleList};
use crate::error::EngineResult;
use crate::types::ResultStyle;
use crate::value::Value;

/// `<Hierarchy>.Members`: the set of all non-null members, captured from the
/// catalog at compile time.
///
/// The backing list is a constant-folded cell: built once on first
/// evaluation, shared (immutably) by every evaluation thereafter. Safe
/// because the tree is compiled once and read-only afterwards.
pub struct HierarchyMembersCalc {
    hierarchy: Hierarchy,
    members: Vec<Member>,
    list: OnceLock<TupleList>,
}

impl HierarchyMembersCalc {
    pub fn new(hierarchy: Hierarchy, members: Vec<Member>) -> Self {
        HierarchyMembersCalc {
            hierarchy,
            members,
            list: OnceLock::new(),
        }
    }

    fn backing_list(&self) -> &TupleList {
        self.list.get_or_init(|| {
            TupleList::immutable(
                1,
                self.members
                    .iter()
                    .map(|m| Tuple::from_members([m.clone()]))
                    .collect(),
            )
        })
    }
}

impl Calc for HierarchyMembersCalc {
    fn name(&self) -> &str {
        "Members"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::Set(self.evaluate_list(ctx)?))
    }

    fn depends_on(&self, _hierarchy: &Hierarchy) -> bool {
        // The member set is a catalog constant; in particular it does not
        // depend on its own hierarchy's current member.
        false
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::List
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("hierarchy".to_string(), self.hierarchy.to_string());
    }
}

impl ListCalc for HierarchyMembersCalc {
    fn evaluate_list(&self, _ctx: &mut EvalContext) -> EngineResult<TupleList> {
        Ok(self.backing_list().clone())
    }
}

/// `{ ... }` set literal: evaluates each tuple child per context, skipping
/// tuple-level nulls.
pub struct SetLiteralCalc {
    arity: usize,
    tuples: Vec<Arc<dyn TupleCalc>>,
}

impl SetLiteralCalc {
    pub fn new(arity: usize, tuples: Vec<Arc<dyn TupleCalc>>) -> Self {
        SetLiteralCalc { arity, tuples }
    }
}

impl Calc for SetLiteralCalc {
    fn name(&self) -> &str {
        "SetLiteral"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::Set(self.evaluate_list(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        super::any_depends(&self.children(), hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::List
    }

    fn children(&self) -> Vec<&dyn Calc> {
        self.tuples.iter().map(|c| c.as_ref() as &dyn Calc).collect()
    }
}

impl ListCalc for SetLiteralCalc {
    fn evaluate_list(&self, ctx: &mut EvalContext) -> EngineResult<TupleList> {
        let mut tuples = Vec::with_capacity(self.tuples.len());
        for child in &self.tuples {
            if let Some(tuple) = child.evaluate_tuple(ctx)? {
                tuples.push(tuple);
            }
        }
        Ok(TupleList::immutable(self.arity, tuples))
    }
}

/// `Filter(set, predicate)`: keeps the tuples for which the predicate is
/// true (boolean null counts as not-true).
///
/// Before evaluating the predicate for a tuple, the construct pins each of
/// the tuple's members as current context; those hierarchies are therefore
/// masked out of the dependency union inherited from the predicate child.
pub struct FilterCalc {
    set: Arc<dyn ListCalc>,
    predicate: Arc<dyn BooleanCalc>,
    pinned: Vec<Hierarchy>,
}

impl FilterCalc {
    pub fn new(
        set: Arc<dyn ListCalc>,
        predicate: Arc<dyn BooleanCalc>,
        pinned: Vec<Hierarchy>,
    ) -> Self {
        FilterCalc {
            set,
            predicate,
            pinned,
        }
    }
}

impl Calc for FilterCalc {
    fn name(&self) -> &str {
        "Filter"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::Set(self.evaluate_list(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        if self.set.depends_on(hierarchy) {
            return true;
        }
        self.predicate.depends_on(hierarchy) && !self.pinned.contains(hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::MutableList
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.set.as_ref(), self.predicate.as_ref()]
    }
}

impl ListCalc for FilterCalc {
    fn evaluate_list(&self, ctx: &mut EvalContext) -> EngineResult<TupleList> {
        let input = self.set.evaluate_list(ctx)?;
        let mut out = TupleList::new_mutable(input.arity());
        for tuple in input.tuples() {
            ctx.execution().check()?;
            let sp = ctx.savepoint();
            for member in tuple.members() {
                ctx.set_member(member.clone());
            }
            let keep = self.predicate.evaluate_boolean(ctx)?;
            ctx.restore(sp);
            if keep == Some(true) {
                out.push(tuple.clone());
            }
        }
        Ok(out)
    }
}

enum CrossState {
    Unpositioned,
    Positioned(usize),
    Exhausted,
}

/// Cursor form of `CrossJoin(left, right)`: walks the cartesian product
/// lazily, right side fastest.
pub struct CrossJoinCursor {
    left: TupleList,
    right: TupleList,
    state: CrossState,
    exec: Arc<ExecutionState>,
}

impl CrossJoinCursor {
    fn tuple_at(&self, index: usize) -> Tuple {
        let l = self.left.get(index / self.right.len());
        let r = self.right.get(index % self.right.len());
        Tuple::from_members(
            l.members()
                .iter()
                .chain(r.members().iter())
                .cloned(),
        )
    }

    fn total(&self) -> usize {
        self.left.len() * self.right.len()
    }
}

impl TupleCursor for CrossJoinCursor {
    fn arity(&self) -> usize {
        self.left.arity() + self.right.arity()
    }

    fn forward(&mut self) -> EngineResult<bool> {
        self.exec.check()?;
        let next = match self.state {
            CrossState::Unpositioned => 0,
            CrossState::Positioned(i) => i + 1,
            CrossState::Exhausted => return Ok(false),
        };
        if next < self.total() {
            self.state = CrossState::Positioned(next);
            Ok(true)
        } else {
            self.state = CrossState::Exhausted;
            Ok(false)
        }
    }

    fn current(&self) -> Tuple {
        match self.state {
            CrossState::Positioned(i) => self.tuple_at(i),
            _ => panic!("current() called on an unpositioned or exhausted cursor"),
        }
    }
}

/// `CrossJoin(set, set)` as a lazy iterable; the natural producer for
/// callers that accept [`ResultStyle::Iterable`].
pub struct CrossJoinIterCalc {
    left: Arc<dyn ListCalc>,
    right: Arc<dyn ListCalc>,
}

impl CrossJoinIterCalc {
    pub fn new(left: Arc<dyn ListCalc>, right: Arc<dyn ListCalc>) -> Self {
        CrossJoinIterCalc { left, right }
    }
}

impl Calc for CrossJoinIterCalc {
    fn name(&self) -> &str {
        "CrossJoin"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        let iter = self.evaluate_iter(ctx)?;
        Ok(Value::Set(iter.into_list(false)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        super::any_depends(&self.children(), hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::Iterable
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

impl IterCalc for CrossJoinIterCalc {
    fn evaluate_iter(&self, ctx: &mut EvalContext) -> EngineResult<TupleIterable> {
        let left = self.left.evaluate_list(ctx)?;
        let right = self.right.evaluate_list(ctx)?;
        Ok(TupleIterable::new(Box::new(CrossJoinCursor {
            left,
            right,
            state: CrossState::Unpositioned,
            exec: ctx.execution().clone(),
        })))
    }
}

/// Adapts a list producer to the iterable contract.
pub struct ListToIterCalc {
    child: Arc<dyn ListCalc>,
}

impl ListToIterCalc {
    pub fn new(child: Arc<dyn ListCalc>) -> Self {
        ListToIterCalc { child }
    }
}

impl Calc for ListToIterCalc {
    fn name(&self) -> &str {
        "ListToIter"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        self.child.evaluate(ctx)
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.child.depends_on(hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::Iterable
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.child.as_ref()]
    }
}

impl IterCalc for ListToIterCalc {
    fn evaluate_iter(&self, ctx: &mut EvalContext) -> EngineResult<TupleIterable> {
        let list = self.child.evaluate_list(ctx)?;
        let exec = ctx.execution().clone();
        Ok(TupleIterable::new(Box::new(list.cursor(exec))))
    }
}

/// Materializes an iterable producer into a read-only list.
pub struct IterToListCalc {
    child: Arc<dyn IterCalc>,
}

impl IterToListCalc {
    pub fn new(child: Arc<dyn IterCalc>) -> Self {
        IterToListCalc { child }
    }
}

impl Calc for IterToListCalc {
    fn name(&self) -> &str {
        "IterToList"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::Set(self.evaluate_list(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.child.depends_on(hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::List
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.child.as_ref()]
    }
}

impl ListCalc for IterToListCalc {
    fn evaluate_list(&self, ctx: &mut EvalContext) -> EngineResult<TupleList> {
        self.child.evaluate_iter(ctx)?.into_list(false)
    }
}

/// Defensive copy inserted by the compiler when a caller requires a mutable
/// list but the natural producer's list is shared/read-only.
pub struct CopyListCalc {
    child: Arc<dyn ListCalc>,
}

impl CopyListCalc {
    pub fn new(child: Arc<dyn ListCalc>) -> Self {
        CopyListCalc { child }
    }
}

impl Calc for CopyListCalc {
    fn name(&self) -> &str {
        "CopyList"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::Set(self.evaluate_list(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.child.depends_on(hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        ResultStyle::MutableList
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.child.as_ref()]
    }
}

impl ListCalc for CopyListCalc {
    fn evaluate_list(&self, ctx: &mut EvalContext) -> EngineResult<TupleList> {
        Ok(self.child.evaluate_list(ctx)?.to_mutable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::members::CurrentMemberCalc;
    use crate::calc::MemberCalc;
    use crate::context::CellReader;
    use hypercube_model::{Catalog, CellRequest};

    struct NoData;
    impl CellReader for NoData {
        fn cell_value(&self, _request: &CellRequest) -> EngineResult<Option<f64>> {
            Ok(None)
        }
    }

    fn ctx() -> EvalContext {
        EvalContext::new(Arc::new(NoData), ExecutionState::new())
    }

    fn catalog() -> Catalog {
        let mut b = Catalog::builder();
        let gd = b.add_dimension("Gender").unwrap();
        let gender = b.add_hierarchy(&gd, "Gender").unwrap();
        let gl = b.add_level(&gender, "Gender", 1).unwrap();
        b.add_member(&gl, "M", None).unwrap();
        b.add_member(&gl, "F", None).unwrap();
        let td = b.add_dimension("Time").unwrap();
        let time = b.add_hierarchy(&td, "Time").unwrap();
        let tl = b.add_level(&time, "Year", 1).unwrap();
        b.add_member(&tl, "1997", None).unwrap();
        b.add_member(&tl, "1998", None).unwrap();
        b.build()
    }

    fn members_calc(catalog: &Catalog, name: &str) -> Arc<HierarchyMembersCalc> {
        let h = catalog.hierarchy_by_name(name).unwrap();
        Arc::new(HierarchyMembersCalc::new(
            h.clone(),
            catalog.hierarchy_members(h),
        ))
    }

    /// Predicate whose value depends on the pinned hierarchy: member name
    /// equals a constant, expressed through a member-name scalar.
    struct NameIsCalc {
        member: Arc<dyn MemberCalc>,
        expected: String,
    }

    impl Calc for NameIsCalc {
        fn name(&self) -> &str {
            "NameIs"
        }
        fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
            Ok(Value::from_bool(self.evaluate_boolean(ctx)?))
        }
        fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
            self.member.depends_on(hierarchy)
        }
        fn children(&self) -> Vec<&dyn Calc> {
            vec![self.member.as_ref()]
        }
    }

    impl BooleanCalc for NameIsCalc {
        fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
            let m = self.member.evaluate_member(ctx)?;
            if m.is_null() {
                return Ok(None);
            }
            Ok(Some(m.name() == self.expected))
        }
    }

    #[test]
    fn hierarchy_members_folds_once_and_is_constant() {
        let catalog = catalog();
        let gender = catalog.hierarchy_by_name("Gender").unwrap();
        let calc = members_calc(&catalog, "Gender");
        let mut c = ctx();
        let a = calc.evaluate_list(&mut c).unwrap();
        let b = calc.evaluate_list(&mut c).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(!a.is_mutable());
        assert!(!calc.depends_on(gender));
    }

    #[test]
    fn filter_pins_and_masks_its_set_hierarchies() {
        let catalog = catalog();
        let gender = catalog.hierarchy_by_name("Gender").unwrap();
        let time = catalog.hierarchy_by_name("Time").unwrap();

        let predicate = Arc::new(NameIsCalc {
            member: Arc::new(CurrentMemberCalc::new(gender.clone())),
            expected: "F".to_string(),
        });
        // The predicate alone depends on Gender.
        assert!(predicate.depends_on(gender));

        let filter = FilterCalc::new(
            members_calc(&catalog, "Gender"),
            predicate,
            vec![gender.clone()],
        );
        // But Filter pins Gender before evaluating it, masking the
        // dependency; Time was never involved.
        assert!(!filter.depends_on(gender));
        assert!(!filter.depends_on(time));

        let mut c = ctx();
        let out = filter.evaluate_list(&mut c).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).member(0).name(), "F");
        assert!(out.is_mutable());
        // The pin was rolled back.
        assert!(c.current_member(gender).is_null());
    }

    #[test]
    fn filter_treats_boolean_null_as_not_true() {
        let catalog = catalog();
        let time = catalog.hierarchy_by_name("Time").unwrap();
        // Predicate over an unrelated hierarchy's current member: null in
        // every iteration, so nothing passes.
        let predicate = Arc::new(NameIsCalc {
            member: Arc::new(CurrentMemberCalc::new(time.clone())),
            expected: "1997".to_string(),
        });
        let filter = FilterCalc::new(members_calc(&catalog, "Gender"), predicate, vec![]);
        let out = filter.evaluate_list(&mut ctx()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn cross_join_walks_right_fastest() {
        let catalog = catalog();
        let calc = CrossJoinIterCalc::new(
            members_calc(&catalog, "Gender"),
            members_calc(&catalog, "Time"),
        );
        let mut c = ctx();
        let names: Vec<String> = calc
            .evaluate_iter(&mut c)
            .unwrap()
            .map(|t| {
                let t = t.unwrap();
                format!("{}/{}", t.member(0).name(), t.member(1).name())
            })
            .collect();
        assert_eq!(names, vec!["M/1997", "M/1998", "F/1997", "F/1998"]);
    }

    #[test]
    fn copy_list_detaches_from_the_shared_backing_list() {
        let catalog = catalog();
        let shared = members_calc(&catalog, "Gender");
        let copy = CopyListCalc::new(shared.clone());
        let mut c = ctx();
        let mut copied = copy.evaluate_list(&mut c).unwrap();
        assert!(copied.is_mutable());
        let replacement = copied.get(1).clone();
        copied.set(0, replacement);
        // The shared backing list is untouched.
        let original = shared.evaluate_list(&mut c).unwrap();
        assert_eq!(original.get(0).member(0).name(), "M");
    }

    #[test]
    fn style_adapters_preserve_the_sequence() {
        let catalog = catalog();
        let list_producer = members_calc(&catalog, "Gender");
        let mut c = ctx();

        let as_iter = ListToIterCalc::new(list_producer.clone());
        assert_eq!(as_iter.result_style(), ResultStyle::Iterable);
        let round_tripped = IterToListCalc::new(Arc::new(as_iter))
            .evaluate_list(&mut c)
            .unwrap();
        let direct = list_producer.evaluate_list(&mut c).unwrap();
        assert_eq!(round_tripped.tuples(), direct.tuples());
        assert_eq!(round_tripped.len(), 2);
        assert!(!round_tripped.is_mutable());
    }
}
