//! The compiled-expression node hierarchy.
//!
//! Every compiled node implements [`Calc`], the generic evaluation contract,
//! plus the typed subtrait matching its static return type. Trees are
//! immutable after compilation: the same tree is evaluated once per cell or
//! tuple against a varying [`EvalContext`], so nodes are pure functions of
//! (context, compile-time constants). The only node-local state permitted is
//! a correctly-guarded constant-folding cell (see
//! [`sets::HierarchyMembersCalc`]).

pub mod arith;
pub mod logic;
pub mod members;
pub mod sets;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hypercube_model::{Dimension, Hierarchy, Level, Member, Tuple};

use crate::context::EvalContext;
use crate::cursor::{TupleIterable, TupleList};
use crate::error::EngineResult;
use crate::types::ResultStyle;
use crate::value::{Value, DOUBLE_NULL, INT_NULL};

/// The uniform polymorphic surface every compiled expression implements.
///
/// Evaluation never errors for ordinary "no value in this context"
/// conditions; those return the type's null sentinel (folded into
/// [`Value::Null`] at this generic entry point). The `Err` channel carries
/// only cancellation/timeout and segment-load failures. Structural invariant
/// violations panic.
pub trait Calc: Send + Sync {
    /// Node name shown by the plan writer.
    fn name(&self) -> &str;

    /// Generic evaluation; must agree with the typed entry point of the
    /// node's typed subtrait.
    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value>;

    /// Whether re-evaluating with a different current member for `hierarchy`
    /// could change the result. Pure function of the compiled tree.
    ///
    /// A compile-time constant from `hierarchy`'s own dimension is
    /// *independent* of it: `[Gender].[M]` does not depend on `[Gender]`.
    fn depends_on(&self, hierarchy: &Hierarchy) -> bool;

    fn result_style(&self) -> ResultStyle {
        ResultStyle::Value
    }

    /// Child nodes, for the plan writer's traversal.
    fn children(&self) -> Vec<&dyn Calc> {
        Vec::new()
    }

    /// Writer annotation hook; nodes add their printable arguments here.
    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
    }
}

/// Union of the children's dependency sets: the default for any compound
/// node that does not set context before evaluating a child.
pub fn any_depends(children: &[&dyn Calc], hierarchy: &Hierarchy) -> bool {
    children.iter().any(|c| c.depends_on(hierarchy))
}

/// Boolean-valued node; `None` is the boolean null, distinct from `false`.
pub trait BooleanCalc: Calc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>>;
}

/// Integer-valued node; [`INT_NULL`] is the null sentinel.
pub trait IntegerCalc: Calc {
    fn evaluate_integer(&self, ctx: &mut EvalContext) -> EngineResult<i32>;
}

/// Double-valued node; [`DOUBLE_NULL`] is the null sentinel (checked by bit
/// pattern, never confused with ordinary arithmetic NaN).
pub trait DoubleCalc: Calc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64>;
}

/// String-valued node; `None` is the null.
pub trait StringCalc: Calc {
    fn evaluate_string(&self, ctx: &mut EvalContext) -> EngineResult<Option<Arc<str>>>;
}

/// Date/time-valued node; `None` is the null.
pub trait DateTimeCalc: Calc {
    fn evaluate_datetime(&self, ctx: &mut EvalContext)
        -> EngineResult<Option<DateTime<Utc>>>;
}

/// Member-valued node. Never absent: "no member" is the hierarchy's null
/// member singleton, so callers can always navigate the result.
pub trait MemberCalc: Calc {
    fn evaluate_member(&self, ctx: &mut EvalContext) -> EngineResult<Member>;
}

/// Level-valued node; always resolves to a concrete catalog element.
pub trait LevelCalc: Calc {
    fn evaluate_level(&self, ctx: &mut EvalContext) -> EngineResult<Level>;
}

/// Hierarchy-valued node; always resolves to a concrete catalog element.
pub trait HierarchyCalc: Calc {
    fn evaluate_hierarchy(&self, ctx: &mut EvalContext) -> EngineResult<Hierarchy>;
}

/// Dimension-valued node; always resolves to a concrete catalog element.
pub trait DimensionCalc: Calc {
    fn evaluate_dimension(&self, ctx: &mut EvalContext) -> EngineResult<Dimension>;
}

/// Tuple-valued node; `None` is the tuple-level null, produced whenever any
/// position would be null.
pub trait TupleCalc: Calc {
    fn evaluate_tuple(&self, ctx: &mut EvalContext) -> EngineResult<Option<Tuple>>;
}

/// List-valued node; "no tuples" is an empty list, never a null.
pub trait ListCalc: Calc {
    fn evaluate_list(&self, ctx: &mut EvalContext) -> EngineResult<TupleList>;
}

/// Iterable-valued node; "no tuples" is an empty iterable, never a null.
pub trait IterCalc: Calc {
    fn evaluate_iter(&self, ctx: &mut EvalContext) -> EngineResult<TupleIterable>;
}

/// Statement-like node evaluated for side effects only.
pub trait VoidCalc: Calc {
    fn evaluate_void(&self, ctx: &mut EvalContext) -> EngineResult<()>;
}

/// A compile-time-known value: a literal or a catalog element.
///
/// Its value truly cannot vary with context, so `depends_on` is always false
/// and repeated evaluation is O(1) over the captured value.
pub struct Constant {
    value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        Constant { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Calc for Constant {
    fn name(&self) -> &str {
        "Literal"
    }

    fn evaluate(&self, _ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(self.value.clone())
    }

    fn depends_on(&self, _hierarchy: &Hierarchy) -> bool {
        false
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("value".to_string(), self.value.to_string());
    }
}

impl BooleanCalc for Constant {
    fn evaluate_boolean(&self, _ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        match &self.value {
            Value::Bool(b) => Ok(Some(*b)),
            Value::Null => Ok(None),
            other => panic!("BOOLEAN constant holds {}", other.scalar_type()),
        }
    }
}

impl IntegerCalc for Constant {
    fn evaluate_integer(&self, _ctx: &mut EvalContext) -> EngineResult<i32> {
        match &self.value {
            Value::Int(i) => Ok(*i),
            Value::Null => Ok(INT_NULL),
            other => panic!("INTEGER constant holds {}", other.scalar_type()),
        }
    }
}

impl DoubleCalc for Constant {
    fn evaluate_double(&self, _ctx: &mut EvalContext) -> EngineResult<f64> {
        match &self.value {
            Value::Double(d) => Ok(*d),
            Value::Int(i) => Ok(*i as f64),
            Value::Null => Ok(DOUBLE_NULL),
            other => panic!("DOUBLE constant holds {}", other.scalar_type()),
        }
    }
}

impl StringCalc for Constant {
    fn evaluate_string(&self, _ctx: &mut EvalContext) -> EngineResult<Option<Arc<str>>> {
        match &self.value {
            Value::Str(s) => Ok(Some(s.clone())),
            Value::Null => Ok(None),
            other => panic!("STRING constant holds {}", other.scalar_type()),
        }
    }
}

impl DateTimeCalc for Constant {
    fn evaluate_datetime(
        &self,
        _ctx: &mut EvalContext,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        match &self.value {
            Value::DateTime(dt) => Ok(Some(*dt)),
            Value::Null => Ok(None),
            other => panic!("DATETIME constant holds {}", other.scalar_type()),
        }
    }
}

impl MemberCalc for Constant {
    fn evaluate_member(&self, _ctx: &mut EvalContext) -> EngineResult<Member> {
        match &self.value {
            Value::Member(m) => Ok(m.clone()),
            other => panic!("MEMBER constant holds {}", other.scalar_type()),
        }
    }
}

impl LevelCalc for Constant {
    fn evaluate_level(&self, _ctx: &mut EvalContext) -> EngineResult<Level> {
        match &self.value {
            Value::Level(l) => Ok(l.clone()),
            other => panic!("LEVEL constant holds {}", other.scalar_type()),
        }
    }
}

impl HierarchyCalc for Constant {
    fn evaluate_hierarchy(&self, _ctx: &mut EvalContext) -> EngineResult<Hierarchy> {
        match &self.value {
            Value::Hierarchy(h) => Ok(h.clone()),
            other => panic!("HIERARCHY constant holds {}", other.scalar_type()),
        }
    }
}

impl DimensionCalc for Constant {
    fn evaluate_dimension(&self, _ctx: &mut EvalContext) -> EngineResult<Dimension> {
        match &self.value {
            Value::Dimension(d) => Ok(d.clone()),
            other => panic!("DIMENSION constant holds {}", other.scalar_type()),
        }
    }
}

impl TupleCalc for Constant {
    fn evaluate_tuple(&self, _ctx: &mut EvalContext) -> EngineResult<Option<Tuple>> {
        match &self.value {
            Value::Tuple(t) => Ok(Some(t.clone())),
            Value::Null => Ok(None),
            other => panic!("TUPLE constant holds {}", other.scalar_type()),
        }
    }
}

impl ListCalc for Constant {
    fn evaluate_list(&self, _ctx: &mut EvalContext) -> EngineResult<TupleList> {
        match &self.value {
            Value::Set(list) => Ok(list.clone()),
            other => panic!("SET constant holds {}", other.scalar_type()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CellReader, ExecutionState};
    use crate::value::is_double_null;
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

    #[test]
    fn constant_member_is_independent_of_its_own_hierarchy() {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        let m = b.add_member(&level, "M", None).unwrap();
        let catalog = b.build();
        let hier = catalog.hierarchy_by_name("Gender").unwrap();

        let calc = Constant::new(Value::Member(m.clone()));
        assert!(!calc.depends_on(hier));
        assert_eq!(calc.evaluate_member(&mut ctx()).unwrap(), m);
    }

    #[test]
    fn generic_and_typed_evaluation_agree_on_null() {
        let mut c = ctx();
        let calc = Constant::new(Value::Null);
        assert_eq!(calc.evaluate(&mut c).unwrap(), Value::Null);
        assert!(is_double_null(calc.evaluate_double(&mut c).unwrap()));
        assert_eq!(calc.evaluate_integer(&mut c).unwrap(), INT_NULL);
        assert_eq!(calc.evaluate_boolean(&mut c).unwrap(), None);
        assert_eq!(calc.evaluate_string(&mut c).unwrap(), None);
        assert_eq!(calc.evaluate_datetime(&mut c).unwrap(), None);
        assert_eq!(calc.evaluate_tuple(&mut c).unwrap(), None);
    }

    #[test]
    #[should_panic(expected = "DOUBLE constant holds MEMBER")]
    fn type_mismatch_is_a_structural_error() {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        let m = b.add_member(&level, "M", None).unwrap();
        let _ = b.build();
        let calc = Constant::new(Value::Member(m));
        let _ = calc.evaluate_double(&mut ctx());
    }
}
