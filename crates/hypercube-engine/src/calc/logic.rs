//! Boolean connectives with three-valued null handling.
//!
//! A null operand is "unknown": `false AND unknown` is `false`, `true OR
//! unknown` is `true`, and everything else involving unknown stays unknown.

use std::sync::Arc;

use hypercube_model::Hierarchy;

use super::{any_depends, BooleanCalc, Calc};
use crate::context::EvalContext;
use crate::error::EngineResult;
use crate::value::Value;

pub struct AndCalc {
    left: Arc<dyn BooleanCalc>,
    right: Arc<dyn BooleanCalc>,
}

impl AndCalc {
    pub fn new(left: Arc<dyn BooleanCalc>, right: Arc<dyn BooleanCalc>) -> Self {
        AndCalc { left, right }
    }
}

impl Calc for AndCalc {
    fn name(&self) -> &str {
        "And"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_bool(self.evaluate_boolean(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        any_depends(&self.children(), hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

impl BooleanCalc for AndCalc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        match self.left.evaluate_boolean(ctx)? {
            Some(false) => Ok(Some(false)),
            l => Ok(match (l, self.right.evaluate_boolean(ctx)?) {
                (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }),
        }
    }
}

pub struct OrCalc {
    left: Arc<dyn BooleanCalc>,
    right: Arc<dyn BooleanCalc>,
}

impl OrCalc {
    pub fn new(left: Arc<dyn BooleanCalc>, right: Arc<dyn BooleanCalc>) -> Self {
        OrCalc { left, right }
    }
}

impl Calc for OrCalc {
    fn name(&self) -> &str {
        "Or"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_bool(self.evaluate_boolean(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        any_depends(&self.children(), hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

impl BooleanCalc for OrCalc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        match self.left.evaluate_boolean(ctx)? {
            Some(true) => Ok(Some(true)),
            l => Ok(match (l, self.right.evaluate_boolean(ctx)?) {
                (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }),
        }
    }
}

pub struct NotCalc {
    child: Arc<dyn BooleanCalc>,
}

impl NotCalc {
    pub fn new(child: Arc<dyn BooleanCalc>) -> Self {
        NotCalc { child }
    }
}

impl Calc for NotCalc {
    fn name(&self) -> &str {
        "Not"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_bool(self.evaluate_boolean(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.child.depends_on(hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.child.as_ref()]
    }
}

impl BooleanCalc for NotCalc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        Ok(self.child.evaluate_boolean(ctx)?.map(|b| !b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Constant;
    use crate::context::{CellReader, ExecutionState};
    use hypercube_model::CellRequest;

    struct NoData;
    impl CellReader for NoData {
        fn cell_value(&self, _request: &CellRequest) -> EngineResult<Option<f64>> {
            Ok(None)
        }
    }

    fn ctx() -> EvalContext {
        EvalContext::new(Arc::new(NoData), ExecutionState::new())
    }

    fn b(v: Option<bool>) -> Arc<dyn BooleanCalc> {
        Arc::new(Constant::new(Value::from_bool(v)))
    }

    #[test]
    fn three_valued_and() {
        let mut c = ctx();
        let cases = [
            (Some(true), Some(true), Some(true)),
            (Some(true), None, None),
            (None, Some(true), None),
            (Some(false), None, Some(false)),
            (None, Some(false), Some(false)),
            (None, None, None),
        ];
        for (l, r, expected) in cases {
            let calc = AndCalc::new(b(l), b(r));
            assert_eq!(calc.evaluate_boolean(&mut c).unwrap(), expected, "{l:?} AND {r:?}");
        }
    }

    #[test]
    fn three_valued_or() {
        let mut c = ctx();
        let cases = [
            (Some(false), Some(false), Some(false)),
            (Some(false), None, None),
            (None, Some(true), Some(true)),
            (Some(true), None, Some(true)),
            (None, None, None),
        ];
        for (l, r, expected) in cases {
            let calc = OrCalc::new(b(l), b(r));
            assert_eq!(calc.evaluate_boolean(&mut c).unwrap(), expected, "{l:?} OR {r:?}");
        }
    }

    #[test]
    fn not_preserves_null() {
        let mut c = ctx();
        assert_eq!(NotCalc::new(b(None)).evaluate_boolean(&mut c).unwrap(), None);
        assert_eq!(
            NotCalc::new(b(Some(false))).evaluate_boolean(&mut c).unwrap(),
            Some(true)
        );
    }
}
