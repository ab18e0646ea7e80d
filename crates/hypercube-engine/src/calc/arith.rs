//! Numeric calcs: arithmetic, comparison, null coalescing, and the
//! integer-to-double widening adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use hypercube_model::Hierarchy;

use super::{any_depends, BooleanCalc, Calc, DoubleCalc, IntegerCalc};
use crate::context::EvalContext;
use crate::error::EngineResult;
use crate::value::{is_double_null, Value, DOUBLE_NULL, INT_NULL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "Add",
            ArithOp::Sub => "Sub",
            ArithOp::Mul => "Mul",
            ArithOp::Div => "Div",
        }
    }
}

/// Binary double arithmetic with strict null propagation: if either operand
/// is the double null, so is the result. Division by zero follows IEEE
/// (infinities), which stays distinct from the null sentinel.
pub struct ArithmeticCalc {
    op: ArithOp,
    left: Arc<dyn DoubleCalc>,
    right: Arc<dyn DoubleCalc>,
}

impl ArithmeticCalc {
    pub fn new(op: ArithOp, left: Arc<dyn DoubleCalc>, right: Arc<dyn DoubleCalc>) -> Self {
        ArithmeticCalc { op, left, right }
    }
}

impl Calc for ArithmeticCalc {
    fn name(&self) -> &str {
        self.op.name()
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_double(self.evaluate_double(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        any_depends(&self.children(), hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

impl DoubleCalc for ArithmeticCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        let l = self.left.evaluate_double(ctx)?;
        if is_double_null(l) {
            return Ok(DOUBLE_NULL);
        }
        let r = self.right.evaluate_double(ctx)?;
        if is_double_null(r) {
            return Ok(DOUBLE_NULL);
        }
        Ok(match self.op {
            ArithOp::Add => l + r,
            ArithOp::Sub => l - r,
            ArithOp::Mul => l * r,
            ArithOp::Div => l / r,
        })
    }
}

/// Unary negation with null propagation.
pub struct NegateCalc {
    child: Arc<dyn DoubleCalc>,
}

impl NegateCalc {
    pub fn new(child: Arc<dyn DoubleCalc>) -> Self {
        NegateCalc { child }
    }
}

impl Calc for NegateCalc {
    fn name(&self) -> &str {
        "Neg"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_double(self.evaluate_double(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.child.depends_on(hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.child.as_ref()]
    }
}

impl DoubleCalc for NegateCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        let v = self.child.evaluate_double(ctx)?;
        Ok(if is_double_null(v) { DOUBLE_NULL } else { -v })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "Eq",
            CompareOp::Ne => "Ne",
            CompareOp::Lt => "Lt",
            CompareOp::Le => "Le",
            CompareOp::Gt => "Gt",
            CompareOp::Ge => "Ge",
        }
    }
}

/// Numeric comparison; a null operand yields the boolean null rather than
/// any truth value.
pub struct ComparisonCalc {
    op: CompareOp,
    left: Arc<dyn DoubleCalc>,
    right: Arc<dyn DoubleCalc>,
}

impl ComparisonCalc {
    pub fn new(op: CompareOp, left: Arc<dyn DoubleCalc>, right: Arc<dyn DoubleCalc>) -> Self {
        ComparisonCalc { op, left, right }
    }
}

impl Calc for ComparisonCalc {
    fn name(&self) -> &str {
        self.op.name()
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

impl BooleanCalc for ComparisonCalc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        let l = self.left.evaluate_double(ctx)?;
        if is_double_null(l) {
            return Ok(None);
        }
        let r = self.right.evaluate_double(ctx)?;
        if is_double_null(r) {
            return Ok(None);
        }
        Ok(Some(match self.op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
        }))
    }
}

/// `IsEmpty(<numeric>)`: true exactly when the child evaluates to the double
/// null sentinel.
pub struct IsEmptyCalc {
    child: Arc<dyn DoubleCalc>,
}

impl IsEmptyCalc {
    pub fn new(child: Arc<dyn DoubleCalc>) -> Self {
        IsEmptyCalc { child }
    }
}

impl Calc for IsEmptyCalc {
    fn name(&self) -> &str {
        "IsEmpty"
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

impl BooleanCalc for IsEmptyCalc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        let v = self.child.evaluate_double(ctx)?;
        Ok(Some(is_double_null(v)))
    }
}

/// `CoalesceEmpty(a, b, ...)`: the first non-null operand, or the double
/// null when all are null. Later operands are not evaluated once a value is
/// found.
pub struct CoalesceEmptyCalc {
    children: Vec<Arc<dyn DoubleCalc>>,
}

impl CoalesceEmptyCalc {
    pub fn new(children: Vec<Arc<dyn DoubleCalc>>) -> Self {
        assert!(
            !children.is_empty(),
            "CoalesceEmpty requires at least one operand"
        );
        CoalesceEmptyCalc { children }
    }
}

impl Calc for CoalesceEmptyCalc {
    fn name(&self) -> &str {
        "CoalesceEmpty"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_double(self.evaluate_double(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        any_depends(&self.children(), hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        self.children.iter().map(|c| c.as_ref() as &dyn Calc).collect()
    }
}

impl DoubleCalc for CoalesceEmptyCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        for child in &self.children {
            let v = child.evaluate_double(ctx)?;
            if !is_double_null(v) {
                return Ok(v);
            }
        }
        Ok(DOUBLE_NULL)
    }
}

/// Widens an integer calc to double, translating [`INT_NULL`] to
/// [`DOUBLE_NULL`] so null-ness survives the conversion.
pub struct IntToDoubleCalc {
    child: Arc<dyn IntegerCalc>,
}

impl IntToDoubleCalc {
    pub fn new(child: Arc<dyn IntegerCalc>) -> Self {
        IntToDoubleCalc { child }
    }
}

impl Calc for IntToDoubleCalc {
    fn name(&self) -> &str {
        "IntToDouble"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        Ok(Value::from_double(self.evaluate_double(ctx)?))
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.child.depends_on(hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.child.as_ref()]
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("from".to_string(), "INTEGER".to_string());
    }
}

impl DoubleCalc for IntToDoubleCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        let i = self.child.evaluate_integer(ctx)?;
        Ok(if i == INT_NULL { DOUBLE_NULL } else { i as f64 })
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

    fn lit(d: f64) -> Arc<dyn DoubleCalc> {
        Arc::new(Constant::new(Value::Double(d)))
    }

    fn null_lit() -> Arc<dyn DoubleCalc> {
        Arc::new(Constant::new(Value::Null))
    }

    #[test]
    fn arithmetic_propagates_null() {
        let mut c = ctx();
        let sum = ArithmeticCalc::new(ArithOp::Add, lit(1.0), lit(2.0));
        assert_eq!(sum.evaluate_double(&mut c).unwrap(), 3.0);

        let with_null = ArithmeticCalc::new(ArithOp::Add, lit(1.0), null_lit());
        assert!(is_double_null(with_null.evaluate_double(&mut c).unwrap()));
        // The generic entry point agrees with the typed one.
        assert_eq!(with_null.evaluate(&mut c).unwrap(), Value::Null);
    }

    #[test]
    fn division_by_zero_is_not_null() {
        let mut c = ctx();
        let div = ArithmeticCalc::new(ArithOp::Div, lit(1.0), lit(0.0));
        let v = div.evaluate_double(&mut c).unwrap();
        assert!(v.is_infinite());
        assert!(!is_double_null(v));
    }

    #[test]
    fn comparison_over_null_is_boolean_null() {
        let mut c = ctx();
        let cmp = ComparisonCalc::new(CompareOp::Lt, lit(1.0), null_lit());
        assert_eq!(cmp.evaluate_boolean(&mut c).unwrap(), None);
        let cmp = ComparisonCalc::new(CompareOp::Lt, lit(1.0), lit(2.0));
        assert_eq!(cmp.evaluate_boolean(&mut c).unwrap(), Some(true));
    }

    #[test]
    fn coalesce_empty_takes_first_non_null() {
        let mut c = ctx();
        let calc = CoalesceEmptyCalc::new(vec![null_lit(), lit(5.0), lit(9.0)]);
        assert_eq!(calc.evaluate_double(&mut c).unwrap(), 5.0);
        let all_null = CoalesceEmptyCalc::new(vec![null_lit(), null_lit()]);
        assert!(is_double_null(all_null.evaluate_double(&mut c).unwrap()));
    }

    #[test]
    fn int_widening_preserves_null() {
        let mut c = ctx();
        let null_int: Arc<dyn IntegerCalc> = Arc::new(Constant::new(Value::Null));
        let widened = IntToDoubleCalc::new(null_int);
        assert!(is_double_null(widened.evaluate_double(&mut c).unwrap()));
        let int: Arc<dyn IntegerCalc> = Arc::new(Constant::new(Value::Int(4)));
        assert_eq!(IntToDoubleCalc::new(int).evaluate_double(&mut c).unwrap(), 4.0);
    }
}
