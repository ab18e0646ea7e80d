//! Lowers validated [`Exp`] trees into [`Calc`] trees.
//!
//! Compilers can be decorated: a wrapper like [`ProfilingCompiler`] owns the
//! [`BaseCompiler`] and passes *itself* as the `root` argument of every
//! internal node builder, so recursive child compiles at any depth re-enter
//! the outermost decorator rather than the innermost compiler. Adding a new
//! decorator means implementing [`ExpCompiler`] and delegating to the base's
//! `*_node` builders with `root = self`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hypercube_model::{Catalog, ColumnId, Hierarchy};

use crate::calc::arith::{
    ArithOp, ArithmeticCalc, CoalesceEmptyCalc, CompareOp, ComparisonCalc, IntToDoubleCalc,
    IsEmptyCalc, NegateCalc,
};
use crate::calc::logic::{AndCalc, NotCalc, OrCalc};
use crate::calc::members::{CurrentMemberCalc, MeasureCalc, TupleConstructorCalc};
use crate::calc::sets::{
    CopyListCalc, CrossJoinIterCalc, FilterCalc, HierarchyMembersCalc, IterToListCalc,
    ListToIterCalc, SetLiteralCalc,
};
use crate::calc::{
    BooleanCalc, Calc, DoubleCalc, IntegerCalc, IterCalc, ListCalc, MemberCalc, TupleCalc,
    Constant, VoidCalc,
};
use crate::context::EvalContext;
use crate::error::EngineResult;
use crate::exp::{Exp, FunKind, ParameterDef};
use crate::types::{ResultStyle, ScalarType};
use crate::value::{Value, DOUBLE_NULL, INT_NULL};

/// Maps hierarchies to the relational columns their member names constrain,
/// so a measure read can assemble a [`hypercube_model::CellRequest`] from
/// context.
#[derive(Debug, Clone, Default)]
pub struct CubeMap {
    columns: Vec<(Hierarchy, ColumnId)>,
}

impl CubeMap {
    pub fn new() -> Self {
        CubeMap::default()
    }

    pub fn map(mut self, hierarchy: &Hierarchy, column: ColumnId) -> Self {
        self.columns.push((hierarchy.clone(), column));
        self
    }

    pub fn columns(&self) -> &[(Hierarchy, ColumnId)] {
        &self.columns
    }
}

/// Handle for a registered query parameter: a unique slot index plus the
/// compiled default. The current assignment lives in the per-query
/// [`EvalContext`], keeping compiled trees immutable and shareable.
#[derive(Clone)]
pub struct ParameterSlot {
    index: usize,
    name: Arc<str>,
    ty: ScalarType,
    default: Arc<dyn Calc>,
}

impl ParameterSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ScalarType {
        self.ty
    }

    pub fn default(&self) -> &Arc<dyn Calc> {
        &self.default
    }

    pub fn set(&self, ctx: &mut EvalContext, value: Value) {
        ctx.set_parameter(self.index, value);
    }

    pub fn unset(&self, ctx: &mut EvalContext) {
        ctx.unset_parameter(self.index);
    }

    pub fn is_set(&self, ctx: &EvalContext) -> bool {
        ctx.parameter_value(self.index).is_some()
    }

    /// The assigned value, or the compiled default when unset.
    pub fn value(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        if let Some(v) = ctx.parameter_value(self.index) {
            return Ok(v.clone());
        }
        self.default.evaluate(ctx)
    }
}

/// Reads a parameter slot at evaluation time.
pub struct ParameterCalc {
    slot: ParameterSlot,
}

impl ParameterCalc {
    pub fn new(slot: ParameterSlot) -> Self {
        ParameterCalc { slot }
    }
}

impl Calc for ParameterCalc {
    fn name(&self) -> &str {
        "Parameter"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        self.slot.value(ctx)
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        // An assigned value is constant; the default may not be.
        self.slot.default.depends_on(hierarchy)
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("name".to_string(), self.slot.name.to_string());
        args.insert("index".to_string(), self.slot.index.to_string());
    }
}

impl DoubleCalc for ParameterCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        Ok(match self.slot.value(ctx)? {
            Value::Double(d) => d,
            Value::Int(i) => i as f64,
            Value::Null => DOUBLE_NULL,
            other => panic!("DOUBLE parameter '{}' holds {}", self.slot.name, other.scalar_type()),
        })
    }
}

impl IntegerCalc for ParameterCalc {
    fn evaluate_integer(&self, ctx: &mut EvalContext) -> EngineResult<i32> {
        Ok(match self.slot.value(ctx)? {
            Value::Int(i) => i,
            Value::Null => INT_NULL,
            other => panic!("INTEGER parameter '{}' holds {}", self.slot.name, other.scalar_type()),
        })
    }
}

impl BooleanCalc for ParameterCalc {
    fn evaluate_boolean(&self, ctx: &mut EvalContext) -> EngineResult<Option<bool>> {
        Ok(match self.slot.value(ctx)? {
            Value::Bool(b) => Some(b),
            Value::Null => None,
            other => panic!("BOOLEAN parameter '{}' holds {}", self.slot.name, other.scalar_type()),
        })
    }
}

/// Assigns a parameter slot for the remainder of the query: evaluates its
/// value operand and stores the result in the context. Side effect only.
pub struct ParameterAssignCalc {
    slot: ParameterSlot,
    value: Arc<dyn Calc>,
}

impl ParameterAssignCalc {
    pub fn new(slot: ParameterSlot, value: Arc<dyn Calc>) -> Self {
        ParameterAssignCalc { slot, value }
    }
}

impl Calc for ParameterAssignCalc {
    fn name(&self) -> &str {
        "SetParameter"
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        self.evaluate_void(ctx)?;
        Ok(Value::Null)
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.value.depends_on(hierarchy)
    }

    fn children(&self) -> Vec<&dyn Calc> {
        vec![self.value.as_ref()]
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        args.insert("style".to_string(), self.result_style().to_string());
        args.insert("name".to_string(), self.slot.name.to_string());
    }
}

impl VoidCalc for ParameterAssignCalc {
    fn evaluate_void(&self, ctx: &mut EvalContext) -> EngineResult<()> {
        let value = self.value.evaluate(ctx)?;
        self.slot.set(ctx, value);
        Ok(())
    }
}

/// The uniform compile surface. All methods panic on type-irreconcilable
/// input: by contract the expression tree was validated upstream, so a
/// mismatch here is a bug in the caller or in function resolution, not a
/// runtime condition.
pub trait ExpCompiler: Send + Sync {
    fn compile(&self, exp: &Exp) -> Arc<dyn Calc>;
    fn compile_boolean(&self, exp: &Exp) -> Arc<dyn BooleanCalc>;
    fn compile_integer(&self, exp: &Exp) -> Arc<dyn IntegerCalc>;
    fn compile_double(&self, exp: &Exp) -> Arc<dyn DoubleCalc>;
    fn compile_member(&self, exp: &Exp) -> Arc<dyn MemberCalc>;
    fn compile_tuple(&self, exp: &Exp) -> Arc<dyn TupleCalc>;

    /// Set-valued compile. When `mutable_required` and the natural producer
    /// yields a read-only list, a defensive-copy wrapper is inserted.
    fn compile_list(&self, exp: &Exp, mutable_required: bool) -> Arc<dyn ListCalc>;
    fn compile_iter(&self, exp: &Exp) -> Arc<dyn IterCalc>;

    /// Compile with a preference order among acceptable result styles,
    /// picking the cheapest native representation and falling back to a
    /// conversion adapter only when no native producer matches.
    fn compile_with_styles(&self, exp: &Exp, styles: &[ResultStyle]) -> Arc<dyn Calc>;

    /// Compile a parameter's default once and hand back its slot. Repeated
    /// registration under the same name returns the existing slot.
    fn register_parameter(&self, def: &ParameterDef) -> ParameterSlot;
}

/// The stock compiler: one legal strategy per node kind, no decoration.
pub struct BaseCompiler {
    catalog: Arc<Catalog>,
    cube: CubeMap,
    params: Mutex<Vec<ParameterSlot>>,
}

impl BaseCompiler {
    pub fn new(catalog: Arc<Catalog>, cube: CubeMap) -> Self {
        BaseCompiler {
            catalog,
            cube,
            params: Mutex::new(Vec::new()),
        }
    }

    /// The natural (cheapest native) style a set expression produces.
    fn natural_style(exp: &Exp) -> ResultStyle {
        match exp {
            Exp::Call { fun: FunKind::CrossJoin, .. } => ResultStyle::Iterable,
            Exp::Call { fun: FunKind::Filter, .. } => ResultStyle::MutableList,
            _ => ResultStyle::List,
        }
    }

    // Node builders. `root` is the outermost (possibly decorating) compiler;
    // every recursive child compile goes through it so decoration holds at
    // any depth.

    fn node(&self, root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn Calc> {
        match exp.resolved_type() {
            ScalarType::Boolean => self.boolean_node(root, exp),
            ScalarType::Integer => self.integer_node(root, exp),
            ScalarType::Double => self.double_node(root, exp),
            ScalarType::Member => self.member_node(root, exp),
            ScalarType::Tuple => self.tuple_node(root, exp),
            ScalarType::Set => self.list_node(root, exp),
            _ => Arc::new(Constant::new(match exp {
                Exp::Literal(v) => v.clone(),
                Exp::LevelRef(l) => Value::Level(l.clone()),
                Exp::HierarchyRef(h) => Value::Hierarchy(h.clone()),
                Exp::DimensionRef(d) => Value::Dimension(d.clone()),
                other => panic!("cannot compile {other:?} generically"),
            })),
        }
    }

    fn boolean_node(&self, root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn BooleanCalc> {
        match exp {
            Exp::Literal(v @ (Value::Bool(_) | Value::Null)) => {
                Arc::new(Constant::new(v.clone()))
            }
            Exp::Parameter { name, .. } => Arc::new(ParameterCalc::new(self.slot(name))),
            Exp::Call { fun, args } => match fun {
                FunKind::Eq | FunKind::Ne | FunKind::Lt | FunKind::Le | FunKind::Gt
                | FunKind::Ge => {
                    let op = match fun {
                        FunKind::Eq => CompareOp::Eq,
                        FunKind::Ne => CompareOp::Ne,
                        FunKind::Lt => CompareOp::Lt,
                        FunKind::Le => CompareOp::Le,
                        FunKind::Gt => CompareOp::Gt,
                        _ => CompareOp::Ge,
                    };
                    Arc::new(ComparisonCalc::new(
                        op,
                        root.compile_double(&args[0]),
                        root.compile_double(&args[1]),
                    ))
                }
                FunKind::And => Arc::new(AndCalc::new(
                    root.compile_boolean(&args[0]),
                    root.compile_boolean(&args[1]),
                )),
                FunKind::Or => Arc::new(OrCalc::new(
                    root.compile_boolean(&args[0]),
                    root.compile_boolean(&args[1]),
                )),
                FunKind::Not => Arc::new(NotCalc::new(root.compile_boolean(&args[0]))),
                FunKind::IsEmpty => {
                    Arc::new(IsEmptyCalc::new(root.compile_double(&args[0])))
                }
                other => panic!("function {other:?} is not BOOLEAN-valued"),
            },
            other => panic!("cannot compile {other:?} as BOOLEAN"),
        }
    }

    fn integer_node(&self, _root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn IntegerCalc> {
        match exp {
            Exp::Literal(v @ (Value::Int(_) | Value::Null)) => {
                Arc::new(Constant::new(v.clone()))
            }
            Exp::Parameter { name, .. } => Arc::new(ParameterCalc::new(self.slot(name))),
            other => panic!("cannot compile {other:?} as INTEGER"),
        }
    }

    fn double_node(&self, root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn DoubleCalc> {
        // Integer-typed expressions widen through an adapter rather than a
        // separate compilation strategy.
        if exp.resolved_type() == ScalarType::Integer {
            return Arc::new(IntToDoubleCalc::new(root.compile_integer(exp)));
        }
        match exp {
            Exp::Literal(v @ (Value::Double(_) | Value::Int(_) | Value::Null)) => {
                Arc::new(Constant::new(v.clone()))
            }
            Exp::MeasureRef(m) => Arc::new(MeasureCalc::new(
                m.clone(),
                self.cube.columns().to_vec(),
            )),
            Exp::Parameter { name, .. } => Arc::new(ParameterCalc::new(self.slot(name))),
            Exp::Call { fun, args } => match fun {
                FunKind::Add | FunKind::Sub | FunKind::Mul | FunKind::Div => {
                    let op = match fun {
                        FunKind::Add => ArithOp::Add,
                        FunKind::Sub => ArithOp::Sub,
                        FunKind::Mul => ArithOp::Mul,
                        _ => ArithOp::Div,
                    };
                    Arc::new(ArithmeticCalc::new(
                        op,
                        root.compile_double(&args[0]),
                        root.compile_double(&args[1]),
                    ))
                }
                FunKind::Neg => Arc::new(NegateCalc::new(root.compile_double(&args[0]))),
                FunKind::CoalesceEmpty => Arc::new(CoalesceEmptyCalc::new(
                    args.iter().map(|a| root.compile_double(a)).collect(),
                )),
                other => panic!("function {other:?} is not DOUBLE-valued"),
            },
            other => panic!("cannot compile {other:?} as DOUBLE"),
        }
    }

    fn member_node(&self, _root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn MemberCalc> {
        match exp {
            Exp::MemberRef(m) => Arc::new(Constant::new(Value::Member(m.clone()))),
            Exp::CurrentMember(h) => Arc::new(CurrentMemberCalc::new(h.clone())),
            other => panic!("cannot compile {other:?} as MEMBER"),
        }
    }

    fn tuple_node(&self, root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn TupleCalc> {
        match exp {
            Exp::Tuple(children) => Arc::new(TupleConstructorCalc::new(
                children.iter().map(|c| root.compile_member(c)).collect(),
            )),
            Exp::MemberRef(_) | Exp::CurrentMember(_) => Arc::new(TupleConstructorCalc::new(
                vec![root.compile_member(exp)],
            )),
            Exp::Literal(v @ (Value::Tuple(_) | Value::Null)) => {
                Arc::new(Constant::new(v.clone()))
            }
            other => panic!("cannot compile {other:?} as TUPLE"),
        }
    }

    fn list_node(&self, root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn ListCalc> {
        match exp {
            Exp::Members(h) => Arc::new(HierarchyMembersCalc::new(
                h.clone(),
                self.catalog.hierarchy_members(h),
            )),
            Exp::SetLiteral(tuples) => {
                let arity = exp.set_hierarchies().len();
                assert!(arity > 0, "set literal with no resolvable hierarchies");
                Arc::new(SetLiteralCalc::new(
                    arity,
                    tuples.iter().map(|t| root.compile_tuple(t)).collect(),
                ))
            }
            Exp::Call { fun: FunKind::Filter, args } => Arc::new(FilterCalc::new(
                root.compile_list(&args[0], false),
                root.compile_boolean(&args[1]),
                args[0].set_hierarchies(),
            )),
            Exp::Call { fun: FunKind::CrossJoin, .. } => {
                Arc::new(IterToListCalc::new(self.iter_node(root, exp)))
            }
            Exp::Literal(v @ Value::Set(_)) => Arc::new(Constant::new(v.clone())),
            other => panic!("cannot compile {other:?} as SET"),
        }
    }

    fn iter_node(&self, root: &dyn ExpCompiler, exp: &Exp) -> Arc<dyn IterCalc> {
        match exp {
            Exp::Call { fun: FunKind::CrossJoin, args } => Arc::new(CrossJoinIterCalc::new(
                root.compile_list(&args[0], false),
                root.compile_list(&args[1], false),
            )),
            _ => Arc::new(ListToIterCalc::new(root.compile_list(exp, false))),
        }
    }

    fn list_with_mutability(
        &self,
        root: &dyn ExpCompiler,
        exp: &Exp,
        mutable_required: bool,
    ) -> Arc<dyn ListCalc> {
        let node = self.list_node(root, exp);
        if mutable_required && node.result_style() != ResultStyle::MutableList {
            Arc::new(CopyListCalc::new(node))
        } else {
            node
        }
    }

    fn styled_node(
        &self,
        root: &dyn ExpCompiler,
        exp: &Exp,
        styles: &[ResultStyle],
    ) -> Arc<dyn Calc> {
        assert!(!styles.is_empty(), "empty result-style preference list");
        if exp.resolved_type() != ScalarType::Set {
            assert!(
                styles.contains(&ResultStyle::Value),
                "scalar expression compiled without VALUE among acceptable styles"
            );
            return root.compile(exp);
        }
        let natural = Self::natural_style(exp);
        if styles.contains(&natural) {
            return match natural {
                ResultStyle::Iterable => self.iter_node(root, exp),
                _ => self.list_node(root, exp),
            };
        }
        // No native producer matches; adapt to the most preferred style.
        match styles[0] {
            ResultStyle::Iterable => self.iter_node(root, exp),
            ResultStyle::MutableList => self.list_with_mutability(root, exp, true),
            ResultStyle::List => self.list_node(root, exp),
            ResultStyle::Value => panic!("set expression compiled with only VALUE acceptable"),
        }
    }

    fn register(&self, root: &dyn ExpCompiler, def: &ParameterDef) -> ParameterSlot {
        let mut params = self.params.lock().expect("parameter registry poisoned");
        if let Some(existing) = params.iter().find(|s| *s.name == def.name) {
            return existing.clone();
        }
        let slot = ParameterSlot {
            index: params.len(),
            name: Arc::from(def.name.as_str()),
            ty: def.ty,
            default: root.compile(&def.default),
        };
        params.push(slot.clone());
        slot
    }

    fn slot(&self, name: &str) -> ParameterSlot {
        self.params
            .lock()
            .expect("parameter registry poisoned")
            .iter()
            .find(|s| *s.name == *name)
            .cloned()
            .unwrap_or_else(|| panic!("parameter '{name}' was never registered"))
    }
}

impl ExpCompiler for BaseCompiler {
    fn compile(&self, exp: &Exp) -> Arc<dyn Calc> {
        self.node(self, exp)
    }

    fn compile_boolean(&self, exp: &Exp) -> Arc<dyn BooleanCalc> {
        self.boolean_node(self, exp)
    }

    fn compile_integer(&self, exp: &Exp) -> Arc<dyn IntegerCalc> {
        self.integer_node(self, exp)
    }

    fn compile_double(&self, exp: &Exp) -> Arc<dyn DoubleCalc> {
        self.double_node(self, exp)
    }

    fn compile_member(&self, exp: &Exp) -> Arc<dyn MemberCalc> {
        self.member_node(self, exp)
    }

    fn compile_tuple(&self, exp: &Exp) -> Arc<dyn TupleCalc> {
        self.tuple_node(self, exp)
    }

    fn compile_list(&self, exp: &Exp, mutable_required: bool) -> Arc<dyn ListCalc> {
        self.list_with_mutability(self, exp, mutable_required)
    }

    fn compile_iter(&self, exp: &Exp) -> Arc<dyn IterCalc> {
        self.iter_node(self, exp)
    }

    fn compile_with_styles(&self, exp: &Exp, styles: &[ResultStyle]) -> Arc<dyn Calc> {
        self.styled_node(self, exp, styles)
    }

    fn register_parameter(&self, def: &ParameterDef) -> ParameterSlot {
        self.register(self, def)
    }
}

/// A counting shim wrapped around double-valued nodes by
/// [`ProfilingCompiler`].
pub struct ProfiledDoubleCalc {
    inner: Arc<dyn DoubleCalc>,
    evaluations: Arc<AtomicU64>,
}

impl Calc for ProfiledDoubleCalc {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn evaluate(&self, ctx: &mut EvalContext) -> EngineResult<Value> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.inner.evaluate(ctx)
    }

    fn depends_on(&self, hierarchy: &Hierarchy) -> bool {
        self.inner.depends_on(hierarchy)
    }

    fn result_style(&self) -> ResultStyle {
        self.inner.result_style()
    }

    fn children(&self) -> Vec<&dyn Calc> {
        self.inner.children()
    }

    fn collect_arguments(&self, args: &mut BTreeMap<String, String>) {
        self.inner.collect_arguments(args);
        args.insert(
            "evaluations".to_string(),
            self.evaluations.load(Ordering::Relaxed).to_string(),
        );
    }
}

impl DoubleCalc for ProfiledDoubleCalc {
    fn evaluate_double(&self, ctx: &mut EvalContext) -> EngineResult<f64> {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.inner.evaluate_double(ctx)
    }
}

/// Decorating compiler: records every node it compiles (at any recursion
/// depth) and wraps double-valued nodes in an evaluation-counting shim.
///
/// Because the base's node builders thread the outermost compiler through
/// every recursive call, a sub-expression compiled three levels down still
/// passes through here.
pub struct ProfilingCompiler {
    inner: BaseCompiler,
    compiled: Mutex<Vec<String>>,
    evaluations: Arc<AtomicU64>,
}

impl ProfilingCompiler {
    pub fn new(inner: BaseCompiler) -> Self {
        ProfilingCompiler {
            inner,
            compiled: Mutex::new(Vec::new()),
            evaluations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Node kinds compiled so far, in compile order.
    pub fn compiled_nodes(&self) -> Vec<String> {
        self.compiled.lock().expect("profile log poisoned").clone()
    }

    /// Total double evaluations across all shimmed nodes.
    pub fn double_evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    fn record(&self, exp: &Exp) {
        self.compiled
            .lock()
            .expect("profile log poisoned")
            .push(exp_kind(exp).to_string());
    }
}

fn exp_kind(exp: &Exp) -> &'static str {
    match exp {
        Exp::Literal(_) => "Literal",
        Exp::MemberRef(_) => "MemberRef",
        Exp::LevelRef(_) => "LevelRef",
        Exp::HierarchyRef(_) => "HierarchyRef",
        Exp::DimensionRef(_) => "DimensionRef",
        Exp::MeasureRef(_) => "MeasureRef",
        Exp::CurrentMember(_) => "CurrentMember",
        Exp::Members(_) => "Members",
        Exp::Tuple(_) => "Tuple",
        Exp::SetLiteral(_) => "SetLiteral",
        Exp::Parameter { .. } => "Parameter",
        Exp::Call { fun, .. } => match fun {
            FunKind::Add => "Add",
            FunKind::Sub => "Sub",
            FunKind::Mul => "Mul",
            FunKind::Div => "Div",
            FunKind::Neg => "Neg",
            FunKind::Eq => "Eq",
            FunKind::Ne => "Ne",
            FunKind::Lt => "Lt",
            FunKind::Le => "Le",
            FunKind::Gt => "Gt",
            FunKind::Ge => "Ge",
            FunKind::And => "And",
            FunKind::Or => "Or",
            FunKind::Not => "Not",
            FunKind::IsEmpty => "IsEmpty",
            FunKind::CoalesceEmpty => "CoalesceEmpty",
            FunKind::Filter => "Filter",
            FunKind::CrossJoin => "CrossJoin",
        },
    }
}

impl ExpCompiler for ProfilingCompiler {
    fn compile(&self, exp: &Exp) -> Arc<dyn Calc> {
        self.record(exp);
        self.inner.node(self, exp)
    }

    fn compile_boolean(&self, exp: &Exp) -> Arc<dyn BooleanCalc> {
        self.record(exp);
        self.inner.boolean_node(self, exp)
    }

    fn compile_integer(&self, exp: &Exp) -> Arc<dyn IntegerCalc> {
        self.record(exp);
        self.inner.integer_node(self, exp)
    }

    fn compile_double(&self, exp: &Exp) -> Arc<dyn DoubleCalc> {
        self.record(exp);
        Arc::new(ProfiledDoubleCalc {
            inner: self.inner.double_node(self, exp),
            evaluations: self.evaluations.clone(),
        })
    }

    fn compile_member(&self, exp: &Exp) -> Arc<dyn MemberCalc> {
        self.record(exp);
        self.inner.member_node(self, exp)
    }

    fn compile_tuple(&self, exp: &Exp) -> Arc<dyn TupleCalc> {
        self.record(exp);
        self.inner.tuple_node(self, exp)
    }

    fn compile_list(&self, exp: &Exp, mutable_required: bool) -> Arc<dyn ListCalc> {
        self.record(exp);
        self.inner.list_with_mutability(self, exp, mutable_required)
    }

    fn compile_iter(&self, exp: &Exp) -> Arc<dyn IterCalc> {
        self.record(exp);
        self.inner.iter_node(self, exp)
    }

    fn compile_with_styles(&self, exp: &Exp, styles: &[ResultStyle]) -> Arc<dyn Calc> {
        self.record(exp);
        self.inner.styled_node(self, exp, styles)
    }

    fn register_parameter(&self, def: &ParameterDef) -> ParameterSlot {
        self.inner.register(self, def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CellReader, ExecutionState};
    use crate::value::is_double_null;
    use hypercube_model::CellRequest;
    use pretty_assertions::assert_eq;

    struct NoData;
    impl CellReader for NoData {
        fn cell_value(&self, _request: &CellRequest) -> EngineResult<Option<f64>> {
            Ok(None)
        }
    }

    fn ctx() -> EvalContext {
        EvalContext::new(Arc::new(NoData), ExecutionState::new())
    }

    fn catalog() -> Arc<Catalog> {
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
        Arc::new(b.build())
    }

    fn compiler(catalog: &Arc<Catalog>) -> BaseCompiler {
        BaseCompiler::new(catalog.clone(), CubeMap::new())
    }

    fn lit(d: f64) -> Exp {
        Exp::Literal(Value::Double(d))
    }

    #[test]
    fn arithmetic_tree_compiles_and_evaluates() {
        let catalog = catalog();
        let c = compiler(&catalog);
        // (2 + 3) * 4
        let exp = Exp::Call {
            fun: FunKind::Mul,
            args: vec![
                Exp::Call {
                    fun: FunKind::Add,
                    args: vec![lit(2.0), lit(3.0)],
                },
                lit(4.0),
            ],
        };
        let calc = c.compile_double(&exp);
        assert_eq!(calc.evaluate_double(&mut ctx()).unwrap(), 20.0);
    }

    #[test]
    fn integer_operand_widens_through_an_adapter() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let calc = c.compile_double(&Exp::Literal(Value::Int(7)));
        assert_eq!(calc.name(), "IntToDouble");
        assert_eq!(calc.evaluate_double(&mut ctx()).unwrap(), 7.0);
    }

    #[test]
    fn decoration_reaches_every_depth() {
        let catalog = catalog();
        let p = ProfilingCompiler::new(compiler(&catalog));
        // Not(1 < 2 + 3): the Add sits two levels below the root.
        let exp = Exp::Call {
            fun: FunKind::Not,
            args: vec![Exp::Call {
                fun: FunKind::Lt,
                args: vec![
                    lit(1.0),
                    Exp::Call {
                        fun: FunKind::Add,
                        args: vec![lit(2.0), lit(3.0)],
                    },
                ],
            }],
        };
        let calc = p.compile_boolean(&exp);
        assert_eq!(
            p.compiled_nodes(),
            vec!["Not", "Lt", "Literal", "Add", "Literal", "Literal"]
        );
        let mut c = ctx();
        assert_eq!(calc.evaluate_boolean(&mut c).unwrap(), Some(false));
        // Every double node below the root got the counting shim.
        assert!(p.double_evaluations() >= 4);
    }

    #[test]
    fn mutable_requirement_inserts_a_copy_over_shared_lists() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let gender = catalog.hierarchy_by_name("Gender").unwrap().clone();
        let exp = Exp::Members(gender);

        let shared = c.compile_list(&exp, false);
        assert_eq!(shared.result_style(), ResultStyle::List);

        let owned = c.compile_list(&exp, true);
        assert_eq!(owned.name(), "CopyList");
        let list = owned.evaluate_list(&mut ctx()).unwrap();
        assert!(list.is_mutable());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn filter_already_yields_a_mutable_list() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let gender = catalog.hierarchy_by_name("Gender").unwrap().clone();
        let exp = Exp::Call {
            fun: FunKind::Filter,
            args: vec![
                Exp::Members(gender),
                Exp::Literal(Value::Bool(true)),
            ],
        };
        let calc = c.compile_list(&exp, true);
        // No defensive copy on top of Filter's own fresh list.
        assert_eq!(calc.name(), "Filter");
    }

    #[test]
    fn style_preference_picks_the_natural_producer() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let gender = catalog.hierarchy_by_name("Gender").unwrap().clone();
        let time = catalog.hierarchy_by_name("Time").unwrap().clone();
        let join = Exp::Call {
            fun: FunKind::CrossJoin,
            args: vec![Exp::Members(gender), Exp::Members(time)],
        };
        let lazy = c.compile_with_styles(&join, ResultStyle::ANY);
        assert_eq!(lazy.result_style(), ResultStyle::Iterable);
        // A caller that cannot stream forces materialization.
        let eager = c.compile_with_styles(&join, ResultStyle::LIST_ONLY);
        assert_eq!(eager.result_style(), ResultStyle::List);
    }

    #[test]
    fn parameter_defaults_apply_until_assigned() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let slot = c.register_parameter(&ParameterDef {
            name: "rate".to_string(),
            ty: ScalarType::Double,
            default: lit(0.25),
        });
        // Same name registers once.
        let again = c.register_parameter(&ParameterDef {
            name: "rate".to_string(),
            ty: ScalarType::Double,
            default: lit(99.0),
        });
        assert_eq!(slot.index(), again.index());

        let calc = c.compile_double(&Exp::Parameter {
            name: "rate".to_string(),
            ty: ScalarType::Double,
        });
        let mut cx = ctx();
        assert!(!slot.is_set(&cx));
        assert_eq!(calc.evaluate_double(&mut cx).unwrap(), 0.25);

        slot.set(&mut cx, Value::Double(0.5));
        assert!(slot.is_set(&cx));
        assert_eq!(calc.evaluate_double(&mut cx).unwrap(), 0.5);

        slot.unset(&mut cx);
        assert_eq!(calc.evaluate_double(&mut cx).unwrap(), 0.25);
    }

    #[test]
    fn assigned_null_parameter_reads_as_the_double_null() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let slot = c.register_parameter(&ParameterDef {
            name: "rate".to_string(),
            ty: ScalarType::Double,
            default: lit(1.0),
        });
        let calc = ParameterCalc::new(slot.clone());
        let mut cx = ctx();
        slot.set(&mut cx, Value::Null);
        assert!(is_double_null(calc.evaluate_double(&mut cx).unwrap()));
    }

    #[test]
    fn parameter_assignment_is_a_side_effect_node() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let slot = c.register_parameter(&ParameterDef {
            name: "rate".to_string(),
            ty: ScalarType::Double,
            default: lit(0.25),
        });
        let assign = ParameterAssignCalc::new(slot.clone(), c.compile(&lit(0.75)));
        let mut cx = ctx();
        assign.evaluate_void(&mut cx).unwrap();
        assert!(slot.is_set(&cx));
        assert_eq!(slot.value(&mut cx).unwrap(), Value::Double(0.75));

        // Generic evaluation agrees: the same side effect, a VOID result.
        slot.unset(&mut cx);
        assert_eq!(assign.evaluate(&mut cx).unwrap(), Value::Null);
        assert!(slot.is_set(&cx));
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn unregistered_parameter_reference_is_structural() {
        let catalog = catalog();
        let c = compiler(&catalog);
        let _ = c.compile_double(&Exp::Parameter {
            name: "missing".to_string(),
            ty: ScalarType::Double,
        });
    }
}
