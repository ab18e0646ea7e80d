use hypercube_model::{Dimension, Hierarchy, Level, Measure, Member};

use crate::types::ScalarType;
use crate::value::Value;

/// Function/operator identifiers the compiler knows how to lower.
///
/// Resolution (name lookup, overload selection) happens in the validator,
/// outside this crate; by the time an [`Exp`] arrives here the function and
/// its argument types are already fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunKind {
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    IsEmpty,
    CoalesceEmpty,
    Filter,
    CrossJoin,
}

/// A validated logical expression, as handed over by the parser/validator.
///
/// Every node carries enough resolved information ([`Exp::resolved_type`])
/// that the compiler never re-validates; a tree that fails to type here is a
/// bug in the producer, not a runtime condition.
#[derive(Debug, Clone)]
pub enum Exp {
    Literal(Value),
    /// A catalog member mentioned by name, e.g. `[Gender].[M]`. A constant:
    /// it does not depend on its own hierarchy's current member.
    MemberRef(Member),
    LevelRef(Level),
    HierarchyRef(Hierarchy),
    DimensionRef(Dimension),
    /// A measure read through the cell reader, e.g. `[Measures].[Unit Sales]`.
    MeasureRef(Measure),
    /// `<Hierarchy>.CurrentMember`.
    CurrentMember(Hierarchy),
    /// `<Hierarchy>.Members` — the set of all non-null members.
    Members(Hierarchy),
    /// Tuple constructor over member-valued children.
    Tuple(Vec<Exp>),
    /// `{ ... }` set literal over tuple-valued children.
    SetLiteral(Vec<Exp>),
    /// Reference to a query parameter registered with the compiler.
    Parameter { name: String, ty: ScalarType },
    Call { fun: FunKind, args: Vec<Exp> },
}

impl Exp {
    /// The static type the validator resolved for this node.
    pub fn resolved_type(&self) -> ScalarType {
        match self {
            Exp::Literal(v) => v.scalar_type(),
            Exp::MemberRef(_) => ScalarType::Member,
            Exp::LevelRef(_) => ScalarType::Level,
            Exp::HierarchyRef(_) => ScalarType::Hierarchy,
            Exp::DimensionRef(_) => ScalarType::Dimension,
            Exp::MeasureRef(_) => ScalarType::Double,
            Exp::CurrentMember(_) => ScalarType::Member,
            Exp::Members(_) => ScalarType::Set,
            Exp::Tuple(_) => ScalarType::Tuple,
            Exp::SetLiteral(_) => ScalarType::Set,
            Exp::Parameter { ty, .. } => *ty,
            Exp::Call { fun, .. } => match fun {
                FunKind::Add
                | FunKind::Sub
                | FunKind::Mul
                | FunKind::Div
                | FunKind::Neg
                | FunKind::CoalesceEmpty => ScalarType::Double,
                FunKind::Eq
                | FunKind::Ne
                | FunKind::Lt
                | FunKind::Le
                | FunKind::Gt
                | FunKind::Ge
                | FunKind::And
                | FunKind::Or
                | FunKind::Not
                | FunKind::IsEmpty => ScalarType::Boolean,
                FunKind::Filter | FunKind::CrossJoin => ScalarType::Set,
            },
        }
    }

    /// The hierarchies a set-valued expression spans, in tuple position
    /// order. Used by the compiler to know which hierarchies a construct like
    /// `Filter` pins before evaluating its predicate.
    pub fn set_hierarchies(&self) -> Vec<Hierarchy> {
        match self {
            Exp::Members(h) => vec![h.clone()],
            Exp::SetLiteral(tuples) => tuples
                .first()
                .map(Exp::set_hierarchies)
                .unwrap_or_default(),
            Exp::Tuple(children) => children
                .iter()
                .flat_map(Exp::set_hierarchies)
                .collect(),
            Exp::MemberRef(m) => vec![m.hierarchy().clone()],
            Exp::CurrentMember(h) => vec![h.clone()],
            Exp::Call { fun, args } => match fun {
                FunKind::Filter => args
                    .first()
                    .map(Exp::set_hierarchies)
                    .unwrap_or_default(),
                FunKind::CrossJoin => args
                    .iter()
                    .flat_map(Exp::set_hierarchies)
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

/// A query parameter declaration: a name, a declared type, and a default
/// value expression compiled once at [`register_parameter`] time.
///
/// [`register_parameter`]: crate::compiler::ExpCompiler::register_parameter
#[derive(Debug, Clone)]
pub struct ParameterDef {
    pub name: String,
    pub ty: ScalarType,
    pub default: Exp,
}
