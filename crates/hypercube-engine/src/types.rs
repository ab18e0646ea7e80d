use std::fmt;

/// How a compiled expression represents its evaluated result.
///
/// Scalar expressions are always [`ResultStyle::Value`]. Set-valued
/// expressions declare whether they hand back a fresh mutable list, a shared
/// read-only list, or a lazy forward-only iterable; callers that need
/// mutability must copy when the declared style is not [`MutableList`].
///
/// [`MutableList`]: ResultStyle::MutableList
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultStyle {
    /// A scalar (or other non-set) value.
    Value,
    /// A freshly-allocated list the caller may mutate.
    MutableList,
    /// A randomly-indexable list the caller must not mutate.
    List,
    /// A lazy, forward-only, single-pass sequence.
    Iterable,
}

impl ResultStyle {
    pub fn is_list(self) -> bool {
        matches!(self, ResultStyle::MutableList | ResultStyle::List)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultStyle::Value => "VALUE",
            ResultStyle::MutableList => "MUTABLE_LIST",
            ResultStyle::List => "LIST",
            ResultStyle::Iterable => "ITERABLE",
        }
    }

    /// Any style, cheapest first.
    pub const ANY: &'static [ResultStyle] = &[
        ResultStyle::Iterable,
        ResultStyle::List,
        ResultStyle::MutableList,
        ResultStyle::Value,
    ];
    /// Only list styles, read-only preferred.
    pub const LIST_ONLY: &'static [ResultStyle] =
        &[ResultStyle::List, ResultStyle::MutableList];
    /// List styles, mutable preferred.
    pub const MUTABLE_LIST_FIRST: &'static [ResultStyle] =
        &[ResultStyle::MutableList, ResultStyle::List];
    /// Lazy iteration preferred, lists acceptable.
    pub const ITERABLE_FIRST: &'static [ResultStyle] = &[
        ResultStyle::Iterable,
        ResultStyle::List,
        ResultStyle::MutableList,
    ];
}

impl fmt::Display for ResultStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The static type a compiled expression is requested to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Boolean,
    Integer,
    Double,
    String,
    DateTime,
    Member,
    Level,
    Hierarchy,
    Dimension,
    Tuple,
    Set,
    Void,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::Integer => "INTEGER",
            ScalarType::Double => "DOUBLE",
            ScalarType::String => "STRING",
            ScalarType::DateTime => "DATETIME",
            ScalarType::Member => "MEMBER",
            ScalarType::Level => "LEVEL",
            ScalarType::Hierarchy => "HIERARCHY",
            ScalarType::Dimension => "DIMENSION",
            ScalarType::Tuple => "TUPLE",
            ScalarType::Set => "SET",
            ScalarType::Void => "VOID",
        }
    }

    /// Whether a value of this type can be implicitly widened to `target`.
    pub fn converts_to(self, target: ScalarType) -> bool {
        self == target || matches!((self, target), (ScalarType::Integer, ScalarType::Double))
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
