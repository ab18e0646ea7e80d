#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Compiled-expression evaluation core and segment cache index for Hypercube.
//!
//! A validated logical expression tree ([`Exp`]) is lowered by an
//! [`ExpCompiler`] into a tree of [`Calc`] nodes, which is then evaluated
//! repeatedly (once per cell or tuple) against a mutable dimensional
//! [`EvalContext`]. Compiled trees are immutable and shared read-only across
//! query threads; each query owns its context.
//!
//! Aggregate data flows in through the [`cache::SegmentCacheIndex`], the only
//! structure mutated by more than one query thread. It tracks which segment
//! regions are resident, in flight, or failed, and guarantees at most one
//! concurrent load per conflicting region.
//!
//! Set-valued results move through the tuple iteration layer
//! ([`cursor::TupleCursor`], [`cursor::TupleList`]); compiled plans can be
//! rendered for inspection with [`writer::CalcWriter`].

pub mod cache;
pub mod calc;
pub mod compiler;
pub mod context;
pub mod cursor;
pub mod error;
pub mod exp;
pub mod result;
pub mod types;
pub mod value;
pub mod writer;

pub use cache::{CacheStats, LoadRequest, LoadTicket, SegmentCacheIndex, SegmentLoader};
pub use calc::{
    BooleanCalc, Calc, DateTimeCalc, DimensionCalc, DoubleCalc, HierarchyCalc, IntegerCalc,
    IterCalc, LevelCalc, ListCalc, MemberCalc, StringCalc, TupleCalc, VoidCalc,
};
pub use compiler::{
    BaseCompiler, CubeMap, ExpCompiler, ParameterAssignCalc, ParameterSlot, ProfilingCompiler,
};
pub use context::{CachingCellReader, CellReader, EvalContext, ExecutionState, Savepoint};
pub use cursor::{MemberList, TupleCursor, TupleIterable, TupleList};
pub use error::{CacheError, EngineError, EngineResult};
pub use exp::{Exp, FunKind, ParameterDef};
pub use result::{Axis, Cell, CellSet, Position};
pub use types::{ResultStyle, ScalarType};
pub use value::{is_double_null, Value, DOUBLE_NULL, INT_NULL};
