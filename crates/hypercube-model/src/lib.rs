#![forbid(unsafe_code)]

//! Core in-memory dimensional model for Hypercube.
//!
//! This crate holds the catalog objects an evaluation engine resolves against
//! (dimensions, hierarchies, levels, members), fixed-arity [`Tuple`]s, and the
//! segment descriptors ([`SegmentHeader`], [`SegmentBody`]) used by the
//! aggregate-data cache. It contains no evaluation logic; the engine crate
//! builds on these types.

pub mod catalog;
pub mod segment;
pub mod tuple;

pub use catalog::{
    Catalog, CatalogBuilder, CatalogError, Dimension, Hierarchy, Level, Measure, Member,
    DimensionId, HierarchyId, LevelId, MeasureId, MemberOrdinal,
};
pub use segment::{
    CellCoordinate, CellRequest, ColumnConstraint, ColumnId, ColumnPredicate, SegmentBody,
    SegmentHeader, SegmentRegion,
};
pub use tuple::Tuple;
