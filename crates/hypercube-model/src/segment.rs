use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::MeasureId;

/// Stable identifier for a constrainable column (a dimension attribute the
/// relational layer can group by).
pub type ColumnId = u32;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Allocate the next segment generation stamp (monotonically increasing,
/// process-wide).
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Per-column region predicate: either every value of the column (wildcard)
/// or an explicit value set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum ColumnPredicate {
    Wildcard,
    Values(BTreeSet<String>),
}

impl ColumnPredicate {
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnPredicate::Values(values.into_iter().map(Into::into).collect())
    }

    pub fn admits(&self, value: &str) -> bool {
        match self {
            ColumnPredicate::Wildcard => true,
            ColumnPredicate::Values(vs) => vs.contains(value),
        }
    }

    /// Whether this predicate's value set is a superset of `other`'s.
    pub fn contains(&self, other: &ColumnPredicate) -> bool {
        match (self, other) {
            (ColumnPredicate::Wildcard, _) => true,
            (ColumnPredicate::Values(_), ColumnPredicate::Wildcard) => false,
            (ColumnPredicate::Values(a), ColumnPredicate::Values(b)) => b.is_subset(a),
        }
    }

    /// Whether the two predicates admit at least one common value.
    pub fn intersects(&self, other: &ColumnPredicate) -> bool {
        match (self, other) {
            (ColumnPredicate::Wildcard, _) | (_, ColumnPredicate::Wildcard) => true,
            (ColumnPredicate::Values(a), ColumnPredicate::Values(b)) => {
                !a.is_disjoint(b)
            }
        }
    }

    /// Number of explicitly constrained values; wildcards count as none.
    pub fn constrained_value_count(&self) -> usize {
        match self {
            ColumnPredicate::Wildcard => 0,
            ColumnPredicate::Values(vs) => vs.len(),
        }
    }
}

/// One column's constraint inside a segment region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnConstraint {
    pub column: ColumnId,
    pub predicate: ColumnPredicate,
}

/// The identity of a segment's region: measure plus per-column predicates.
///
/// Constraints are kept sorted by column id so regions compare and hash
/// structurally. Columns not mentioned are implicitly wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentRegion {
    measure: MeasureId,
    constraints: Vec<ColumnConstraint>,
}

impl SegmentRegion {
    pub fn new(measure: MeasureId, mut constraints: Vec<ColumnConstraint>) -> Self {
        constraints.sort_by_key(|c| c.column);
        // Explicit wildcards are the same as absent columns; drop them so
        // structurally-equal regions compare equal.
        constraints.retain(|c| c.predicate != ColumnPredicate::Wildcard);
        SegmentRegion {
            measure,
            constraints,
        }
    }

    pub fn measure(&self) -> MeasureId {
        self.measure
    }

    pub fn constraints(&self) -> &[ColumnConstraint] {
        &self.constraints
    }

    pub fn predicate_for(&self, column: ColumnId) -> &ColumnPredicate {
        self.constraints
            .iter()
            .find(|c| c.column == column)
            .map(|c| &c.predicate)
            .unwrap_or(&ColumnPredicate::Wildcard)
    }

    /// Two regions overlap when they describe the same measure and their
    /// predicates intersect on every column either one constrains.
    pub fn overlaps(&self, other: &SegmentRegion) -> bool {
        if self.measure != other.measure {
            return false;
        }
        self.each_constrained_column(other)
            .all(|col| self.predicate_for(col).intersects(other.predicate_for(col)))
    }

    /// Whether this region contains the whole of `other` (same measure and a
    /// per-column superset on every constrained column).
    pub fn covers(&self, other: &SegmentRegion) -> bool {
        if self.measure != other.measure {
            return false;
        }
        self.each_constrained_column(other)
            .all(|col| self.predicate_for(col).contains(other.predicate_for(col)))
    }

    /// Whether a segment with this region can answer `request`: the measure
    /// matches, every requested coordinate is admitted, and the region does
    /// not slice away columns the request leaves unconstrained.
    pub fn satisfies(&self, request: &CellRequest) -> bool {
        if self.measure != request.measure {
            return false;
        }
        for (column, value) in &request.coordinates {
            if !self.predicate_for(*column).admits(value) {
                return false;
            }
        }
        // A narrower-than-requested column means the segment holds only a
        // slice of the values the request would aggregate over.
        self.constraints
            .iter()
            .all(|c| request.coordinates.iter().any(|(col, _)| col == &c.column))
    }

    fn each_constrained_column<'a>(
        &'a self,
        other: &'a SegmentRegion,
    ) -> impl Iterator<Item = ColumnId> + 'a {
        let mut cols: Vec<ColumnId> = self
            .constraints
            .iter()
            .chain(other.constraints.iter())
            .map(|c| c.column)
            .collect();
        cols.sort_unstable();
        cols.dedup();
        cols.into_iter()
    }

    /// Total count of explicitly constrained values, used as a crude size
    /// estimate when choosing among covering segments.
    pub fn constrained_value_count(&self) -> usize {
        self.constraints
            .iter()
            .map(|c| c.predicate.constrained_value_count())
            .sum()
    }
}

/// Immutable descriptor of a segment: its region plus a generation stamp.
///
/// The generation stamp records when the header was minted and is excluded
/// from region identity; two headers for the same region at different
/// generations describe the same data region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    region: SegmentRegion,
    generation: u64,
}

impl SegmentHeader {
    pub fn new(region: SegmentRegion) -> Self {
        SegmentHeader {
            region,
            generation: next_generation(),
        }
    }

    pub fn with_generation(region: SegmentRegion, generation: u64) -> Self {
        SegmentHeader { region, generation }
    }

    pub fn region(&self) -> &SegmentRegion {
        &self.region
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment(measure={}, gen={}", self.region.measure, self.generation)?;
        for c in &self.region.constraints {
            match &c.predicate {
                ColumnPredicate::Wildcard => write!(f, ", col{}=*", c.column)?,
                ColumnPredicate::Values(vs) => {
                    write!(f, ", col{}={{", c.column)?;
                    for (i, v) in vs.iter().enumerate() {
                        if i > 0 {
                            f.write_str(",")?;
                        }
                        f.write_str(v)?;
                    }
                    f.write_str("}")?;
                }
            }
        }
        f.write_str(")")
    }
}

/// A cell-data request: one measure plus fully-specified column coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRequest {
    pub measure: MeasureId,
    /// Sorted by column id.
    pub coordinates: Vec<(ColumnId, String)>,
}

impl CellRequest {
    pub fn new(measure: MeasureId, mut coordinates: Vec<(ColumnId, String)>) -> Self {
        coordinates.sort_by(|a, b| a.0.cmp(&b.0));
        CellRequest {
            measure,
            coordinates,
        }
    }

    pub fn coordinate(&self) -> CellCoordinate {
        CellCoordinate {
            entries: self.coordinates.clone(),
        }
    }
}

/// A concrete cell position inside a segment body, keyed by sorted
/// (column, value) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellCoordinate {
    entries: Vec<(ColumnId, String)>,
}

impl CellCoordinate {
    pub fn new(mut entries: Vec<(ColumnId, String)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        CellCoordinate { entries }
    }

    pub fn entries(&self) -> &[(ColumnId, String)] {
        &self.entries
    }

    pub fn value_for(&self, column: ColumnId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(col, _)| *col == column)
            .map(|(_, v)| v.as_str())
    }
}

/// Loaded aggregate data for one segment region.
///
/// Bodies are immutable once published; the cache index hands out `Arc`
/// clones, so a body outlives eviction of its index entry for any reader
/// still holding it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentBody {
    cells: AHashMap<CellCoordinate, f64>,
}

impl SegmentBody {
    pub fn new(cells: impl IntoIterator<Item = (CellCoordinate, f64)>) -> Self {
        SegmentBody {
            cells: cells.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Exact cell lookup; `None` when the source had no row for the
    /// coordinate.
    pub fn cell(&self, coordinate: &CellCoordinate) -> Option<f64> {
        self.cells.get(coordinate).copied()
    }

    /// Sum every cell whose coordinates agree with the request on the
    /// request's columns. Default combination policy for answering a coarser
    /// request from a finer body; callers with other policies can walk
    /// [`SegmentBody::cells`] themselves.
    pub fn rollup(&self, request: &CellRequest) -> Option<f64> {
        let mut total = None;
        for (coord, value) in &self.cells {
            let matches = request
                .coordinates
                .iter()
                .all(|(col, v)| coord.value_for(*col) == Some(v.as_str()));
            if matches {
                total = Some(total.unwrap_or(0.0) + value);
            }
        }
        total
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellCoordinate, f64)> {
        self.cells.iter().map(|(c, v)| (c, *v))
    }
}
