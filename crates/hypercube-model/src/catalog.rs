use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

/// Stable identifier for a dimension within a catalog.
pub type DimensionId = u32;
/// Stable identifier for a hierarchy within a catalog.
pub type HierarchyId = u32;
/// Stable identifier for a level within a hierarchy.
pub type LevelId = u32;
/// Stable identifier for a measure within a catalog.
pub type MeasureId = u32;
/// Catalog-wide ordinal assigned to each member in registration order.
pub type MemberOrdinal = u32;

/// Errors that can occur while assembling a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("dimension name cannot be empty")]
    EmptyDimensionName,
    #[error("duplicate hierarchy name '{0}'")]
    DuplicateHierarchy(String),
    #[error("unknown hierarchy id {0}")]
    UnknownHierarchy(HierarchyId),
    #[error("unknown level id {0}")]
    UnknownLevel(LevelId),
    #[error("level {level} does not belong to hierarchy {hierarchy}")]
    LevelHierarchyMismatch { level: LevelId, hierarchy: HierarchyId },
    #[error("duplicate measure name '{0}'")]
    DuplicateMeasure(String),
}

#[derive(Debug)]
struct DimensionData {
    id: DimensionId,
    name: String,
}

/// A dimension handle. Cheap to clone; identity is by id.
#[derive(Debug, Clone)]
pub struct Dimension(Arc<DimensionData>);

impl Dimension {
    pub fn id(&self) -> DimensionId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Dimension {}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.name)
    }
}

#[derive(Debug)]
struct HierarchyData {
    id: HierarchyId,
    name: String,
    dimension: Dimension,
    // Installed once by the catalog builder, immediately after the hierarchy
    // handle exists. Every hierarchy has exactly one null member.
    null_member: OnceLock<Member>,
}

/// A hierarchy handle. Cheap to clone; identity is by id.
#[derive(Debug, Clone)]
pub struct Hierarchy(Arc<HierarchyData>);

impl Hierarchy {
    pub fn id(&self) -> HierarchyId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn dimension(&self) -> &Dimension {
        &self.0.dimension
    }

    /// The hierarchy's distinguished null member singleton.
    ///
    /// Member-valued evaluation returns this instead of an absent value, so
    /// callers can always navigate `member.hierarchy()` safely.
    pub fn null_member(&self) -> &Member {
        self.0
            .null_member
            .get()
            .expect("catalog builder installs the null member at creation")
    }
}

impl PartialEq for Hierarchy {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Hierarchy {}

impl std::hash::Hash for Hierarchy {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for Hierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.name)
    }
}

#[derive(Debug)]
struct LevelData {
    id: LevelId,
    name: String,
    depth: u32,
    hierarchy: Hierarchy,
}

/// A level handle. Cheap to clone; identity is by id.
#[derive(Debug, Clone)]
pub struct Level(Arc<LevelData>);

impl Level {
    pub fn id(&self) -> LevelId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Distance from the hierarchy root; the all-level is depth 0.
    pub fn depth(&self) -> u32 {
        self.0.depth
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.0.hierarchy
    }
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Level {}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}].[{}]", self.0.hierarchy.name(), self.0.name)
    }
}

#[derive(Debug)]
struct MemberData {
    ordinal: MemberOrdinal,
    name: String,
    level: Level,
    parent: Option<Member>,
    is_null: bool,
}

/// A member handle. Cheap to clone; identity is by catalog ordinal.
///
/// The null member of each hierarchy is an ordinary `Member` with
/// [`Member::is_null`] set; member-valued expressions return it instead of an
/// absent value.
#[derive(Debug, Clone)]
pub struct Member(Arc<MemberData>);

impl Member {
    pub fn ordinal(&self) -> MemberOrdinal {
        self.0.ordinal
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn level(&self) -> &Level {
        &self.0.level
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        self.0.level.hierarchy()
    }

    pub fn dimension(&self) -> &Dimension {
        self.hierarchy().dimension()
    }

    pub fn parent(&self) -> Option<&Member> {
        self.0.parent.as_ref()
    }

    /// Whether this is the hierarchy's null member singleton.
    pub fn is_null(&self) -> bool {
        self.0.is_null
    }

    /// `[Hierarchy].[Parent].[Name]`-style unique name.
    pub fn unique_name(&self) -> String {
        let mut parts = vec![self.0.name.clone()];
        let mut cur = self.0.parent.clone();
        while let Some(m) = cur {
            parts.push(m.0.name.clone());
            cur = m.0.parent.clone();
        }
        parts.push(self.hierarchy().name().to_string());
        parts.reverse();
        let mut out = String::new();
        for part in parts {
            if !out.is_empty() {
                out.push('.');
            }
            out.push('[');
            out.push_str(&part);
            out.push(']');
        }
        out
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.0.ordinal == other.0.ordinal
    }
}
impl Eq for Member {}

impl std::hash::Hash for Member {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.ordinal.hash(state);
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_name())
    }
}

/// A measure definition: a named quantity with an optional display format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub id: MeasureId,
    pub name: String,
    /// Display format pattern, e.g. `"#,##0.00"`. `None` renders the raw value.
    pub format: Option<String>,
}

/// An assembled catalog: the fixed set of dimensions, hierarchies, levels,
/// members and measures one cube exposes.
///
/// Catalogs are immutable once built and are shared read-only across query
/// threads.
#[derive(Debug)]
pub struct Catalog {
    dimensions: Vec<Dimension>,
    hierarchies: Vec<Hierarchy>,
    levels: Vec<Level>,
    members: Vec<Member>,
    measures: Vec<Measure>,
    hierarchies_by_name: HashMap<String, HierarchyId>,
    measures_by_name: HashMap<String, MeasureId>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn hierarchies(&self) -> &[Hierarchy] {
        &self.hierarchies
    }

    pub fn hierarchy(&self, id: HierarchyId) -> Option<&Hierarchy> {
        self.hierarchies.iter().find(|h| h.id() == id)
    }

    pub fn hierarchy_by_name(&self, name: &str) -> Option<&Hierarchy> {
        let id = *self.hierarchies_by_name.get(name)?;
        self.hierarchy(id)
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, ordinal: MemberOrdinal) -> Option<&Member> {
        self.members.iter().find(|m| m.ordinal() == ordinal)
    }

    /// All non-null members of a hierarchy, in registration order.
    pub fn hierarchy_members(&self, hierarchy: &Hierarchy) -> Vec<Member> {
        self.members
            .iter()
            .filter(|m| !m.is_null() && m.hierarchy() == hierarchy)
            .cloned()
            .collect()
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn measure(&self, id: MeasureId) -> Option<&Measure> {
        self.measures.iter().find(|m| m.id == id)
    }

    pub fn measure_by_name(&self, name: &str) -> Option<&Measure> {
        let id = *self.measures_by_name.get(name)?;
        self.measure(id)
    }
}

/// Builder for [`Catalog`]. Ids and ordinals are assigned in registration
/// order; each hierarchy gets its null member installed at creation.
#[derive(Default)]
pub struct CatalogBuilder {
    dimensions: Vec<Dimension>,
    hierarchies: Vec<Hierarchy>,
    levels: Vec<Level>,
    members: Vec<Member>,
    measures: Vec<Measure>,
    next_ordinal: MemberOrdinal,
}

impl CatalogBuilder {
    pub fn add_dimension(&mut self, name: &str) -> Result<Dimension, CatalogError> {
        if name.is_empty() {
            return Err(CatalogError::EmptyDimensionName);
        }
        let dim = Dimension(Arc::new(DimensionData {
            id: self.dimensions.len() as DimensionId,
            name: name.to_string(),
        }));
        self.dimensions.push(dim.clone());
        Ok(dim)
    }

    pub fn add_hierarchy(
        &mut self,
        dimension: &Dimension,
        name: &str,
    ) -> Result<Hierarchy, CatalogError> {
        if self.hierarchies.iter().any(|h| h.name() == name) {
            return Err(CatalogError::DuplicateHierarchy(name.to_string()));
        }
        let hierarchy = Hierarchy(Arc::new(HierarchyData {
            id: self.hierarchies.len() as HierarchyId,
            name: name.to_string(),
            dimension: dimension.clone(),
            null_member: OnceLock::new(),
        }));
        // Null members live on a synthetic depth-0 level so navigation off a
        // null member never dead-ends.
        let null_level = Level(Arc::new(LevelData {
            id: self.levels.len() as LevelId,
            name: "(All)".to_string(),
            depth: 0,
            hierarchy: hierarchy.clone(),
        }));
        self.levels.push(null_level.clone());
        let null_member = Member(Arc::new(MemberData {
            ordinal: self.take_ordinal(),
            name: "#null".to_string(),
            level: null_level,
            parent: None,
            is_null: true,
        }));
        hierarchy
            .0
            .null_member
            .set(null_member.clone())
            .expect("null member installed exactly once");
        self.members.push(null_member);
        self.hierarchies.push(hierarchy.clone());
        Ok(hierarchy)
    }

    pub fn add_level(
        &mut self,
        hierarchy: &Hierarchy,
        name: &str,
        depth: u32,
    ) -> Result<Level, CatalogError> {
        let level = Level(Arc::new(LevelData {
            id: self.levels.len() as LevelId,
            name: name.to_string(),
            depth,
            hierarchy: hierarchy.clone(),
        }));
        self.levels.push(level.clone());
        Ok(level)
    }

    pub fn add_member(
        &mut self,
        level: &Level,
        name: &str,
        parent: Option<&Member>,
    ) -> Result<Member, CatalogError> {
        let member = Member(Arc::new(MemberData {
            ordinal: self.take_ordinal(),
            name: name.to_string(),
            level: level.clone(),
            parent: parent.cloned(),
            is_null: false,
        }));
        self.members.push(member.clone());
        Ok(member)
    }

    pub fn add_measure(
        &mut self,
        name: &str,
        format: Option<&str>,
    ) -> Result<Measure, CatalogError> {
        if self.measures.iter().any(|m| m.name == name) {
            return Err(CatalogError::DuplicateMeasure(name.to_string()));
        }
        let measure = Measure {
            id: self.measures.len() as MeasureId,
            name: name.to_string(),
            format: format.map(str::to_string),
        };
        self.measures.push(measure.clone());
        Ok(measure)
    }

    pub fn build(self) -> Catalog {
        let hierarchies_by_name = self
            .hierarchies
            .iter()
            .map(|h| (h.name().to_string(), h.id()))
            .collect();
        let measures_by_name = self
            .measures
            .iter()
            .map(|m| (m.name.clone(), m.id))
            .collect();
        Catalog {
            dimensions: self.dimensions,
            hierarchies: self.hierarchies,
            levels: self.levels,
            members: self.members,
            measures: self.measures,
            hierarchies_by_name,
            measures_by_name,
        }
    }

    fn take_ordinal(&mut self) -> MemberOrdinal {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tiny_catalog() -> Catalog {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        b.add_member(&level, "M", None).unwrap();
        b.add_member(&level, "F", None).unwrap();
        b.add_measure("Unit Sales", Some("#,##0")).unwrap();
        b.build()
    }

    #[test]
    fn null_member_is_singleton_per_hierarchy() {
        let catalog = tiny_catalog();
        let hier = catalog.hierarchy_by_name("Gender").unwrap();
        let a = hier.null_member().clone();
        let b = hier.null_member().clone();
        assert_eq!(a, b);
        assert!(a.is_null());
        assert_eq!(a.hierarchy(), hier);
    }

    #[test]
    fn hierarchy_members_excludes_null_member() {
        let catalog = tiny_catalog();
        let hier = catalog.hierarchy_by_name("Gender").unwrap();
        let names: Vec<_> = catalog
            .hierarchy_members(hier)
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["M", "F"]);
    }

    #[test]
    fn unique_names_include_parent_chain() {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Store").unwrap();
        let hier = b.add_hierarchy(&dim, "Store").unwrap();
        let country = b.add_level(&hier, "Country", 1).unwrap();
        let city = b.add_level(&hier, "City", 2).unwrap();
        let usa = b.add_member(&country, "USA", None).unwrap();
        let sf = b.add_member(&city, "San Francisco", Some(&usa)).unwrap();
        assert_eq!(sf.unique_name(), "[Store].[USA].[San Francisco]");
    }

    #[test]
    fn measure_lookup_by_name() {
        let catalog = tiny_catalog();
        let m = catalog.measure_by_name("Unit Sales").unwrap();
        assert_eq!(m.format.as_deref(), Some("#,##0"));
        assert!(catalog.measure_by_name("Profit").is_none());
    }
}
