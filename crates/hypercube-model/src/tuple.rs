use std::fmt;

use smallvec::SmallVec;

use crate::catalog::Member;

/// A fixed-arity ordered sequence of members, one per hierarchy position.
///
/// A tuple containing any null member does not exist: [`Tuple::new`] returns
/// `None` in that case, so downstream code never sees a populated tuple with a
/// null-member entry inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple(SmallVec<[Member; 4]>);

impl Tuple {
    /// Build a tuple from members. Returns `None` (the tuple-level null) if
    /// any position is a hierarchy's null member.
    pub fn new(members: impl IntoIterator<Item = Member>) -> Option<Tuple> {
        let mut buf = SmallVec::new();
        for member in members {
            if member.is_null() {
                return None;
            }
            buf.push(member);
        }
        Some(Tuple(buf))
    }

    /// Build a tuple from members known to be non-null.
    ///
    /// Panics if any member is a null member; use [`Tuple::new`] when the
    /// inputs may be null.
    pub fn from_members(members: impl IntoIterator<Item = Member>) -> Tuple {
        Tuple::new(members).expect("tuple positions must be non-null members")
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Member at position `i`. Panics when `i >= arity`.
    pub fn member(&self, i: usize) -> &Member {
        &self.0[i]
    }

    pub fn members(&self) -> &[Member] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.0.iter()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, member) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{member}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn tuple_with_null_member_is_tuple_level_null() {
        let mut b = Catalog::builder();
        let dim = b.add_dimension("Gender").unwrap();
        let hier = b.add_hierarchy(&dim, "Gender").unwrap();
        let level = b.add_level(&hier, "Gender", 1).unwrap();
        let m = b.add_member(&level, "M", None).unwrap();
        let catalog = b.build();
        let hier = catalog.hierarchy_by_name("Gender").unwrap();

        assert!(Tuple::new([m.clone()]).is_some());
        assert!(Tuple::new([m, hier.null_member().clone()]).is_none());
    }
}
