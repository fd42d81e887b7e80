//! Materialized paths for the group hierarchy.
//!
//! A path is the `.`-joined chain of group ids from the root to the group
//! itself, so ancestry is a label-prefix test and depth is the label count
//! minus one. Labels follow the Postgres `ltree` label alphabet so the same
//! string can be stored in an `ltree` column unchanged.
use crate::errors::{Error, Result};
use std::fmt;

pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HierarchyPath {
    labels: Vec<String>,
}

impl HierarchyPath {
    /// Path of a root group.
    pub fn root(id: &str) -> Self {
        Self {
            labels: vec![id.to_string()],
        }
    }

    pub fn parse(path: &str) -> Result<Self> {
        let labels: Vec<String> = path.split(PATH_SEPARATOR).map(str::to_string).collect();
        if labels.iter().any(|label| !is_valid_label(label)) {
            return Err(Error::MalformedEntity(format!("invalid group path: {path}")));
        }
        Ok(Self { labels })
    }

    /// Path of a direct child called `id`.
    pub fn child(&self, id: &str) -> Self {
        let mut labels = self.labels.clone();
        labels.push(id.to_string());
        Self { labels }
    }

    /// Depth in the tree; roots sit at level 0.
    pub fn level(&self) -> u64 {
        (self.labels.len() - 1) as u64
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Id of the group this path ends at.
    pub fn leaf(&self) -> &str {
        self.labels.last().map(String::as_str).unwrap_or_default()
    }

    /// Strict ancestry: a path is not its own ancestor.
    pub fn is_ancestor_of(&self, other: &HierarchyPath) -> bool {
        self.labels.len() < other.labels.len() && other.labels.starts_with(&self.labels)
    }

    pub fn is_descendant_of(&self, other: &HierarchyPath) -> bool {
        other.is_ancestor_of(self)
    }

    pub fn distance(&self, other: &HierarchyPath) -> u64 {
        self.level().abs_diff(other.level())
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for label in &self.labels {
            if !first {
                write!(f, "{PATH_SEPARATOR}")?;
            }
            f.write_str(label)?;
            first = false;
        }
        Ok(())
    }
}

pub(crate) fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_path_appends_the_child_id() {
        let root = HierarchyPath::root("A");
        let child = root.child("B");
        assert_eq!(child.to_string(), "A.B");
        assert_eq!(child.level(), 1);
        assert_eq!(child.leaf(), "B");
        assert_eq!(root.level(), 0);
    }

    #[test]
    fn ancestry_is_a_strict_label_prefix() {
        let a = HierarchyPath::parse("A").expect("path");
        let ab = HierarchyPath::parse("A.B").expect("path");
        let abc = HierarchyPath::parse("A.B.C").expect("path");
        let ab2 = HierarchyPath::parse("A.BB").expect("path");

        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&abc));
        assert!(abc.is_descendant_of(&a));
        assert!(!ab.is_ancestor_of(&ab));
        // Prefix on labels, not on characters.
        assert!(!ab.is_ancestor_of(&ab2));
        assert_eq!(abc.distance(&a), 2);
    }

    #[test]
    fn parse_rejects_empty_and_unsafe_labels() {
        for bad in ["", "A..B", ".A", "A.b-c", "A.B C"] {
            assert!(HierarchyPath::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn ordering_is_preorder() {
        let mut paths: Vec<HierarchyPath> = ["A.B.C", "B", "A", "A.B", "A.C"]
            .iter()
            .map(|p| HierarchyPath::parse(p).expect("path"))
            .collect();
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["A", "A.B", "A.B.C", "A.C", "B"]);
    }
}
