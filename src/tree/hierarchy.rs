use crate::error::{ArdatError, Result};
use std::collections::HashMap;

/// Index of `/`-joined paths to their immediate children, in first-seen order
#[derive(Debug, Default, Clone)]
pub struct FileHierarchy {
    children: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl FileHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path`, inserting any ancestors not seen yet.
    /// Returns false if the path was already present.
    pub fn add(&mut self, path: &str) -> bool {
        if self.children.contains_key(path) {
            return false;
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add(parent);
            if let Some(siblings) = self.children.get_mut(parent) {
                siblings.push(path.to_string());
            }
        }
        self.children.insert(path.to_string(), Vec::new());
        self.order.push(path.to_string());
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.children.contains_key(path)
    }

    pub fn children(&self, path: &str) -> &[String] {
        self.children.get(path).map_or(&[], |c| c.as_slice())
    }

    /// All paths in insertion order
    pub fn paths(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The one path made of a single name
    pub fn root(&self) -> Result<&str> {
        let mut roots = self.order.iter().filter(|p| name_count(p) == 1);
        match (roots.next(), roots.next()) {
            (Some(root), None) => Ok(root),
            (None, _) => Err(ArdatError::corrupted("archive has no root entry")),
            (Some(a), Some(b)) => Err(ArdatError::corrupted(format!(
                "archive has several roots ({} and {})",
                a, b
            ))),
        }
    }
}

pub fn name_count(path: &str) -> usize {
    path.split('/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_inserts_ancestors() {
        let mut hierarchy = FileHierarchy::new();
        assert!(hierarchy.add("chain1/subDir/subFile"));
        assert!(hierarchy.contains("chain1"));
        assert!(hierarchy.contains("chain1/subDir"));
        assert_eq!(hierarchy.children("chain1"), ["chain1/subDir"]);
        assert_eq!(hierarchy.children("chain1/subDir"), ["chain1/subDir/subFile"]);
        assert_eq!(hierarchy.root().unwrap(), "chain1");
        assert!(!hierarchy.add("chain1/subDir"));
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut hierarchy = FileHierarchy::new();
        for path in ["r", "r/zeta", "r/alpha", "r/mid"] {
            hierarchy.add(path);
        }
        assert_eq!(hierarchy.children("r"), ["r/zeta", "r/alpha", "r/mid"]);
        assert_eq!(hierarchy.paths(), ["r", "r/zeta", "r/alpha", "r/mid"]);
        assert!(hierarchy.children("r/zeta").is_empty());
        assert!(hierarchy.children("nowhere").is_empty());
    }

    #[test]
    fn test_root_must_be_unique() {
        let mut hierarchy = FileHierarchy::new();
        assert!(hierarchy.root().is_err());
        hierarchy.add("a");
        hierarchy.add("b/c");
        assert!(hierarchy.root().unwrap_err().is_corrupted());
    }
}
