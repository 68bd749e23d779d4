//! Name-sorted tables
//!
//! Publics, pubvars and natives are sorted by name when a plugin is
//! assembled, so lookups binary search. A table that turns out not to be
//! sorted at load time falls back to a linear scan.

use crate::error::{Result, SmxError};

/// Anything stored in a name-sorted table
pub trait Named {
    fn name(&self) -> &str;
}

/// Table of named entries with an index-stable order
#[derive(Debug, Clone)]
pub struct NameSorted<T> {
    entries: Vec<T>,
    sorted: bool,
}

impl<T: Named> NameSorted<T> {
    /// Wraps entries in file order and records whether they are sorted
    pub fn new(entries: Vec<T>) -> Self {
        let sorted = entries.windows(2).all(|w| w[0].name() <= w[1].name());
        Self { entries, sorted }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        self.entries.get(index).ok_or(SmxError::Index {
            index,
            len: self.entries.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Index of the entry called `name`
    pub fn find(&self, name: &str) -> Result<usize> {
        let found = if self.sorted {
            self.entries
                .binary_search_by(|entry| entry.name().cmp(name))
                .ok()
        } else {
            self.entries.iter().position(|entry| entry.name() == name)
        };
        found.ok_or_else(|| SmxError::NotFound(name.to_string()))
    }
}

/// Exported function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicInfo {
    pub name: String,
    /// Offset into the code blob
    pub code_offset: u32,
}

impl Named for PublicInfo {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Exported variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubvarInfo {
    pub name: String,
    /// Local address in plugin memory
    pub address: u32,
}

impl Named for PubvarInfo {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Native the plugin imports from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDecl {
    pub name: String,
}

impl Named for NativeDecl {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Static type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub id: u32,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn natives(names: &[&str]) -> NameSorted<NativeDecl> {
        NameSorted::new(
            names
                .iter()
                .map(|n| NativeDecl {
                    name: n.to_string(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_find_every_present_name() {
        let table = natives(&["Alpha", "Beta", "Gamma", "Omega"]);
        assert!(table.is_sorted());
        for (i, name) in ["Alpha", "Beta", "Gamma", "Omega"].iter().enumerate() {
            assert_eq!(table.find(name).unwrap(), i);
        }
    }

    #[test]
    fn test_find_absent_names() {
        let table = natives(&["Beta", "Delta"]);
        for name in ["Alpha", "Charlie", "Echo", "", "beta"] {
            assert!(matches!(table.find(name), Err(SmxError::NotFound(_))));
        }
    }

    #[test]
    fn test_byte_order_sorting() {
        // Upper case sorts before lower case
        let table = natives(&["Zed", "alpha"]);
        assert!(table.is_sorted());
        assert_eq!(table.find("alpha").unwrap(), 1);
    }

    #[test]
    fn test_unsorted_falls_back_to_scan() {
        let table = natives(&["Gamma", "Alpha", "Beta"]);
        assert!(!table.is_sorted());
        assert_eq!(table.find("Alpha").unwrap(), 1);
        assert_eq!(table.find("Gamma").unwrap(), 0);
        assert!(table.find("Delta").is_err());
    }

    #[test]
    fn test_get_out_of_range() {
        let table = natives(&["Foo"]);
        assert_eq!(table.get(0).unwrap().name, "Foo");
        assert!(matches!(
            table.get(1),
            Err(SmxError::Index { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_empty_table() {
        let table = natives(&[]);
        assert!(table.is_sorted());
        assert!(table.find("Foo").is_err());
    }
}
