//! Deduplicated string table
//!
//! Names are stored back to back, each followed by a NUL. Other records refer
//! to a name by its byte offset into the table.

use std::collections::HashMap;

use crate::error::{Result, SmxError};

/// Interning string table used for `.names`, `.dbg.strings` and the
/// section-name table
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    /// Unique names, first-seen order
    names: Vec<String>,
    /// name -> offset
    index: HashMap<String, u32>,
    /// Serialized size so far
    length: u32,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a name and returns its offset. Adding the same name again
    /// returns the offset it got the first time.
    pub fn add(&mut self, name: &str) -> u32 {
        if let Some(&offset) = self.index.get(name) {
            return offset;
        }

        let offset = self.length;
        self.length += name.len() as u32 + 1;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), offset);
        offset
    }

    /// Serialized size in bytes
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Offset of a name that was already added
    pub fn offset_of(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    /// Appends every name plus its NUL terminator
    pub fn write(&self, out: &mut Vec<u8>) {
        for name in &self.names {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.length as usize);
        self.write(&mut out);
        out
    }
}

/// Checks that a serialized table is empty or NUL-terminated, so every
/// in-range offset resolves to a terminated string
pub(crate) fn validate_table(table: &[u8], what: &str) -> Result<()> {
    match table.last() {
        None | Some(0) => Ok(()),
        Some(_) => Err(SmxError::format(format!("{what} is not NUL-terminated"))),
    }
}

/// Resolves a name offset inside a validated table
pub(crate) fn name_at<'a>(table: &'a [u8], offset: u32, what: &str) -> Result<&'a str> {
    let start = offset as usize;
    if start >= table.len() {
        return Err(SmxError::format(format!(
            "{what} name offset {offset} outside a {}-byte table",
            table.len()
        )));
    }

    let tail = &table[start..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    std::str::from_utf8(&tail[..end])
        .map_err(|_| SmxError::format(format!("{what} name at {offset} is not valid UTF-8")))
}
