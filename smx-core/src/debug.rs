//! Debug tables: source files, line numbers, symbols and native signatures

use crate::error::{Result, SmxError};
use crate::format::{name_at, validate_table, DebugFile, DebugLine, DebugNative, DebugSymbol};

/// Decoded debug sections of a plugin
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    /// Sorted by code address
    files: Vec<DebugFile>,
    /// Sorted by code address
    lines: Vec<DebugLine>,
    symbols: Vec<DebugSymbol>,
    natives: Vec<DebugNative>,
    /// `.dbg.strings`
    strings: Vec<u8>,
}

impl DebugInfo {
    /// Builds the tables and checks that every name offset resolves.
    /// Files and lines are ordered by address for the lookups.
    pub fn new(
        mut files: Vec<DebugFile>,
        mut lines: Vec<DebugLine>,
        symbols: Vec<DebugSymbol>,
        natives: Vec<DebugNative>,
        strings: Vec<u8>,
    ) -> Result<Self> {
        validate_table(&strings, ".dbg.strings")?;
        for file in &files {
            name_at(&strings, file.name, ".dbg.files")?;
        }
        for symbol in &symbols {
            name_at(&strings, symbol.name, ".dbg.symbols")?;
        }
        for native in &natives {
            name_at(&strings, native.name, ".dbg.natives")?;
            for arg in &native.args {
                name_at(&strings, arg.name, ".dbg.natives")?;
            }
        }

        files.sort_by_key(|f| f.addr);
        lines.sort_by_key(|l| l.addr);

        Ok(Self {
            files,
            lines,
            symbols,
            natives,
            strings,
        })
    }

    pub fn files(&self) -> &[DebugFile] {
        &self.files
    }

    pub fn lines(&self) -> &[DebugLine] {
        &self.lines
    }

    pub fn symbols(&self) -> &[DebugSymbol] {
        &self.symbols
    }

    pub fn natives(&self) -> &[DebugNative] {
        &self.natives
    }

    /// Resolves an offset into `.dbg.strings`
    pub fn string(&self, offset: u32) -> Result<&str> {
        name_at(&self.strings, offset, ".dbg.strings")
    }

    /// Name of the source file containing `addr`
    pub fn lookup_file(&self, addr: u32) -> Result<&str> {
        let index = floor_index(&self.files, addr, |f| f.addr)
            .ok_or_else(|| SmxError::NotFound(format!("file for address {addr}")))?;
        self.string(self.files[index].name)
    }

    /// Source line of the code at `addr`
    pub fn lookup_line(&self, addr: u32) -> Result<u32> {
        floor_index(&self.lines, addr, |l| l.addr)
            .map(|index| self.lines[index].line)
            .ok_or_else(|| SmxError::NotFound(format!("line for address {addr}")))
    }

    /// Name of the function whose code range contains `addr`
    pub fn lookup_function(&self, addr: u32) -> Result<&str> {
        let symbol = self
            .symbols
            .iter()
            .find(|s| s.is_function() && s.codestart <= addr && addr < s.codeend)
            .ok_or_else(|| SmxError::NotFound(format!("function for address {addr}")))?;
        self.string(symbol.name)
    }

    /// Signature of the native at `native_index`, if one was recorded
    pub fn find_native(&self, native_index: u32) -> Option<&DebugNative> {
        self.natives.iter().find(|n| n.index == native_index)
    }
}

/// Index of the last entry whose key is `<= addr`
fn floor_index<T>(entries: &[T], addr: u32, key: impl Fn(&T) -> u32) -> Option<usize> {
    let after = entries.partition_point(|entry| key(entry) <= addr);
    after.checked_sub(1)
}
