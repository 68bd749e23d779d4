//! SMX container format
//!
//! ```text
//! ┌──────────────────────────────────────────┐  offset 0
//! │ File Header (24 bytes)                   │
//! ├──────────────────────────────────────────┤
//! │ Section Directory (12 bytes per section) │
//! ├──────────────────────────────────────────┤  stringtab
//! │ Section names, NUL-terminated            │
//! ├──────────────────────────────────────────┤  dataoffs
//! │ Section payloads, in directory order     │  ← may be zlib-compressed
//! └──────────────────────────────────────────┘  disksize / imagesize
//! ```
//!
//! Everything before `dataoffs` is stored verbatim, so a reader can always
//! walk the directory of a compressed file.

mod cursor;
mod header;
mod name_table;
mod reader;
mod records;
mod section;
mod writer;

pub use cursor::ByteReader;
pub use header::{FileHeader, HEADER_SIZE};
pub use name_table::NameTable;
pub(crate) use name_table::{name_at, validate_table};
pub use reader::{load_file, Container, SectionView};
pub use records::{
    CodeHeader, DataHeader, DebugArg, DebugDim, DebugFile, DebugInfoHeader, DebugLine,
    DebugNative, DebugSymbol, FixedRecord, NativeRecord, PublicRecord, PubvarRecord,
    SymbolIdent, TagRecord, CODE_HEADER_SIZE, DATA_HEADER_SIZE,
};
pub use section::{SectionEntry, SECTION_ENTRY_SIZE};
pub use writer::{compress, BlobSection, ContainerBuilder, ListSection, RawSection, Section};

/// "FFPS" read as a little-endian u32
pub const MAGIC: u32 = 0x5350_4646;

/// Container version written by the encoder
pub const VERSION: u16 = 0x0102;
/// Oldest container version the decoder accepts
pub const MIN_VERSION: u16 = 0x0101;
/// Newest container version the decoder accepts
pub const MAX_VERSION: u16 = 0x0103;

/// Oldest `.code` version a plugin may declare
pub const MIN_CODE_VERSION: u8 = 1;
/// Newest `.code` version a plugin may declare
pub const MAX_CODE_VERSION: u8 = 10;

/// `.code` flag: debug sections are present
pub const CODEFLAG_DEBUG: u16 = 0x0001;

/// Only four-byte cells are supported
pub const CELL_BYTES: u8 = 4;

/// Compression applied to the payload region
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    /// zlib stream covering `[dataoffs, disksize)`
    Gz = 1,
}

impl Compression {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Compression::None),
            1 => Some(Compression::Gz),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gz => "gz",
        }
    }
}

/// Section names the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Code,
    Data,
    Publics,
    Pubvars,
    Natives,
    Names,
    Tags,
    DebugInfo,
    DebugFiles,
    DebugLines,
    DebugSymbols,
    DebugNatives,
    DebugStrings,
}

impl SectionKind {
    pub const ALL: [SectionKind; 13] = [
        SectionKind::Code,
        SectionKind::Data,
        SectionKind::Publics,
        SectionKind::Pubvars,
        SectionKind::Natives,
        SectionKind::Names,
        SectionKind::Tags,
        SectionKind::DebugInfo,
        SectionKind::DebugFiles,
        SectionKind::DebugLines,
        SectionKind::DebugSymbols,
        SectionKind::DebugNatives,
        SectionKind::DebugStrings,
    ];

    /// Exact-match lookup; unknown names yield `None`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SectionKind::Code => ".code",
            SectionKind::Data => ".data",
            SectionKind::Publics => ".publics",
            SectionKind::Pubvars => ".pubvars",
            SectionKind::Natives => ".natives",
            SectionKind::Names => ".names",
            SectionKind::Tags => ".tags",
            SectionKind::DebugInfo => ".dbg.info",
            SectionKind::DebugFiles => ".dbg.files",
            SectionKind::DebugLines => ".dbg.lines",
            SectionKind::DebugSymbols => ".dbg.symbols",
            SectionKind::DebugNatives => ".dbg.natives",
            SectionKind::DebugStrings => ".dbg.strings",
        }
    }
}
