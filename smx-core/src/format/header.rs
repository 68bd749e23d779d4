//! File header (24 bytes, packed, little-endian)

use super::cursor::ByteReader;
use super::{Compression, MAGIC, MAX_VERSION, MIN_VERSION, VERSION};
use crate::error::{Result, SmxError};

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// SMX file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Magic, always `MAGIC`
    pub magic: u32,
    /// Container version
    pub version: u16,
    pub compression: Compression,
    /// Bytes on disk, compressed tail included
    pub disksize: u32,
    /// Bytes once the tail is inflated
    pub imagesize: u32,
    /// Number of section directory entries
    pub sections: u8,
    /// Offset of the section name table
    pub stringtab: u32,
    /// First byte that may be compressed
    pub dataoffs: u32,
}

impl FileHeader {
    /// A header for an uncompressed container of the current version
    pub fn new(sections: u8, stringtab: u32, dataoffs: u32, imagesize: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            compression: Compression::None,
            disksize: imagesize,
            imagesize,
            sections,
            stringtab,
            dataoffs,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6] = self.compression as u8;
        bytes[7..11].copy_from_slice(&self.disksize.to_le_bytes());
        bytes[11..15].copy_from_slice(&self.imagesize.to_le_bytes());
        bytes[15] = self.sections;
        bytes[16..20].copy_from_slice(&self.stringtab.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.dataoffs.to_le_bytes());
        bytes
    }

    /// Parses and validates a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes, "file header");
        let magic = reader.read_u32()?;
        if magic != MAGIC {
            return Err(SmxError::format(format!("bad magic 0x{magic:08X}")));
        }

        let version = reader.read_u16()?;
        let compression_raw = reader.read_u8()?;
        let compression = Compression::from_u8(compression_raw).ok_or_else(|| {
            SmxError::format(format!("unknown compression type {compression_raw}"))
        })?;

        let header = Self {
            magic,
            version,
            compression,
            disksize: reader.read_u32()?,
            imagesize: reader.read_u32()?,
            sections: reader.read_u8()?,
            stringtab: reader.read_u32()?,
            dataoffs: reader.read_u32()?,
        };
        header.validate()?;
        Ok(header)
    }

    /// Structural checks that do not need the rest of the file
    pub fn validate(&self) -> Result<()> {
        if !(MIN_VERSION..=MAX_VERSION).contains(&self.version) {
            return Err(SmxError::format(format!(
                "unsupported version 0x{:04X}",
                self.version
            )));
        }

        let directory_end = HEADER_SIZE as u64 + self.sections as u64 * 12;
        if (self.stringtab as u64) < directory_end {
            return Err(SmxError::format("string table overlaps the section directory"));
        }
        if self.dataoffs < self.stringtab {
            return Err(SmxError::format("data region starts before the string table"));
        }
        if self.dataoffs > self.imagesize {
            return Err(SmxError::format("data region starts past the end of the image"));
        }
        match self.compression {
            Compression::None if self.disksize != self.imagesize => Err(SmxError::format(
                "uncompressed image with disksize != imagesize",
            )),
            Compression::Gz if self.disksize < self.dataoffs => {
                Err(SmxError::format("compressed region ends before it starts"))
            }
            _ => Ok(()),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression == Compression::Gz
    }
}
