//! Section directory entries

use super::cursor::ByteReader;
use crate::error::Result;

/// Directory entry size in bytes
pub const SECTION_ENTRY_SIZE: usize = 12;

/// One section directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEntry {
    /// Name offset, relative to the string table
    pub nameoffs: u32,
    /// Absolute offset of the payload in the image
    pub dataoffs: u32,
    /// Payload size in bytes
    pub size: u32,
}

impl SectionEntry {
    pub fn new(nameoffs: u32, dataoffs: u32, size: u32) -> Self {
        Self {
            nameoffs,
            dataoffs,
            size,
        }
    }

    pub fn to_bytes(&self) -> [u8; SECTION_ENTRY_SIZE] {
        let mut bytes = [0u8; SECTION_ENTRY_SIZE];
        bytes[0..4].copy_from_slice(&self.nameoffs.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.dataoffs.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            nameoffs: reader.read_u32()?,
            dataoffs: reader.read_u32()?,
            size: reader.read_u32()?,
        })
    }

    /// One past the last payload byte
    pub fn end(&self) -> u64 {
        self.dataoffs as u64 + self.size as u64
    }
}
