//! Container decoder
//!
//! Turns file bytes into one contiguous, inflated image plus a parsed
//! section directory. Interpreting the sections is left to
//! [`PluginImage`](crate::PluginImage).

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use smx_config::{LoadConfig, Stage};
use smx_log::{debug, trace, warn, Logger};

use super::cursor::{slice_at, ByteReader};
use super::header::{FileHeader, HEADER_SIZE};
use super::name_table::{name_at, validate_table};
use super::section::SectionEntry;
use super::{Compression, SectionKind};
use crate::error::{Result, SmxError};

/// A directory entry with its resolved name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionView {
    pub name: String,
    /// `None` for names the decoder does not know
    pub kind: Option<SectionKind>,
    pub entry: SectionEntry,
}

/// A decoded container: header, directory and the inflated image
#[derive(Debug, Clone)]
pub struct Container {
    header: FileHeader,
    sections: Vec<SectionView>,
    image: Vec<u8>,
}

impl Container {
    /// Parses with default limits and no logging
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes, &LoadConfig::default(), &Logger::noop())
    }

    pub fn parse(bytes: &[u8], config: &LoadConfig, logger: &Arc<Logger>) -> Result<Self> {
        let result = Self::parse_inner(bytes, config, logger);
        if let Err(e) = &result {
            warn!(logger, target: Stage::Reader.target(), "rejected container: {}", e);
        }
        result
    }

    fn parse_inner(bytes: &[u8], config: &LoadConfig, logger: &Arc<Logger>) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SmxError::format(format!(
                "{} bytes is too short for a file header",
                bytes.len()
            )));
        }

        let header = FileHeader::from_bytes(&bytes[..HEADER_SIZE])?;
        if header.imagesize > config.max_image_size {
            return Err(SmxError::format(format!(
                "image size {} exceeds the limit of {}",
                header.imagesize, config.max_image_size
            )));
        }

        let image = match header.compression {
            Compression::None => {
                debug!(
                    logger,
                    target: Stage::Reader.target(),
                    "uncompressed image, {} bytes",
                    header.imagesize
                );
                slice_at(bytes, 0, header.imagesize as usize, "image")?.to_vec()
            }
            Compression::Gz => {
                debug!(
                    logger,
                    target: Stage::Reader.target(),
                    "inflating {} bytes at {} into {}",
                    header.disksize - header.dataoffs,
                    header.dataoffs,
                    header.imagesize - header.dataoffs
                );
                inflate_image(bytes, &header)?
            }
        };

        let sections = read_directory(&image, &header, logger)?;

        Ok(Self {
            header,
            sections,
            image,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Directory in file order, duplicates included
    pub fn sections(&self) -> &[SectionView] {
        &self.sections
    }

    /// The full inflated image
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    /// Payload of the first section with this name
    pub fn find_section(&self, name: &str) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| self.payload(&s.entry))
    }

    pub fn section(&self, kind: SectionKind) -> Option<&[u8]> {
        self.find_section(kind.name())
    }

    pub fn has_section(&self, kind: SectionKind) -> bool {
        self.section(kind).is_some()
    }

    fn payload(&self, entry: &SectionEntry) -> &[u8] {
        // Bounds were checked in read_directory
        &self.image[entry.dataoffs as usize..entry.end() as usize]
    }

    /// The same container with an uncompressed payload region
    pub fn to_uncompressed_bytes(&self) -> Vec<u8> {
        let mut header = self.header;
        header.compression = Compression::None;
        header.disksize = header.imagesize;

        let mut out = self.image.clone();
        out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        out
    }
}

fn inflate_image(bytes: &[u8], header: &FileHeader) -> Result<Vec<u8>> {
    let dataoffs = header.dataoffs as usize;
    let disksize = header.disksize as usize;
    let expected = (header.imagesize - header.dataoffs) as usize;

    if bytes.len() < disksize {
        return Err(SmxError::format(format!(
            "file is {} bytes, header declares {}",
            bytes.len(),
            disksize
        )));
    }

    let mut image = Vec::with_capacity(header.imagesize as usize);
    image.extend_from_slice(&bytes[..dataoffs]);

    let decoder = ZlibDecoder::new(&bytes[dataoffs..disksize]);
    let inflated = decoder
        .take(expected as u64 + 1)
        .read_to_end(&mut image)
        .map_err(|e| SmxError::Decompressor(e.to_string()))?;

    if inflated != expected {
        return Err(SmxError::Decompressor(format!(
            "inflated {inflated} bytes, expected {expected}"
        )));
    }
    Ok(image)
}

fn read_directory(
    image: &[u8],
    header: &FileHeader,
    logger: &Arc<Logger>,
) -> Result<Vec<SectionView>> {
    let names = slice_at(
        image,
        header.stringtab as usize,
        (header.dataoffs - header.stringtab) as usize,
        "section name table",
    )?;
    validate_table(names, "section name table")?;

    let directory_len = header.sections as usize * super::section::SECTION_ENTRY_SIZE;
    let directory = slice_at(image, HEADER_SIZE, directory_len, "section directory")?;
    let mut reader = ByteReader::new(directory, "section directory");

    let mut sections = Vec::with_capacity(header.sections as usize);
    for _ in 0..header.sections {
        let entry = SectionEntry::read(&mut reader)?;
        let name = name_at(names, entry.nameoffs, "section")?.to_string();

        if entry.end() > image.len() as u64 {
            return Err(SmxError::format(format!(
                "section {name} at {}+{} lies outside the {}-byte image",
                entry.dataoffs,
                entry.size,
                image.len()
            )));
        }

        let kind = SectionKind::from_name(&name);
        trace!(
            logger,
            target: Stage::Reader.target(),
            "section {} at {} ({} bytes){}",
            name,
            entry.dataoffs,
            entry.size,
            if kind.is_none() { ", ignored" } else { "" }
        );
        sections.push(SectionView { name, kind, entry });
    }

    Ok(sections)
}

/// Reads and decodes a container file
pub fn load_file(
    path: impl AsRef<Path>,
    config: &LoadConfig,
    logger: &Arc<Logger>,
) -> Result<Container> {
    let bytes = std::fs::read(path)?;
    Container::parse(&bytes, config, logger)
}
