//! Decoded plugin
//!
//! A `PluginImage` owns the inflated container buffer. Code and data are
//! ranges into that buffer; the symbol tables are decoded once at load.
//! The image is read-only and is shared between contexts through an `Arc`.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use smx_config::{LoadConfig, Stage};
use smx_log::{debug, Logger};

use crate::debug::DebugInfo;
use crate::error::{Result, SmxError};
use crate::format::{
    name_at, validate_table, ByteReader, CodeHeader, Container, DataHeader, DebugFile,
    DebugInfoHeader, DebugLine, DebugNative, DebugSymbol, FileHeader, FixedRecord, NativeRecord,
    PublicRecord, PubvarRecord, SectionKind, SectionView, TagRecord, CELL_BYTES, CODEFLAG_DEBUG,
    MAX_CODE_VERSION, MIN_CODE_VERSION,
};
use crate::lookup::{NameSorted, NativeDecl, PublicInfo, PubvarInfo, TagInfo};

/// A loaded plugin
#[derive(Debug)]
pub struct PluginImage {
    container: Container,
    code_header: CodeHeader,
    code: Range<usize>,
    data_header: DataHeader,
    data: Range<usize>,
    publics: NameSorted<PublicInfo>,
    pubvars: NameSorted<PubvarInfo>,
    natives: NameSorted<NativeDecl>,
    tags: Vec<TagInfo>,
    debug: Option<DebugInfo>,
}

impl PluginImage {
    /// Decodes with default limits and no logging
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes, &LoadConfig::default(), &Logger::noop())
    }

    pub fn parse(bytes: &[u8], config: &LoadConfig, logger: &Arc<Logger>) -> Result<Self> {
        let container = Container::parse(bytes, config, logger)?;
        Self::from_container(container, config, logger)
    }

    pub fn load_file(
        path: impl AsRef<Path>,
        config: &LoadConfig,
        logger: &Arc<Logger>,
    ) -> Result<Self> {
        let container = crate::format::load_file(path, config, logger)?;
        Self::from_container(container, config, logger)
    }

    /// Interprets the sections of a decoded container
    pub fn from_container(
        container: Container,
        config: &LoadConfig,
        logger: &Arc<Logger>,
    ) -> Result<Self> {
        let image = Self::decode(container, config)?;
        debug!(
            logger,
            target: Stage::Reader.target(),
            "loaded plugin: code v{} {} bytes, data {}/{} bytes, {} publics, {} pubvars, {} natives{}",
            image.code_header.codeversion,
            image.code.len(),
            image.data_header.datasize,
            image.data_header.memsize,
            image.publics.len(),
            image.pubvars.len(),
            image.natives.len(),
            if image.debug.is_some() { ", debug info" } else { "" }
        );
        Ok(image)
    }

    fn decode(container: Container, config: &LoadConfig) -> Result<Self> {
        let names = container.section(SectionKind::Names).unwrap_or(&[]);
        validate_table(names, ".names")?;

        let (code_header, code) = read_code(&container)?;
        let (data_header, data) = read_data(&container, config)?;

        let publics = PublicRecord::read_all(section(&container, SectionKind::Publics), ".publics")?
            .into_iter()
            .map(|r| -> Result<PublicInfo> {
                Ok(PublicInfo {
                    name: name_at(names, r.name, ".publics")?.to_string(),
                    code_offset: r.address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let pubvars = PubvarRecord::read_all(section(&container, SectionKind::Pubvars), ".pubvars")?
            .into_iter()
            .map(|r| -> Result<PubvarInfo> {
                Ok(PubvarInfo {
                    name: name_at(names, r.name, ".pubvars")?.to_string(),
                    address: r.address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let natives = NativeRecord::read_all(section(&container, SectionKind::Natives), ".natives")?
            .into_iter()
            .map(|r| -> Result<NativeDecl> {
                Ok(NativeDecl {
                    name: name_at(names, r.name, ".natives")?.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let tags = TagRecord::read_all(section(&container, SectionKind::Tags), ".tags")?
            .into_iter()
            .map(|r| -> Result<TagInfo> {
                Ok(TagInfo {
                    id: r.tag_id,
                    name: name_at(names, r.name, ".tags")?.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let debug = if code_header.flags & CODEFLAG_DEBUG != 0 {
            Some(read_debug(&container)?)
        } else {
            None
        };

        Ok(Self {
            container,
            code_header,
            code,
            data_header,
            data,
            publics: NameSorted::new(publics),
            pubvars: NameSorted::new(pubvars),
            natives: NameSorted::new(natives),
            tags,
            debug,
        })
    }

    /// Bytecode
    pub fn code(&self) -> &[u8] {
        &self.container.image()[self.code.clone()]
    }

    pub fn code_header(&self) -> &CodeHeader {
        &self.code_header
    }

    pub fn code_version(&self) -> u8 {
        self.code_header.codeversion
    }

    /// Initialized data
    pub fn data(&self) -> &[u8] {
        &self.container.image()[self.data.clone()]
    }

    pub fn datasize(&self) -> u32 {
        self.data_header.datasize
    }

    /// Writable memory a context needs: data, globals and stack
    pub fn memsize(&self) -> u32 {
        self.data_header.memsize
    }

    pub fn is_debug(&self) -> bool {
        self.debug.is_some()
    }

    pub fn debug(&self) -> Option<&DebugInfo> {
        self.debug.as_ref()
    }

    pub fn header(&self) -> &FileHeader {
        self.container.header()
    }

    /// Section directory, for tools
    pub fn sections(&self) -> &[SectionView] {
        self.container.sections()
    }

    /// Size of the inflated image
    pub fn image_size(&self) -> usize {
        self.container.image().len()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn num_publics(&self) -> usize {
        self.publics.len()
    }

    pub fn get_public(&self, index: usize) -> Result<&PublicInfo> {
        self.publics.get(index)
    }

    pub fn find_public_by_name(&self, name: &str) -> Result<usize> {
        self.publics.find(name)
    }

    pub fn publics(&self) -> &NameSorted<PublicInfo> {
        &self.publics
    }

    pub fn num_pubvars(&self) -> usize {
        self.pubvars.len()
    }

    pub fn get_pubvar(&self, index: usize) -> Result<&PubvarInfo> {
        self.pubvars.get(index)
    }

    pub fn find_pubvar_by_name(&self, name: &str) -> Result<usize> {
        self.pubvars.find(name)
    }

    pub fn pubvars(&self) -> &NameSorted<PubvarInfo> {
        &self.pubvars
    }

    pub fn num_natives(&self) -> usize {
        self.natives.len()
    }

    pub fn get_native(&self, index: usize) -> Result<&NativeDecl> {
        self.natives.get(index)
    }

    pub fn find_native_by_name(&self, name: &str) -> Result<usize> {
        self.natives.find(name)
    }

    pub fn natives(&self) -> &NameSorted<NativeDecl> {
        &self.natives
    }

    pub fn tags(&self) -> &[TagInfo] {
        &self.tags
    }

    pub fn find_tag(&self, id: u32) -> Option<&TagInfo> {
        self.tags.iter().find(|t| t.id == id)
    }
}

/// Payload of an optional section, empty when absent
fn section(container: &Container, kind: SectionKind) -> &[u8] {
    container.section(kind).unwrap_or(&[])
}

fn required<'a>(container: &'a Container, kind: SectionKind) -> Result<&'a [u8]> {
    container
        .section(kind)
        .ok_or_else(|| SmxError::format(format!("missing required section {}", kind.name())))
}

/// Absolute offset of a section's payload in the image
fn section_base(container: &Container, kind: SectionKind) -> usize {
    container
        .sections()
        .iter()
        .find(|s| s.kind == Some(kind))
        .map(|s| s.entry.dataoffs as usize)
        .unwrap_or(0)
}

/// Range of `[offset, offset + len)` inside a section, in image coordinates
fn blob_range(
    section_len: usize,
    base: usize,
    offset: u32,
    len: u32,
    what: &str,
) -> Result<Range<usize>> {
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|&end| end <= section_len)
        .ok_or_else(|| {
            SmxError::format(format!(
                "{what} blob at {offset}+{len} exceeds its {section_len}-byte section"
            ))
        })?;
    Ok(base + start..base + end)
}

fn read_code(container: &Container) -> Result<(CodeHeader, Range<usize>)> {
    let bytes = required(container, SectionKind::Code)?;
    let header = CodeHeader::read(&mut ByteReader::new(bytes, ".code"))?;

    if header.cellsize != CELL_BYTES {
        return Err(SmxError::format(format!(
            "unsupported cell size {}",
            header.cellsize
        )));
    }
    if header.codeversion < MIN_CODE_VERSION {
        return Err(SmxError::CodeTooOld {
            version: header.codeversion,
            min: MIN_CODE_VERSION,
        });
    }
    if header.codeversion > MAX_CODE_VERSION {
        return Err(SmxError::CodeTooNew {
            version: header.codeversion,
            max: MAX_CODE_VERSION,
        });
    }
    if header.flags & !CODEFLAG_DEBUG != 0 {
        return Err(SmxError::format(format!(
            "unknown code flags 0x{:04X}",
            header.flags
        )));
    }

    let base = section_base(container, SectionKind::Code);
    let range = blob_range(bytes.len(), base, header.code, header.codesize, ".code")?;
    Ok((header, range))
}

fn read_data(container: &Container, config: &LoadConfig) -> Result<(DataHeader, Range<usize>)> {
    let bytes = required(container, SectionKind::Data)?;
    let header = DataHeader::read(&mut ByteReader::new(bytes, ".data"))?;

    if header.memsize < header.datasize {
        return Err(SmxError::format(format!(
            "memory size {} is smaller than data size {}",
            header.memsize, header.datasize
        )));
    }
    if header.memsize > config.max_image_size || header.memsize > i32::MAX as u32 {
        return Err(SmxError::format(format!(
            "memory size {} exceeds the limit of {}",
            header.memsize, config.max_image_size
        )));
    }

    let base = section_base(container, SectionKind::Data);
    let range = blob_range(bytes.len(), base, header.data, header.datasize, ".data")?;
    Ok((header, range))
}

fn read_debug(container: &Container) -> Result<DebugInfo> {
    let (files, lines, symbols) = match (
        container.section(SectionKind::DebugFiles),
        container.section(SectionKind::DebugLines),
        container.section(SectionKind::DebugSymbols),
    ) {
        (Some(files), Some(lines), Some(symbols)) => (files, lines, symbols),
        _ => {
            return Err(SmxError::format(
                "debug flag set but .dbg.files, .dbg.lines or .dbg.symbols is missing",
            ))
        }
    };

    let files = DebugFile::read_all(files, ".dbg.files")?;
    let lines = DebugLine::read_all(lines, ".dbg.lines")?;
    let symbols = DebugSymbol::read_all(symbols)?;
    let natives = match container.section(SectionKind::DebugNatives) {
        Some(bytes) => DebugNative::read_all(bytes)?,
        None => Vec::new(),
    };

    if let Some(bytes) = container.section(SectionKind::DebugInfo) {
        let info = DebugInfoHeader::read(&mut ByteReader::new(bytes, ".dbg.info"))?;
        if info.num_files as usize != files.len()
            || info.num_lines as usize != lines.len()
            || info.num_syms as usize != symbols.len()
        {
            return Err(SmxError::format(format!(
                ".dbg.info counts {}/{}/{} disagree with tables {}/{}/{}",
                info.num_files,
                info.num_lines,
                info.num_syms,
                files.len(),
                lines.len(),
                symbols.len()
            )));
        }
    }

    let strings = section(container, SectionKind::DebugStrings).to_vec();
    DebugInfo::new(files, lines, symbols, natives, strings)
}
