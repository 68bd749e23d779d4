//! Container encoder
//!
//! Sections are written in the order they were added. The encoder itself is
//! deterministic; compressing the payload region is a separate pass.

use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use smx_config::{Stage, WriteConfig};
use smx_log::{debug, trace, Logger};

use super::header::{FileHeader, HEADER_SIZE};
use super::records::FixedRecord;
use super::section::{SectionEntry, SECTION_ENTRY_SIZE};
use super::Compression;
use crate::error::{Result, SmxError};

/// A named payload the encoder can lay out
pub trait Section {
    fn name(&self) -> &str;

    /// Payload size in bytes
    fn size(&self) -> usize;

    fn write(&self, out: &mut Vec<u8>);
}

/// Fixed-size header followed by an opaque blob (`.code`, `.data`)
#[derive(Debug, Clone)]
pub struct BlobSection<H: FixedRecord> {
    name: String,
    pub header: H,
    pub blob: Vec<u8>,
}

impl<H: FixedRecord> BlobSection<H> {
    pub fn new(name: impl Into<String>, header: H, blob: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            header,
            blob,
        }
    }
}

impl<H: FixedRecord> Section for BlobSection<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        H::SIZE + self.blob.len()
    }

    fn write(&self, out: &mut Vec<u8>) {
        self.header.write(out);
        out.extend_from_slice(&self.blob);
    }
}

/// Flat array of fixed-size records (`.publics`, `.natives`, ...)
#[derive(Debug, Clone)]
pub struct ListSection<T: FixedRecord> {
    name: String,
    records: Vec<T>,
}

impl<T: FixedRecord> ListSection<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }

    pub fn with_records(name: impl Into<String>, records: Vec<T>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }

    pub fn push(&mut self, record: T) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: FixedRecord> Section for ListSection<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        T::SIZE * self.records.len()
    }

    fn write(&self, out: &mut Vec<u8>) {
        for record in &self.records {
            record.write(out);
        }
    }
}

/// Bytes written as-is (name tables, `.dbg.symbols`, ...)
#[derive(Debug, Clone)]
pub struct RawSection {
    name: String,
    bytes: Vec<u8>,
}

impl RawSection {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

impl Section for RawSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes);
    }
}

/// Ordered list of sections to be written as one container
pub struct ContainerBuilder {
    sections: Vec<Box<dyn Section>>,
    logger: Arc<Logger>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn add(&mut self, section: impl Section + 'static) {
        self.sections.push(Box::new(section));
    }

    pub fn add_boxed(&mut self, section: Box<dyn Section>) {
        self.sections.push(section);
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Writes an uncompressed container
    pub fn write(&self) -> Result<Vec<u8>> {
        let count = u8::try_from(self.sections.len()).map_err(|_| {
            SmxError::Param(format!(
                "{} sections exceed the limit of {}",
                self.sections.len(),
                u8::MAX
            ))
        })?;

        let stringtab = HEADER_SIZE + self.sections.len() * SECTION_ENTRY_SIZE;
        let names_len: usize = self.sections.iter().map(|s| s.name().len() + 1).sum();
        let dataoffs = stringtab + names_len;
        let payload_len: usize = self.sections.iter().map(|s| s.size()).sum();
        let total = dataoffs + payload_len;

        let imagesize = u32::try_from(total)
            .map_err(|_| SmxError::Param(format!("image of {total} bytes is too large")))?;

        let header = FileHeader::new(count, stringtab as u32, dataoffs as u32, imagesize);

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&header.to_bytes());

        let mut nameoffs = 0usize;
        let mut payload_offs = dataoffs;
        for section in &self.sections {
            let entry =
                SectionEntry::new(nameoffs as u32, payload_offs as u32, section.size() as u32);
            out.extend_from_slice(&entry.to_bytes());
            trace!(
                self.logger,
                target: Stage::Writer.target(),
                "section {} at {} ({} bytes)",
                section.name(),
                payload_offs,
                section.size()
            );
            nameoffs += section.name().len() + 1;
            payload_offs += section.size();
        }

        for section in &self.sections {
            out.extend_from_slice(section.name().as_bytes());
            out.push(0);
        }

        for section in &self.sections {
            let before = out.len();
            section.write(&mut out);
            debug_assert_eq!(out.len() - before, section.size());
        }

        Ok(out)
    }

    /// Writes the container and, if configured, compresses its payload region
    pub fn encode(&self, config: &WriteConfig) -> Result<Vec<u8>> {
        let image = self.write()?;
        if !config.compress {
            return Ok(image);
        }
        compress(&image, config.compression_level, &self.logger)
    }
}

/// Deflates `[dataoffs, imagesize)` of an uncompressed container.
///
/// The compressed form is only kept if it is smaller; otherwise, or if the
/// encoder fails, the input is returned unchanged.
pub fn compress(image: &[u8], level: u32, logger: &Arc<Logger>) -> Result<Vec<u8>> {
    let mut header = FileHeader::from_bytes(image)?;
    if header.is_compressed() {
        return Err(SmxError::Param("container is already compressed".to_string()));
    }
    if image.len() < header.imagesize as usize {
        return Err(SmxError::format(format!(
            "container is {} bytes, header declares {}",
            image.len(),
            header.imagesize
        )));
    }

    let dataoffs = header.dataoffs as usize;
    let tail = &image[dataoffs..header.imagesize as usize];

    let deflated = deflate(tail, level);
    let compressed = match deflated {
        Ok(bytes) if bytes.len() < tail.len() => bytes,
        Ok(bytes) => {
            debug!(
                logger,
                target: Stage::Writer.target(),
                "compression does not pay off ({} -> {} bytes), storing uncompressed",
                tail.len(),
                bytes.len()
            );
            return Ok(image[..header.imagesize as usize].to_vec());
        }
        Err(e) => {
            debug!(
                logger,
                target: Stage::Writer.target(),
                "compression failed ({}), storing uncompressed",
                e
            );
            return Ok(image[..header.imagesize as usize].to_vec());
        }
    };

    debug!(
        logger,
        target: Stage::Writer.target(),
        "compressed payload {} -> {} bytes",
        tail.len(),
        compressed.len()
    );

    header.compression = Compression::Gz;
    header.disksize = (dataoffs + compressed.len()) as u32;

    let mut out = Vec::with_capacity(dataoffs + compressed.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&image[HEADER_SIZE..dataoffs]);
    out.extend_from_slice(&compressed);
    Ok(out)
}

fn deflate(bytes: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::records::NativeRecord;

    fn two_sections() -> ContainerBuilder {
        let mut builder = ContainerBuilder::new();
        builder.add(RawSection::new(".names", b"Foo\0".to_vec()));
        builder.add(ListSection::with_records(
            ".natives",
            vec![NativeRecord { name: 0 }],
        ));
        builder
    }

    #[test]
    fn test_layout() {
        let bytes = two_sections().write().unwrap();
        let header = FileHeader::from_bytes(&bytes).unwrap();

        let stringtab = HEADER_SIZE + 2 * SECTION_ENTRY_SIZE;
        let names = ".names\0.natives\0";
        assert_eq!(header.sections, 2);
        assert_eq!(header.stringtab as usize, stringtab);
        assert_eq!(header.dataoffs as usize, stringtab + names.len());
        assert_eq!(header.imagesize as usize, stringtab + names.len() + 4 + 4);
        assert_eq!(header.disksize, header.imagesize);
        assert_eq!(bytes.len(), header.imagesize as usize);
        assert_eq!(&bytes[stringtab..stringtab + names.len()], names.as_bytes());

        // Second directory entry: name after ".names\0", payload after the first
        let entry = &bytes[HEADER_SIZE + SECTION_ENTRY_SIZE..stringtab];
        assert_eq!(u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]), 7);
        assert_eq!(
            u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
            header.dataoffs + 4
        );
    }

    #[test]
    fn test_write_is_deterministic() {
        assert_eq!(two_sections().write().unwrap(), two_sections().write().unwrap());
    }

    #[test]
    fn test_too_many_sections() {
        let mut builder = ContainerBuilder::new();
        for i in 0..256 {
            builder.add(RawSection::new(format!(".s{i}"), Vec::new()));
        }
        assert!(matches!(builder.write(), Err(SmxError::Param(_))));
    }

    #[test]
    fn test_compress_keeps_head_verbatim() {
        let mut builder = ContainerBuilder::new();
        builder.add(RawSection::new(".data", vec![0u8; 4096]));
        let plain = builder.write().unwrap();
        let packed = compress(&plain, 9, &Logger::noop()).unwrap();

        let header = FileHeader::from_bytes(&packed).unwrap();
        let dataoffs = header.dataoffs as usize;
        assert_eq!(header.compression, Compression::Gz);
        assert_eq!(header.imagesize as usize, plain.len());
        assert_eq!(header.disksize as usize, packed.len());
        assert!(packed.len() < plain.len());
        assert_eq!(&packed[HEADER_SIZE..dataoffs], &plain[HEADER_SIZE..dataoffs]);
    }

    #[test]
    fn test_compress_falls_back_when_larger() {
        let plain = two_sections().write().unwrap();
        let packed = compress(&plain, 9, &Logger::noop()).unwrap();
        assert_eq!(packed, plain);
    }

    #[test]
    fn test_compress_twice_rejected() {
        let mut builder = ContainerBuilder::new();
        builder.add(RawSection::new(".data", vec![0u8; 1024]));
        let packed = builder.encode(&WriteConfig::default()).unwrap();
        assert!(compress(&packed, 9, &Logger::noop()).is_err());
    }
}
