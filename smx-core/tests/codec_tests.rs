//! Container codec tests
//!
//! Encode through the assembler or the raw builder, decode, compare.

mod common;

use common::{natives_only, with_memory};
use smx_config::{LoadConfig, WriteConfig};
use smx_core::format::{
    compress, ContainerBuilder, FileHeader, RawSection, HEADER_SIZE, SECTION_ENTRY_SIZE,
};
use smx_core::{Compression, Container, PluginImage, SectionKind, SmxError};
use smx_log::Logger;

fn mixed_sections() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        (".names", b"alpha\0beta\0".to_vec()),
        (".data", (0..=255u8).cycle().take(4096).collect()),
        (".empty", Vec::new()),
        (".vendor.blob", vec![0x5A; 777]),
    ]
}

fn build(sections: &[(&'static str, Vec<u8>)]) -> ContainerBuilder {
    let mut builder = ContainerBuilder::new();
    for (name, bytes) in sections {
        builder.add(RawSection::new(*name, bytes.clone()));
    }
    builder
}

fn assert_same_sections(container: &Container, sections: &[(&'static str, Vec<u8>)]) {
    assert_eq!(container.sections().len(), sections.len());
    for (view, (name, bytes)) in container.sections().iter().zip(sections) {
        assert_eq!(view.name, *name);
        assert_eq!(view.entry.size as usize, bytes.len());
        assert_eq!(container.find_section(name).unwrap(), &bytes[..]);
    }
}

#[test]
fn test_round_trip_uncompressed() {
    let sections = mixed_sections();
    let bytes = build(&sections).encode(&WriteConfig::uncompressed()).unwrap();

    let container = Container::from_bytes(&bytes).unwrap();
    assert_eq!(container.header().compression, Compression::None);
    assert_eq!(container.header().disksize as usize, bytes.len());
    assert_same_sections(&container, &sections);
}

#[test]
fn test_round_trip_compressed() {
    let sections = mixed_sections();
    let bytes = build(&sections).encode(&WriteConfig::default()).unwrap();

    let container = Container::from_bytes(&bytes).unwrap();
    assert_eq!(container.header().compression, Compression::Gz);
    assert!(container.header().disksize < container.header().imagesize);
    assert_same_sections(&container, &sections);
}

#[test]
fn test_head_is_never_compressed() {
    let sections = mixed_sections();
    let builder = build(&sections);
    let plain = builder.write().unwrap();
    let packed = builder.encode(&WriteConfig::default()).unwrap();

    let header = FileHeader::from_bytes(&packed).unwrap();
    let expected_dataoffs = HEADER_SIZE
        + sections.len() * SECTION_ENTRY_SIZE
        + sections.iter().map(|(n, _)| n.len() + 1).sum::<usize>();
    assert_eq!(header.dataoffs as usize, expected_dataoffs);
    assert_eq!(header.stringtab as usize, HEADER_SIZE + sections.len() * SECTION_ENTRY_SIZE);

    // Directory and string table survive byte for byte
    let head = HEADER_SIZE..header.dataoffs as usize;
    assert_eq!(packed[head.clone()], plain[head]);
}

#[test]
fn test_encoding_is_deterministic() {
    let sections = mixed_sections();
    for config in [WriteConfig::default(), WriteConfig::uncompressed()] {
        let first = build(&sections).encode(&config).unwrap();
        let second = build(&sections).encode(&config).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_incompressible_payload_stays_plain() {
    // A tiny payload cannot shrink under zlib framing
    let sections = vec![(".x", vec![0x42])];
    let bytes = build(&sections).encode(&WriteConfig::default()).unwrap();
    assert_eq!(
        FileHeader::from_bytes(&bytes).unwrap().compression,
        Compression::None
    );
    assert_same_sections(&Container::from_bytes(&bytes).unwrap(), &sections);
}

#[test]
fn test_compress_twice_rejected() {
    let packed = build(&mixed_sections()).encode(&WriteConfig::default()).unwrap();
    assert!(matches!(
        compress(&packed, 9, &Logger::noop()),
        Err(SmxError::Param(_))
    ));
}

#[test]
fn test_uncompressed_copy_decodes_identically() {
    let packed = build(&mixed_sections()).encode(&WriteConfig::default()).unwrap();
    let container = Container::from_bytes(&packed).unwrap();
    let plain = container.to_uncompressed_bytes();

    let again = Container::from_bytes(&plain).unwrap();
    assert_eq!(again.image(), container.image());
    assert_eq!(again.header().compression, Compression::None);
}

#[test]
fn test_bad_magic_and_version() {
    let mut bytes = build(&mixed_sections()).write().unwrap();
    bytes[0] ^= 0xFF;
    assert!(matches!(Container::from_bytes(&bytes), Err(SmxError::FileFormat(_))));

    let mut bytes = build(&mixed_sections()).write().unwrap();
    bytes[4..6].copy_from_slice(&0x0200u16.to_le_bytes());
    assert!(matches!(Container::from_bytes(&bytes), Err(SmxError::FileFormat(_))));
}

#[test]
fn test_foo_native_scenario() {
    let bytes = natives_only(&["Foo"]).encode(&WriteConfig::default()).unwrap();
    let image = PluginImage::from_bytes(&bytes).unwrap();

    assert_eq!(image.code(), &[0u8; 16][..]);
    assert_eq!(image.code_version(), 1);
    assert_eq!(image.find_native_by_name("Foo").unwrap(), 0);
    assert!(matches!(
        image.find_native_by_name("Bar"),
        Err(SmxError::NotFound(_))
    ));
}

#[test]
fn test_plugin_round_trip_both_encodings() {
    let asm = with_memory(64, 512);
    let plain = PluginImage::from_bytes(&asm.encode(&WriteConfig::uncompressed()).unwrap()).unwrap();
    let packed = PluginImage::from_bytes(&asm.encode(&WriteConfig::default()).unwrap()).unwrap();

    assert_eq!(plain.data(), packed.data());
    assert_eq!(plain.code(), packed.code());
    assert_eq!(plain.memsize(), packed.memsize());
    assert_eq!(plain.num_publics(), packed.num_publics());
    assert!(packed.header().is_compressed());
    assert!(packed.container().has_section(SectionKind::Names));
}

#[test]
fn test_image_size_limit_applies_to_plugins() {
    let bytes = with_memory(16, 4096).encode(&WriteConfig::uncompressed()).unwrap();
    let config = LoadConfig { max_image_size: 1024 };
    let err = PluginImage::parse(&bytes, &config, &Logger::noop()).unwrap_err();
    assert!(matches!(err, SmxError::FileFormat(_)));
}

#[test]
fn test_load_plugin_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.smx");
    std::fs::write(&path, with_memory(8, 128).encode(&WriteConfig::default()).unwrap()).unwrap();

    let image = PluginImage::load_file(&path, &LoadConfig::default(), &Logger::noop()).unwrap();
    assert_eq!(image.datasize(), 8);
    assert_eq!(image.find_public_by_name("OnPluginEnd").unwrap(), 0);
}
