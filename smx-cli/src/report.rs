//! `smx inspect` output

use serde::Serialize;
use smx_core::PluginImage;
use std::fmt::Write;

#[derive(Debug, Serialize)]
pub struct SectionReport {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    /// Whether the loader understands this section
    pub known: bool,
}

/// Summary of one plugin file
#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub version: String,
    pub compression: &'static str,
    pub disksize: u32,
    pub imagesize: u32,
    pub sections: Vec<SectionReport>,
    pub code_version: u8,
    pub code_size: usize,
    pub datasize: u32,
    pub memsize: u32,
    pub debug: bool,
    pub publics: Vec<String>,
    pub pubvars: Vec<String>,
    pub natives: Vec<String>,
    pub tags: usize,
}

impl InspectReport {
    pub fn from_image(image: &PluginImage) -> Self {
        let header = image.header();
        Self {
            version: format!("{}.{}", header.version >> 8, header.version & 0xFF),
            compression: header.compression.as_str(),
            disksize: header.disksize,
            imagesize: header.imagesize,
            sections: image
                .sections()
                .iter()
                .map(|s| SectionReport {
                    name: s.name.clone(),
                    offset: s.entry.dataoffs,
                    size: s.entry.size,
                    known: s.kind.is_some(),
                })
                .collect(),
            code_version: image.code_version(),
            code_size: image.code().len(),
            datasize: image.datasize(),
            memsize: image.memsize(),
            debug: image.is_debug(),
            publics: image.publics().iter().map(|p| p.name.clone()).collect(),
            pubvars: image.pubvars().iter().map(|p| p.name.clone()).collect(),
            natives: image.natives().iter().map(|n| n.name.clone()).collect(),
            tags: image.tags().len(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SMX container v{}", self.version);
        let _ = writeln!(
            out,
            "  compression: {} ({} bytes on disk, {} in memory)",
            self.compression, self.disksize, self.imagesize
        );
        let _ = writeln!(
            out,
            "  code: v{}, {} bytes{}",
            self.code_version,
            self.code_size,
            if self.debug { ", debug info" } else { "" }
        );
        let _ = writeln!(out, "  data: {} of {} bytes", self.datasize, self.memsize);

        let _ = writeln!(out, "Sections ({}):", self.sections.len());
        for section in &self.sections {
            let _ = writeln!(
                out,
                "  {:<14} {:>8} {:>8}{}",
                section.name,
                section.offset,
                section.size,
                if section.known { "" } else { "  (ignored)" }
            );
        }

        for (title, names) in [
            ("Publics", &self.publics),
            ("Pubvars", &self.pubvars),
            ("Natives", &self.natives),
        ] {
            let _ = writeln!(out, "{} ({}):", title, names.len());
            for name in names {
                let _ = writeln!(out, "  {}", name);
            }
        }
        let _ = writeln!(out, "Tags: {}", self.tags);
        out
    }
}
