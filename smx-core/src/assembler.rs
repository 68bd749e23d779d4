//! Plugin assembler
//!
//! Collects code, data, symbol tables and optional debug tables, then lays
//! them out as a container in the canonical section order.

use std::sync::Arc;

use smx_config::{Stage, WriteConfig};
use smx_log::{debug, Logger};

use crate::error::{Result, SmxError};
use crate::format::{
    BlobSection, CodeHeader, ContainerBuilder, DataHeader, DebugArg, DebugDim, DebugFile,
    DebugInfoHeader, DebugLine, DebugNative, DebugSymbol, FixedRecord, ListSection, NameTable,
    NativeRecord, PublicRecord, PubvarRecord, RawSection, SymbolIdent, TagRecord, CELL_BYTES,
    CODEFLAG_DEBUG, CODE_HEADER_SIZE, DATA_HEADER_SIZE, MIN_CODE_VERSION,
};

/// Debug symbol as the assembler receives it, with its name spelled out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDef {
    pub name: String,
    pub addr: i32,
    pub tagid: i16,
    pub codestart: u32,
    pub codeend: u32,
    pub ident: SymbolIdent,
    pub vclass: u8,
    pub dims: Vec<DebugDim>,
}

impl SymbolDef {
    /// A function spanning `[codestart, codeend)`
    pub fn function(name: impl Into<String>, codestart: u32, codeend: u32) -> Self {
        Self {
            name: name.into(),
            addr: codestart as i32,
            tagid: 0,
            codestart,
            codeend,
            ident: SymbolIdent::Function,
            vclass: 0,
            dims: Vec::new(),
        }
    }

    /// A global variable at data address `addr`
    pub fn global(name: impl Into<String>, addr: i32) -> Self {
        Self {
            name: name.into(),
            addr,
            tagid: 0,
            codestart: 0,
            codeend: 0,
            ident: SymbolIdent::Variable,
            vclass: 0,
            dims: Vec::new(),
        }
    }

    pub fn with_dims(mut self, dims: Vec<DebugDim>) -> Self {
        self.ident = SymbolIdent::Array;
        self.dims = dims;
        self
    }
}

/// Argument of a native signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgDef {
    pub name: String,
    pub ident: SymbolIdent,
    pub tagid: i16,
    pub dims: Vec<DebugDim>,
}

impl ArgDef {
    pub fn cell(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ident: SymbolIdent::Variable,
            tagid: 0,
            dims: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct NativeSignature {
    native: String,
    tagid: i16,
    args: Vec<ArgDef>,
}

/// Builder for a complete plugin container
#[derive(Debug, Clone)]
pub struct PluginAssembler {
    code: Vec<u8>,
    code_version: u8,
    main: u32,
    data: Vec<u8>,
    memsize: u32,
    publics: Vec<(String, u32)>,
    pubvars: Vec<(String, u32)>,
    natives: Vec<String>,
    tags: Vec<(u32, String)>,
    debug_files: Vec<(u32, String)>,
    debug_lines: Vec<DebugLine>,
    debug_symbols: Vec<SymbolDef>,
    debug_natives: Vec<NativeSignature>,
    logger: Arc<Logger>,
}

impl Default for PluginAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginAssembler {
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            code_version: MIN_CODE_VERSION,
            main: 0,
            data: Vec::new(),
            memsize: 0,
            publics: Vec::new(),
            pubvars: Vec::new(),
            natives: Vec::new(),
            tags: Vec::new(),
            debug_files: Vec::new(),
            debug_lines: Vec::new(),
            debug_symbols: Vec::new(),
            debug_natives: Vec::new(),
            logger: Logger::noop(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn set_code(&mut self, code: Vec<u8>, version: u8) -> &mut Self {
        self.code = code;
        self.code_version = version;
        self
    }

    pub fn set_main(&mut self, main: u32) -> &mut Self {
        self.main = main;
        self
    }

    /// Initialized data plus the total memory a context needs
    pub fn set_data(&mut self, data: Vec<u8>, memsize: u32) -> &mut Self {
        self.data = data;
        self.memsize = memsize;
        self
    }

    pub fn add_public(&mut self, name: impl Into<String>, code_offset: u32) -> &mut Self {
        self.publics.push((name.into(), code_offset));
        self
    }

    pub fn add_pubvar(&mut self, name: impl Into<String>, address: u32) -> &mut Self {
        self.pubvars.push((name.into(), address));
        self
    }

    pub fn add_native(&mut self, name: impl Into<String>) -> &mut Self {
        self.natives.push(name.into());
        self
    }

    pub fn add_tag(&mut self, id: u32, name: impl Into<String>) -> &mut Self {
        self.tags.push((id, name.into()));
        self
    }

    /// Marks `addr` as the start of source file `name`
    pub fn add_debug_file(&mut self, addr: u32, name: impl Into<String>) -> &mut Self {
        self.debug_files.push((addr, name.into()));
        self
    }

    pub fn add_debug_line(&mut self, addr: u32, line: u32) -> &mut Self {
        self.debug_lines.push(DebugLine { addr, line });
        self
    }

    pub fn add_debug_symbol(&mut self, symbol: SymbolDef) -> &mut Self {
        self.debug_symbols.push(symbol);
        self
    }

    /// Records the signature of an imported native. The native must also be
    /// added with [`add_native`](Self::add_native).
    pub fn add_debug_native(
        &mut self,
        native: impl Into<String>,
        tagid: i16,
        args: Vec<ArgDef>,
    ) -> &mut Self {
        self.debug_natives.push(NativeSignature {
            native: native.into(),
            tagid,
            args,
        });
        self
    }

    fn has_debug(&self) -> bool {
        !self.debug_files.is_empty()
            || !self.debug_lines.is_empty()
            || !self.debug_symbols.is_empty()
            || !self.debug_natives.is_empty()
    }

    /// Lays out every section. Publics, pubvars and natives are sorted by
    /// name; a name used twice in one table is a `Param` error.
    pub fn build(&self) -> Result<ContainerBuilder> {
        if (self.memsize as usize) < self.data.len() {
            return Err(SmxError::Param(format!(
                "memory size {} is smaller than data size {}",
                self.memsize,
                self.data.len()
            )));
        }

        let publics = sorted_by_name(&self.publics, |p| &p.0, "public")?;
        let pubvars = sorted_by_name(&self.pubvars, |p| &p.0, "pubvar")?;
        let natives = sorted_by_name(&self.natives, |n| n, "native")?;

        let mut names = NameTable::new();
        let public_records: Vec<PublicRecord> = publics
            .iter()
            .map(|(name, address)| PublicRecord {
                address: *address,
                name: names.add(name),
            })
            .collect();
        let pubvar_records: Vec<PubvarRecord> = pubvars
            .iter()
            .map(|(name, address)| PubvarRecord {
                address: *address,
                name: names.add(name),
            })
            .collect();
        let native_records: Vec<NativeRecord> = natives
            .iter()
            .map(|name| NativeRecord {
                name: names.add(name),
            })
            .collect();
        let tag_records: Vec<TagRecord> = self
            .tags
            .iter()
            .map(|(tag_id, name)| TagRecord {
                tag_id: *tag_id,
                name: names.add(name),
            })
            .collect();

        let debug = self.has_debug();
        let code_header = CodeHeader {
            codesize: self.code.len() as u32,
            cellsize: CELL_BYTES,
            codeversion: self.code_version,
            flags: if debug { CODEFLAG_DEBUG } else { 0 },
            main: self.main,
            code: CODE_HEADER_SIZE as u32,
        };
        let data_header = DataHeader {
            datasize: self.data.len() as u32,
            memsize: self.memsize,
            data: DATA_HEADER_SIZE as u32,
        };

        let mut builder = ContainerBuilder::new().with_logger(self.logger.clone());
        builder.add(BlobSection::new(".code", code_header, self.code.clone()));
        builder.add(BlobSection::new(".data", data_header, self.data.clone()));
        builder.add(ListSection::with_records(".publics", public_records));
        builder.add(ListSection::with_records(".pubvars", pubvar_records));
        builder.add(ListSection::with_records(".natives", native_records));
        builder.add(RawSection::new(".names", names.to_bytes()));

        if debug {
            self.add_debug_sections(&mut builder, &natives)?;
        }
        if !tag_records.is_empty() {
            builder.add(ListSection::with_records(".tags", tag_records));
        }

        debug!(
            self.logger,
            target: Stage::Writer.target(),
            "assembled {} sections: {} publics, {} pubvars, {} natives{}",
            builder.len(),
            publics.len(),
            pubvars.len(),
            natives.len(),
            if debug { ", debug info" } else { "" }
        );
        Ok(builder)
    }

    fn add_debug_sections(&self, builder: &mut ContainerBuilder, natives: &[String]) -> Result<()> {
        let mut strings = NameTable::new();

        let mut files: Vec<DebugFile> = self
            .debug_files
            .iter()
            .map(|(addr, name)| DebugFile {
                addr: *addr,
                name: strings.add(name),
            })
            .collect();
        files.sort_by_key(|f| f.addr);

        let mut lines = self.debug_lines.clone();
        lines.sort_by_key(|l| l.addr);

        let mut symbols = Vec::new();
        let mut num_arrays = 0usize;
        for def in &self.debug_symbols {
            if def.dims.len() > u16::MAX as usize {
                return Err(SmxError::Param(format!(
                    "debug symbol {} has {} dimensions",
                    def.name,
                    def.dims.len()
                )));
            }
            num_arrays += def.dims.len();
            DebugSymbol {
                addr: def.addr,
                tagid: def.tagid,
                codestart: def.codestart,
                codeend: def.codeend,
                ident: def.ident as u8,
                vclass: def.vclass,
                name: strings.add(&def.name),
                dims: def.dims.clone(),
            }
            .write(&mut symbols);
        }

        let mut signatures = Vec::with_capacity(self.debug_natives.len());
        for sig in &self.debug_natives {
            let index = natives
                .iter()
                .position(|n| *n == sig.native)
                .ok_or_else(|| {
                    SmxError::Param(format!("debug signature for unknown native {}", sig.native))
                })?;
            let args = sig
                .args
                .iter()
                .map(|arg| DebugArg {
                    ident: arg.ident as u8,
                    tagid: arg.tagid,
                    name: strings.add(&arg.name),
                    dims: arg.dims.clone(),
                })
                .collect();
            signatures.push(DebugNative {
                index: index as u32,
                name: strings.add(&sig.native),
                tagid: sig.tagid,
                args,
            });
        }

        let info = DebugInfoHeader {
            num_files: files.len() as u32,
            num_lines: lines.len() as u32,
            num_syms: self.debug_symbols.len() as u32,
            num_arrays: num_arrays as u32,
        };
        let mut info_bytes = Vec::with_capacity(DebugInfoHeader::SIZE);
        info.write(&mut info_bytes);

        builder.add(ListSection::with_records(".dbg.files", files));
        builder.add(RawSection::new(".dbg.symbols", symbols));
        builder.add(ListSection::with_records(".dbg.lines", lines));
        builder.add(RawSection::new(".dbg.natives", DebugNative::write_section(&signatures)));
        builder.add(RawSection::new(".dbg.strings", strings.to_bytes()));
        builder.add(RawSection::new(".dbg.info", info_bytes));
        Ok(())
    }

    /// Builds and encodes in one step
    pub fn encode(&self, config: &WriteConfig) -> Result<Vec<u8>> {
        self.build()?.encode(config)
    }
}

/// Copy of `items` in byte order of their names, rejecting duplicates
fn sorted_by_name<T: Clone>(
    items: &[T],
    name: impl Fn(&T) -> &String,
    what: &str,
) -> Result<Vec<T>> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| name(a).cmp(name(b)));
    if let Some(pair) = sorted.windows(2).find(|w| name(&w[0]) == name(&w[1])) {
        return Err(SmxError::Param(format!(
            "duplicate {what} name {}",
            name(&pair[0])
        )));
    }
    Ok(sorted)
}
