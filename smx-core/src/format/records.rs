//! On-disk record layouts of the known sections
//!
//! Fixed-size records implement [`FixedRecord`] so list sections can be
//! written and parsed generically. Debug symbols and debug natives carry
//! trailing dimension/argument lists and are handled on their own.

use super::cursor::ByteReader;
use crate::error::{Result, SmxError};

/// A record with a fixed serialized size
pub trait FixedRecord: Sized {
    /// Serialized size in bytes
    const SIZE: usize;

    fn write(&self, out: &mut Vec<u8>);

    fn read(reader: &mut ByteReader<'_>) -> Result<Self>;

    /// Parses a whole section made of back-to-back records
    fn read_all(bytes: &[u8], what: &'static str) -> Result<Vec<Self>> {
        if bytes.len() % Self::SIZE != 0 {
            return Err(SmxError::format(format!(
                "{what} size {} is not a multiple of {}",
                bytes.len(),
                Self::SIZE
            )));
        }

        let mut reader = ByteReader::new(bytes, what);
        let mut records = Vec::with_capacity(bytes.len() / Self::SIZE);
        while !reader.is_empty() {
            records.push(Self::read(&mut reader)?);
        }
        Ok(records)
    }
}

/// `.code` header size
pub const CODE_HEADER_SIZE: usize = 16;
/// `.data` header size
pub const DATA_HEADER_SIZE: usize = 12;

/// Header at the start of `.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeHeader {
    /// Bytecode size in bytes
    pub codesize: u32,
    pub cellsize: u8,
    pub codeversion: u8,
    pub flags: u16,
    /// Entry point, unused by the runtime
    pub main: u32,
    /// Bytecode offset, relative to the section start
    pub code: u32,
}

impl FixedRecord for CodeHeader {
    const SIZE: usize = CODE_HEADER_SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.codesize.to_le_bytes());
        out.push(self.cellsize);
        out.push(self.codeversion);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.main.to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            codesize: reader.read_u32()?,
            cellsize: reader.read_u8()?,
            codeversion: reader.read_u8()?,
            flags: reader.read_u16()?,
            main: reader.read_u32()?,
            code: reader.read_u32()?,
        })
    }
}

/// Header at the start of `.data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Initialized bytes
    pub datasize: u32,
    /// Total writable memory: data, globals and stack
    pub memsize: u32,
    /// Blob offset, relative to the section start
    pub data: u32,
}

impl FixedRecord for DataHeader {
    const SIZE: usize = DATA_HEADER_SIZE;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.datasize.to_le_bytes());
        out.extend_from_slice(&self.memsize.to_le_bytes());
        out.extend_from_slice(&self.data.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            datasize: reader.read_u32()?,
            memsize: reader.read_u32()?,
            data: reader.read_u32()?,
        })
    }
}

/// `.publics` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicRecord {
    /// Code offset of the function
    pub address: u32,
    /// Offset into `.names`
    pub name: u32,
}

impl FixedRecord for PublicRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            address: reader.read_u32()?,
            name: reader.read_u32()?,
        })
    }
}

/// `.pubvars` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubvarRecord {
    /// Data offset of the variable
    pub address: u32,
    pub name: u32,
}

impl FixedRecord for PubvarRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address.to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            address: reader.read_u32()?,
            name: reader.read_u32()?,
        })
    }
}

/// `.natives` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeRecord {
    pub name: u32,
}

impl FixedRecord for NativeRecord {
    const SIZE: usize = 4;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            name: reader.read_u32()?,
        })
    }
}

/// `.tags` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagRecord {
    pub tag_id: u32,
    pub name: u32,
}

impl FixedRecord for TagRecord {
    const SIZE: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tag_id.to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            tag_id: reader.read_u32()?,
            name: reader.read_u32()?,
        })
    }
}

/// `.dbg.info` contents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugInfoHeader {
    pub num_files: u32,
    pub num_lines: u32,
    pub num_syms: u32,
    /// Number of dimension records across all symbols
    pub num_arrays: u32,
}

impl FixedRecord for DebugInfoHeader {
    const SIZE: usize = 16;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.num_files.to_le_bytes());
        out.extend_from_slice(&self.num_lines.to_le_bytes());
        out.extend_from_slice(&self.num_syms.to_le_bytes());
        out.extend_from_slice(&self.num_arrays.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            num_files: reader.read_u32()?,
            num_lines: reader.read_u32()?,
            num_syms: reader.read_u32()?,
            num_arrays: reader.read_u32()?,
        })
    }
}

/// `.dbg.files` entry: source file starting at `addr`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugFile {
    pub addr: u32,
    /// Offset into `.dbg.strings`
    pub name: u32,
}

impl FixedRecord for DebugFile {
    const SIZE: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            addr: reader.read_u32()?,
            name: reader.read_u32()?,
        })
    }
}

/// `.dbg.lines` entry: source line starting at `addr`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugLine {
    pub addr: u32,
    pub line: u32,
}

impl FixedRecord for DebugLine {
    const SIZE: usize = 8;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&self.line.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            addr: reader.read_u32()?,
            line: reader.read_u32()?,
        })
    }
}

/// Array dimension of a symbol or native argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugDim {
    pub tagid: i16,
    /// Element count, 0 for unsized
    pub size: u32,
}

impl FixedRecord for DebugDim {
    const SIZE: usize = 6;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.tagid.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            tagid: reader.read_i16()?,
            size: reader.read_u32()?,
        })
    }
}

fn read_dims(reader: &mut ByteReader<'_>, count: u16) -> Result<Vec<DebugDim>> {
    (0..count).map(|_| DebugDim::read(reader)).collect()
}

fn dim_count(dims: &[DebugDim]) -> u16 {
    dims.len().min(u16::MAX as usize) as u16
}

/// Symbol kinds stored in `ident`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolIdent {
    Variable = 1,
    Reference = 2,
    Array = 3,
    RefArray = 4,
    Function = 9,
    VarArgs = 11,
}

impl SymbolIdent {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SymbolIdent::Variable),
            2 => Some(SymbolIdent::Reference),
            3 => Some(SymbolIdent::Array),
            4 => Some(SymbolIdent::RefArray),
            9 => Some(SymbolIdent::Function),
            11 => Some(SymbolIdent::VarArgs),
            _ => None,
        }
    }
}

/// `.dbg.symbols` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSymbol {
    /// Address: data offset, stack offset or code offset depending on `vclass`/`ident`
    pub addr: i32,
    pub tagid: i16,
    /// Code range where the symbol is in scope
    pub codestart: u32,
    pub codeend: u32,
    /// Raw [`SymbolIdent`]
    pub ident: u8,
    /// Storage class: 0 global, 1 local, 2 static
    pub vclass: u8,
    /// Offset into `.dbg.strings`
    pub name: u32,
    pub dims: Vec<DebugDim>,
}

impl DebugSymbol {
    /// Fixed part size; `dimcount` dims follow
    pub const HEADER_SIZE: usize = 22;

    pub fn is_function(&self) -> bool {
        self.ident == SymbolIdent::Function as u8
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&self.tagid.to_le_bytes());
        out.extend_from_slice(&self.codestart.to_le_bytes());
        out.extend_from_slice(&self.codeend.to_le_bytes());
        out.push(self.ident);
        out.push(self.vclass);
        out.extend_from_slice(&dim_count(&self.dims).to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
        for dim in self.dims.iter().take(u16::MAX as usize) {
            dim.write(out);
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let addr = reader.read_i32()?;
        let tagid = reader.read_i16()?;
        let codestart = reader.read_u32()?;
        let codeend = reader.read_u32()?;
        let ident = reader.read_u8()?;
        let vclass = reader.read_u8()?;
        let dimcount = reader.read_u16()?;
        let name = reader.read_u32()?;
        let dims = read_dims(reader, dimcount)?;
        Ok(Self {
            addr,
            tagid,
            codestart,
            codeend,
            ident,
            vclass,
            name,
            dims,
        })
    }

    /// Parses `.dbg.symbols`
    pub fn read_all(bytes: &[u8]) -> Result<Vec<Self>> {
        let mut reader = ByteReader::new(bytes, ".dbg.symbols");
        let mut symbols = Vec::new();
        while !reader.is_empty() {
            symbols.push(Self::read(&mut reader)?);
        }
        Ok(symbols)
    }
}

/// Argument of a debug native
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugArg {
    pub ident: u8,
    pub tagid: i16,
    pub name: u32,
    pub dims: Vec<DebugDim>,
}

impl DebugArg {
    pub const HEADER_SIZE: usize = 9;

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.ident);
        out.extend_from_slice(&self.tagid.to_le_bytes());
        out.extend_from_slice(&dim_count(&self.dims).to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
        for dim in self.dims.iter().take(u16::MAX as usize) {
            dim.write(out);
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let ident = reader.read_u8()?;
        let tagid = reader.read_i16()?;
        let dimcount = reader.read_u16()?;
        let name = reader.read_u32()?;
        let dims = read_dims(reader, dimcount)?;
        Ok(Self {
            ident,
            tagid,
            name,
            dims,
        })
    }
}

/// `.dbg.natives` entry: signature of a native
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugNative {
    /// Index into `.natives`
    pub index: u32,
    pub name: u32,
    /// Return tag
    pub tagid: i16,
    pub args: Vec<DebugArg>,
}

impl DebugNative {
    pub const HEADER_SIZE: usize = 12;

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(&self.name.to_le_bytes());
        out.extend_from_slice(&self.tagid.to_le_bytes());
        let nargs = self.args.len().min(u16::MAX as usize) as u16;
        out.extend_from_slice(&nargs.to_le_bytes());
        for arg in self.args.iter().take(nargs as usize) {
            arg.write(out);
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let index = reader.read_u32()?;
        let name = reader.read_u32()?;
        let tagid = reader.read_i16()?;
        let nargs = reader.read_u16()?;
        let args = (0..nargs)
            .map(|_| DebugArg::read(reader))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            index,
            name,
            tagid,
            args,
        })
    }

    /// Serializes a whole `.dbg.natives` section: count, then entries
    pub fn write_section(natives: &[DebugNative]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(natives.len() as u32).to_le_bytes());
        for native in natives {
            native.write(&mut out);
        }
        out
    }

    /// Parses `.dbg.natives`
    pub fn read_all(bytes: &[u8]) -> Result<Vec<Self>> {
        let mut reader = ByteReader::new(bytes, ".dbg.natives");
        let count = reader.read_u32()?;
        // Each entry needs at least its fixed part
        if count as usize > reader.remaining() / Self::HEADER_SIZE {
            return Err(SmxError::format(format!(
                ".dbg.natives declares {count} entries in {} bytes",
                bytes.len()
            )));
        }
        (0..count).map(|_| Self::read(&mut reader)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_header_layout() {
        let header = CodeHeader {
            codesize: 16,
            cellsize: 4,
            codeversion: 10,
            flags: 1,
            main: 0,
            code: 16,
        };
        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(out.len(), CODE_HEADER_SIZE);
        assert_eq!(out[4], 4);
        assert_eq!(out[5], 10);

        let mut reader = ByteReader::new(&out, ".code");
        assert_eq!(CodeHeader::read(&mut reader).unwrap(), header);
    }

    #[test]
    fn test_read_all_rejects_partial_record() {
        let bytes = [0u8; 12];
        assert!(PublicRecord::read_all(&bytes, ".publics").is_err());
        assert_eq!(NativeRecord::read_all(&bytes, ".natives").unwrap().len(), 3);
    }

    #[test]
    fn test_symbol_with_dims() {
        let symbol = DebugSymbol {
            addr: -8,
            tagid: 2,
            codestart: 100,
            codeend: 200,
            ident: SymbolIdent::Array as u8,
            vclass: 1,
            name: 5,
            dims: vec![
                DebugDim { tagid: 0, size: 4 },
                DebugDim { tagid: 0, size: 8 },
            ],
        };
        let mut out = Vec::new();
        symbol.write(&mut out);
        assert_eq!(out.len(), DebugSymbol::HEADER_SIZE + 2 * DebugDim::SIZE);
        // dimcount sits after addr, tagid, codestart, codeend, ident, vclass
        assert_eq!(u16::from_le_bytes([out[16], out[17]]), 2);

        let parsed = DebugSymbol::read_all(&out).unwrap();
        assert_eq!(parsed, vec![symbol]);
    }

    #[test]
    fn test_symbol_truncated_dims() {
        let symbol = DebugSymbol {
            addr: 0,
            tagid: 0,
            codestart: 0,
            codeend: 0,
            ident: SymbolIdent::Array as u8,
            vclass: 0,
            name: 0,
            dims: vec![DebugDim { tagid: 0, size: 3 }],
        };
        let mut out = Vec::new();
        symbol.write(&mut out);
        out.truncate(out.len() - 1);
        assert!(DebugSymbol::read_all(&out).is_err());
    }

    #[test]
    fn test_debug_natives_section() {
        let natives = vec![DebugNative {
            index: 0,
            name: 0,
            tagid: 1,
            args: vec![DebugArg {
                ident: SymbolIdent::RefArray as u8,
                tagid: 0,
                name: 4,
                dims: vec![DebugDim { tagid: 0, size: 0 }],
            }],
        }];
        let bytes = DebugNative::write_section(&natives);
        assert_eq!(
            bytes.len(),
            4 + DebugNative::HEADER_SIZE + DebugArg::HEADER_SIZE + DebugDim::SIZE
        );
        assert_eq!(DebugNative::read_all(&bytes).unwrap(), natives);
    }

    #[test]
    fn test_debug_natives_bogus_count() {
        let bytes = 1000u32.to_le_bytes();
        assert!(DebugNative::read_all(&bytes).is_err());
    }

    #[test]
    fn test_symbol_ident() {
        assert_eq!(SymbolIdent::from_u8(9), Some(SymbolIdent::Function));
        assert_eq!(SymbolIdent::from_u8(5), None);
    }
}
