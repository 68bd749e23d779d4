//! Test helpers
//!
//! Fixture plugins shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use smx_core::{Cell, PluginAssembler, PluginContext, PluginImage, Result, WriteConfig};

/// The smallest useful plugin: 16 zero bytes of version 1 code plus the
/// given natives
pub fn natives_only(natives: &[&str]) -> PluginAssembler {
    let mut asm = PluginAssembler::new();
    asm.set_code(vec![0; 16], 1);
    for name in natives {
        asm.add_native(*name);
    }
    asm
}

/// A plugin with `datasize` bytes of data and `memsize` bytes of memory
pub fn with_memory(datasize: usize, memsize: u32) -> PluginAssembler {
    let mut asm = natives_only(&["Foo", "Bar"]);
    asm.set_data(vec![0xCD; datasize], memsize)
        .add_public("OnPluginStart", 0)
        .add_public("OnPluginEnd", 8)
        .add_pubvar("myinfo", 0);
    asm
}

pub fn load(asm: &PluginAssembler, config: &WriteConfig) -> Arc<PluginImage> {
    let bytes = asm.encode(config).unwrap();
    Arc::new(PluginImage::from_bytes(&bytes).unwrap())
}

/// Context over a `memsize`/`datasize` plugin
pub fn context(datasize: usize, memsize: u32) -> PluginContext {
    let image = load(&with_memory(datasize, memsize), &WriteConfig::uncompressed());
    PluginContext::new(image).unwrap()
}

/// Runner that reads the argument count and returns the sum of all cell
/// arguments, leaving the frame balanced
pub fn sum_args(ctx: &mut PluginContext, _code_offset: u32) -> Result<Cell> {
    let sp = ctx.sp();
    let argc = ctx.read_cell(sp)?;
    let args = ctx.read_cells(sp + 4, argc as usize)?;
    Ok(args.iter().sum())
}
