//! SMX Core - Plugin container codec and execution context (pure logic)
//!
//! Encodes and decodes SMX containers, exposes the decoded plugin as a
//! read-only [`PluginImage`], and runs per-instance [`PluginContext`]s with
//! the heap-as-stack allocator and argument marshalling.
//!
//! Configuration and the logger are passed explicitly, never via global state.

pub mod assembler;
pub mod context;
pub mod debug;
pub mod error;
pub mod format;
pub mod image;
pub mod lookup;

// Re-export common types
pub use assembler::{ArgDef, PluginAssembler, SymbolDef};
pub use context::{
    CodeRunner, NativeFn, NativeInfo, NativeStatus, PluginContext, STACK_MARGIN,
};
pub use debug::DebugInfo;
pub use error::{Cell, Result, SmxError, CELL_SIZE};
pub use format::{Compression, Container, ContainerBuilder, SectionKind};
pub use image::PluginImage;
pub use lookup::{NameSorted, NativeDecl, PublicInfo, PubvarInfo, TagInfo};

// Re-export config types from smx-config
pub use smx_config::{ContextConfig, LoadConfig, Stage, WriteConfig};
