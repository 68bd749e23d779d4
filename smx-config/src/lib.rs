//! SMX Config - Pure configuration data structures
//!
//! This crate contains only data structures, no logic or global state.
//! It is the shared configuration vocabulary of the container writer,
//! the container reader and the execution context.

use serde::{Deserialize, Serialize};

/// Default zlib level used when compressing the container tail.
pub const BEST_COMPRESSION: u32 = 9;

/// Configuration for the container encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Whether to try compressing the section payload region
    pub compress: bool,
    /// zlib compression level (0-9)
    pub compression_level: u32,
}

/// Configuration for the container decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Largest `imagesize` a header may declare before it is rejected
    pub max_image_size: u32,
}

/// Configuration for execution contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Minimum number of bytes between the end of the data segment
    /// and the top of memory
    pub min_heap_size: u32,
}

/// Pipeline stage, used to derive log targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Writer,
    Reader,
    Context,
}

impl Stage {
    /// Get the string name of the stage
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Writer => "writer",
            Stage::Reader => "reader",
            Stage::Context => "context",
        }
    }

    /// Get the log target name for this stage
    pub fn target(&self) -> &'static str {
        match self {
            Stage::Writer => "smx::writer",
            Stage::Reader => "smx::reader",
            Stage::Context => "smx::context",
        }
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            compress: true,
            compression_level: BEST_COMPRESSION,
        }
    }
}

impl WriteConfig {
    /// Writer settings that never compress
    pub fn uncompressed() -> Self {
        Self {
            compress: false,
            ..Self::default()
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_image_size: 64 * 1024 * 1024,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { min_heap_size: 0 }
    }
}
