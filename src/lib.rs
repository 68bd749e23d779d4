//! SMX - Plugin container format and runtime
//!
//! Facade over the workspace crates:
//!
//! ```text
//! smx-config  - Pure configuration data
//! smx-log     - Logger passed explicitly as Arc<Logger>
//! smx-core    - Container codec, plugin image, execution context
//! smx-cli     - `smx` binary
//! ```
//!
//! # Quick Start
//!
//! ```
//! use smx_workspace::{open, PluginAssembler, RuntimeConfig, WriteConfig};
//!
//! let mut asm = PluginAssembler::new();
//! asm.set_code(vec![0; 16], 1).set_data(vec![0; 8], 256).add_native("Foo");
//! let bytes = asm.encode(&WriteConfig::default()).unwrap();
//!
//! let mut ctx = open(&bytes, &RuntimeConfig::default()).unwrap();
//! let addr = ctx.push_string("hi").unwrap();
//! assert_eq!(ctx.local_to_string(addr, 16).unwrap(), "hi");
//! ```

use std::path::Path;
use std::sync::Arc;

pub use smx_config::{ContextConfig, LoadConfig, Stage, WriteConfig};
pub use smx_core::{
    format, ArgDef, Cell, CodeRunner, Container, DebugInfo, NativeFn, NativeInfo, NativeStatus,
    PluginAssembler, PluginContext, PluginImage, Result, SmxError, SymbolDef,
};
pub use smx_log::{Level, LogConfig, Logger};

/// Everything needed to turn container bytes into a running context
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub load: LoadConfig,
    pub context: ContextConfig,
    pub logger: Arc<Logger>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            load: LoadConfig::default(),
            context: ContextConfig::default(),
            logger: Logger::noop(),
        }
    }
}

impl RuntimeConfig {
    /// Default limits, logging to stdout at `level`
    pub fn with_stdout(level: Level) -> Self {
        let (logger, _) = LogConfig::new(level).with_stdout().init();
        Self {
            logger,
            ..Self::default()
        }
    }
}

/// Decodes a container and creates a context over it
pub fn open(bytes: &[u8], config: &RuntimeConfig) -> Result<PluginContext> {
    let image = PluginImage::parse(bytes, &config.load, &config.logger)?;
    PluginContext::with_config(Arc::new(image), &config.context, config.logger.clone())
}

/// Loads a container file and creates a context over it
pub fn open_file(path: impl AsRef<Path>, config: &RuntimeConfig) -> Result<PluginContext> {
    let image = PluginImage::load_file(path, &config.load, &config.logger)?;
    PluginContext::with_config(Arc::new(image), &config.context, config.logger.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_garbage() {
        assert!(matches!(
            open(b"definitely not a plugin", &RuntimeConfig::default()),
            Err(SmxError::FileFormat(_))
        ));
    }

    #[test]
    fn test_with_stdout_sets_level() {
        let config = RuntimeConfig::with_stdout(Level::Info);
        assert_eq!(config.logger.level(), Level::Info);
    }
}
