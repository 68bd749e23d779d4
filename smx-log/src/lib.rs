//! smx-log - structured logging
//!
//! Logging for the SMX container codec and runtime:
//! - **Explicit passing**: there is no global logger; an `Arc<Logger>` is
//!   handed to whatever wants to log.
//! - **Lazy formatting**: the macros check the level before building a message.
//! - **Crash dumps**: a bounded ring buffer keeps the last N records.
//!
//! # Quick start
//!
//! ```toml
//! [dependencies]
//! smx-log = { version = "0.1", features = ["stdout", "stderr", "file"] }
//! ```
//!
//! ```ignore
//! use smx_log::{LogConfig, debug};
//!
//! let (logger, ring) = LogConfig::dev().init();
//! debug!(logger, "loaded {} sections", 6);
//! ```
//!
//! Without any output feature only the ring buffer sink is available:
//!
//! ```
//! use smx_log::{Level, LogRingBuffer, Logger, debug};
//!
//! let ring = LogRingBuffer::new(16);
//! let logger = Logger::new(Level::Debug).with_sink(ring.clone());
//! debug!(logger, "heap at {}", 128);
//! assert_eq!(ring.len(), 1);
//! ```

mod config;
mod logger;
mod macros;
mod record;
mod ring_buffer;

pub use config::{LogConfig, OutputConfig};
pub use logger::{LogSink, Logger};
pub use record::{Level, Record};
pub use ring_buffer::{LogRingBuffer, RingBufferStats};

#[cfg(feature = "file")]
pub use logger::FileSink;
#[cfg(feature = "stderr")]
pub use logger::StderrSink;
#[cfg(feature = "stdout")]
pub use logger::StdoutSink;

/// Result type of the logging crate
pub type Result<T> = std::result::Result<T, Error>;

/// Logging errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown level name
    #[error("Unknown log level: {0}")]
    UnknownLevel(String),
    /// IO error while opening a sink
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Error > Level::Warn);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", Error::UnknownLevel("loud".to_string())),
            "Unknown log level: loud"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }
}
