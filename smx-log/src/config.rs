//! Logger configuration

use std::sync::Arc;

use crate::logger::Logger;
use crate::record::Level;
use crate::ring_buffer::LogRingBuffer;

/// Where records go
#[derive(Clone, Debug, PartialEq)]
pub enum OutputConfig {
    Stdout,
    Stderr,
    /// Appends to the given path
    File(String),
    /// Keeps the last N records in memory
    RingBuffer(usize),
}

/// Level plus outputs; `init` turns it into a logger
#[derive(Clone, Debug, PartialEq)]
pub struct LogConfig {
    pub level: Level,
    pub outputs: Vec<OutputConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Warn,
            outputs: vec![OutputConfig::Stderr],
        }
    }
}

impl LogConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            outputs: Vec::new(),
        }
    }

    /// Debug level to stderr
    pub fn dev() -> Self {
        Self::new(Level::Debug).with_stderr()
    }

    /// Trace level into a ring buffer only
    pub fn test() -> Self {
        Self::new(Level::Trace).with_ring_buffer(1000)
    }

    pub fn with_stdout(mut self) -> Self {
        self.outputs.push(OutputConfig::Stdout);
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.outputs.push(OutputConfig::Stderr);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(OutputConfig::File(path.into()));
        self
    }

    pub fn with_ring_buffer(mut self, capacity: usize) -> Self {
        self.outputs.push(OutputConfig::RingBuffer(capacity));
        self
    }

    /// Builds the logger. Returns the ring buffer too when one was configured.
    ///
    /// Outputs whose cargo feature is disabled are skipped, as are files
    /// that cannot be opened.
    pub fn init(self) -> (Arc<Logger>, Option<Arc<LogRingBuffer>>) {
        let logger = Logger::new(self.level);
        let mut ring = None;

        for output in self.outputs {
            match output {
                OutputConfig::Stdout => {
                    #[cfg(feature = "stdout")]
                    logger.add_sink(crate::logger::StdoutSink);
                }
                OutputConfig::Stderr => {
                    #[cfg(feature = "stderr")]
                    logger.add_sink(crate::logger::StderrSink);
                }
                OutputConfig::File(_path) => {
                    #[cfg(feature = "file")]
                    {
                        if let Ok(sink) = crate::logger::FileSink::new(&_path) {
                            logger.add_sink(sink);
                        }
                    }
                }
                OutputConfig::RingBuffer(capacity) => {
                    let buffer = LogRingBuffer::new(capacity);
                    logger.add_sink(buffer.clone());
                    ring = Some(buffer);
                }
            }
        }

        (logger, ring)
    }
}
