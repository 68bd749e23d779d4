//! Error type shared by the codec and the runtime

use thiserror::Error;

/// A cell: the unit of plugin memory and of every argument
pub type Cell = i32;

/// Size of one cell in bytes
pub const CELL_SIZE: usize = std::mem::size_of::<Cell>();

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, SmxError>;

/// Errors raised while encoding, decoding or running a plugin
#[derive(Error, Debug)]
pub enum SmxError {
    /// Bad magic, missing required section, malformed table
    #[error("Invalid file format: {0}")]
    FileFormat(String),

    /// The compressed tail could not be inflated
    #[error("Decompressor error: {0}")]
    Decompressor(String),

    #[error("Code version {version} is too old (minimum {min})")]
    CodeTooOld { version: u8, min: u8 },

    #[error("Code version {version} is too new (maximum {max})")]
    CodeTooNew { version: u8, max: u8 },

    /// Name lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index {index} out of range (length {len})")]
    Index { index: usize, len: usize },

    /// Address in the heap/stack gap, out of bounds, or a non-LIFO heap pop
    #[error("Invalid address: {0}")]
    InvalidAddress(Cell),

    /// Not enough room between the heap and the stack
    #[error("Not enough space on the heap")]
    HeapLow,

    #[error("Invalid parameter: {0}")]
    Param(String),

    /// Call to a native with no function attached
    #[error("Native is not bound: {0}")]
    InvalidNative(String),

    #[error("Stack leak detected: sp is {sp}, expected {expected}")]
    StackLeak { sp: Cell, expected: Cell },

    #[error("Heap leak detected: hp is {hp}, expected {expected}")]
    HeapLeak { hp: Cell, expected: Cell },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SmxError {
    /// Classic numeric error code, as reported by hosts
    pub fn code(&self) -> i32 {
        match self {
            SmxError::FileFormat(_) | SmxError::CodeTooOld { .. } | SmxError::CodeTooNew { .. } => 1,
            SmxError::Decompressor(_) => 2,
            SmxError::HeapLow => 3,
            SmxError::Param(_) => 4,
            SmxError::InvalidAddress(_) => 5,
            SmxError::NotFound(_) => 6,
            SmxError::Index { .. } => 7,
            SmxError::StackLeak { .. } => 17,
            SmxError::HeapLeak { .. } => 18,
            SmxError::InvalidNative(_) => 21,
            // Reading the file failed before any format check
            SmxError::Io(_) => 1,
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        SmxError::FileFormat(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SmxError::format("x").code(), 1);
        assert_eq!(SmxError::CodeTooOld { version: 0, min: 1 }.code(), 1);
        assert_eq!(SmxError::Decompressor("x".into()).code(), 2);
        assert_eq!(SmxError::HeapLow.code(), 3);
        assert_eq!(SmxError::InvalidAddress(-4).code(), 5);
        assert_eq!(SmxError::NotFound("Foo".into()).code(), 6);
        assert_eq!(SmxError::Index { index: 3, len: 1 }.code(), 7);
        assert_eq!(SmxError::StackLeak { sp: 0, expected: 4 }.code(), 17);
        assert_eq!(SmxError::HeapLeak { hp: 0, expected: 4 }.code(), 18);
        assert_eq!(SmxError::InvalidNative("Foo".into()).code(), 21);
    }

    #[test]
    fn test_error_display() {
        let err = SmxError::CodeTooNew { version: 12, max: 10 };
        assert_eq!(err.to_string(), "Code version 12 is too new (maximum 10)");

        let err = SmxError::Index { index: 5, len: 2 };
        assert_eq!(err.to_string(), "Index 5 out of range (length 2)");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.smx");
        let err: SmxError = io.into();
        assert!(matches!(err, SmxError::Io(_)));
    }
}
