//! Error types for SevenLz operations.
//!
//! A single error enum covers the whole engine: I/O failures from the byte
//! source/sink, corrupt-stream conditions detected by the decoders, and
//! configuration errors rejected at construction time.
//!
//! Inner coding loops never panic on malformed input; they surface one of
//! the corrupt-stream variants and refuse further input for that stream.

use std::io;
use thiserror::Error;

/// The main error type for SevenLz operations.
#[derive(Debug, Error)]
pub enum SevenLzError {
    /// I/O error from the underlying byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Corrupted data in the compressed stream.
    #[error("Corrupted stream at offset {offset}: {message}")]
    CorruptedData {
        /// Uncompressed-byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Invalid stream or chunk header.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// Invalid back-reference distance.
    #[error("Invalid back-reference distance: {distance} exceeds history size {history_size}")]
    InvalidDistance {
        /// The offending distance value.
        distance: u64,
        /// Bytes of valid history at the point of the reference.
        history_size: u64,
    },

    /// Compressed input ended before the stream was complete.
    #[error("Unexpected end of stream: expected {expected} more bytes")]
    UnexpectedEof {
        /// Number of bytes that were expected but not available.
        expected: usize,
    },

    /// Declared and actual sizes disagree (LZMA2 chunk accounting).
    #[error("Size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch {
        /// Size declared by the stream.
        declared: u64,
        /// Size actually consumed or produced.
        actual: u64,
    },

    /// Invalid encoder/decoder configuration, rejected before any output.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the rejected option.
        message: String,
    },

    /// Operation was canceled through a cancellation token.
    ///
    /// Partial output produced before the cancellation point is valid.
    #[error("Operation canceled")]
    Canceled,
}

/// Result type alias for SevenLz operations.
pub type Result<T> = std::result::Result<T, SevenLzError>;

impl SevenLzError {
    /// Create a corrupted data error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptedData {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create an invalid distance error.
    pub fn invalid_distance(distance: u64, history_size: u64) -> Self {
        Self::InvalidDistance {
            distance,
            history_size,
        }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(expected: usize) -> Self {
        Self::UnexpectedEof { expected }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(declared: u64, actual: u64) -> Self {
        Self::SizeMismatch { declared, actual }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether the error denotes a non-recoverable corrupt stream.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptedData { .. }
                | Self::InvalidHeader { .. }
                | Self::InvalidDistance { .. }
                | Self::UnexpectedEof { .. }
                | Self::SizeMismatch { .. }
        )
    }
}
