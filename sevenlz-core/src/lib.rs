//! # SevenLz Core
//!
//! Core components for the SevenLz compression engine.
//!
//! This crate provides the building blocks shared by the codec crates:
//!
//! - [`error`]: the engine-wide error taxonomy
//! - [`ringbuffer`]: dictionary history buffer for decoders
//! - [`traits`]: status enums, cancellation token, progress callbacks
//!
//! ## Architecture
//!
//! SevenLz is layered the way a 7z-style archiver stack is layered:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ L3: Container (out of scope here)                       │
//! │     7z directory metadata, CLI, file I/O                │
//! ├─────────────────────────────────────────────────────────┤
//! │ L2: Framing                                             │
//! │     LZMA2 chunking, parallel block encoder              │
//! ├─────────────────────────────────────────────────────────┤
//! │ L1: Codec                                               │
//! │     LZMA encoder/decoder, match finders, optimal parser │
//! ├─────────────────────────────────────────────────────────┤
//! │ L0: Foundation (this crate)                             │
//! │     errors, history buffer, cancellation, statuses      │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ringbuffer;
pub mod traits;

// Re-exports for convenience
pub use error::{Result, SevenLzError};
pub use ringbuffer::HistoryBuffer;
pub use traits::{CancelToken, Control, DecodeStatus, ProgressFn};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Result, SevenLzError};
    pub use crate::ringbuffer::HistoryBuffer;
    pub use crate::traits::{CancelToken, Control, DecodeStatus};
}
