//! Codec status vocabulary and control-flow plumbing.
//!
//! This module defines the status enums returned by the streaming coders,
//! the cooperative cancellation token, and the progress-callback contract.
//! The coders themselves live in the codec crates; they only share this
//! vocabulary.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Status of a streaming decode operation.
///
/// Corruption is not a status: it surfaces as an error and the decoder
/// refuses further input for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Input ended at a symbol/chunk boundary before the stream was
    /// complete. The caller may supply more input and re-enter.
    NeedMoreInput,
    /// The in-stream end marker (or stream terminator) was reached.
    ReachedEndMarker,
    /// The requested output limit was reached; the stream continues.
    ReachedOutputLimit,
}

/// Verdict returned by a progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Control {
    /// Keep going.
    #[default]
    Continue,
    /// Stop at the next block boundary; partial output stays valid.
    Cancel,
}

/// Progress callback, invoked at block/chunk boundaries with
/// `(bytes_consumed, bytes_produced)`.
pub type ProgressFn<'a> = dyn FnMut(u64, u64) -> Control + 'a;

/// Cooperative cancellation token.
///
/// Cheap to clone and safe to signal from another thread. Long-running
/// operations check it at block boundaries (encoders) or after each
/// decoded chunk (decoders); cancellation is non-destructive and partial
/// output remains valid up to the cancellation point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, unsignaled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
