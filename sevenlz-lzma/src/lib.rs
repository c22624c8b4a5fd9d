//! # SevenLz LZMA
//!
//! The LZMA/LZMA2 compression engine at the heart of the SevenLz stack.
//!
//! ## Components
//!
//! - [`range_coder`]: the adaptive binary range coder
//! - [`model`]: context probability tables and the state machine
//! - [`match_finder`]: hc4/bt4 sliding-window match finders
//! - [`encoder`] / [`decoder`]: the raw LZMA bitstream coders
//! - [`lzma2`]: the chunked framing used by the 7z/XZ containers
//! - `parallel` (feature `parallel`): block-parallel LZMA2 encoding
//!
//! ## Usage
//!
//! ```
//! use sevenlz_lzma::{compress, decompress_bytes, Level};
//!
//! let data = b"Hello, LZMA world! Hello, LZMA world!";
//! let packed = compress(data, Level::DEFAULT).unwrap();
//! let unpacked = decompress_bytes(&packed).unwrap();
//! assert_eq!(unpacked, data);
//! ```
//!
//! ## Stream layouts
//!
//! The one-shot helpers use the classic `.lzma` layout: one properties
//! byte (`(pb*5 + lp)*9 + lc`), 4 bytes of dictionary size
//! (little-endian), 8 bytes of uncompressed size (`u64::MAX` = unknown,
//! end-marker delimited), then the raw range-coded stream. The LZMA2
//! layout in [`lzma2`] is self-delimiting instead: sized chunks with
//! reset control and a `0x00` terminator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoder;
pub mod encoder;
pub mod lzma2;
pub mod match_finder;
mod match_finder_mt;
pub mod model;
pub mod optimal;
#[cfg(feature = "parallel")]
pub mod parallel;
pub mod price;
pub mod range_coder;

// Re-exports
pub use decoder::{LzmaDecoder, decompress, decompress_raw};
pub use encoder::{LzmaEncoder, LzmaOptions, ParseMode};
pub use lzma2::{
    Lzma2Config, Lzma2Decoder, Lzma2Encoder, decode_lzma2, dict_size_from_props, encode_lzma2,
    props_from_dict_size,
};
pub use match_finder::{Match, MatchFinder, MatchFinderKind, MatchFinderParams};
pub use model::{LzmaModel, LzmaProperties, State};
pub use range_coder::{RangeDecoder, RangeEncoder};

use sevenlz_core::error::Result;

/// Compression level, 0 (fastest) to 9 (best).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level(u8);

impl Level {
    /// Fastest compression (level 0).
    pub const FAST: Self = Self(0);
    /// Default compression (level 6).
    pub const DEFAULT: Self = Self(6);
    /// Best compression (level 9).
    pub const BEST: Self = Self(9);

    /// Create a level; values above 9 clamp to 9.
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    /// The level value.
    pub fn level(&self) -> u8 {
        self.0
    }

    /// Dictionary size preset for this level.
    pub fn dict_size(&self) -> u32 {
        match self.0 {
            0 => 1 << 16, // 64 KiB
            1 => 1 << 18, // 256 KiB
            2 => 1 << 19, // 512 KiB
            3 => 1 << 20, // 1 MiB
            4 => 1 << 21, // 2 MiB
            5 => 1 << 22, // 4 MiB
            6 => 1 << 23, // 8 MiB
            7 => 1 << 24, // 16 MiB
            8 => 1 << 25, // 32 MiB
            _ => 1 << 26, // 64 MiB
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Compress to the `.lzma` layout (13-byte header + raw stream).
///
/// The header carries the exact uncompressed size, so the stream omits
/// the end marker.
pub fn compress(data: &[u8], level: Level) -> Result<Vec<u8>> {
    let options = LzmaOptions::from_level(level).write_end_marker(false);
    let mut encoder = LzmaEncoder::new(options)?;

    let mut out = Vec::new();
    encoder.write_properties(&mut out);
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    let stream = encoder.encode(data)?;
    out.extend_from_slice(&stream);
    Ok(out)
}

/// Compress to a raw LZMA stream with explicit options.
pub fn compress_raw(data: &[u8], options: LzmaOptions) -> Result<Vec<u8>> {
    LzmaEncoder::new(options)?.encode(data)
}

/// Decompress a `.lzma` stream from a slice.
pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>> {
    decompress(std::io::Cursor::new(data))
}

/// Compress to a `.lzma` stream with default settings.
pub fn compress_bytes(data: &[u8]) -> Result<Vec<u8>> {
    compress(data, Level::DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level() {
        assert_eq!(Level::FAST.level(), 0);
        assert_eq!(Level::DEFAULT.level(), 6);
        assert_eq!(Level::BEST.level(), 9);
        assert_eq!(Level::new(100).level(), 9);
    }

    #[test]
    fn test_dict_size_presets() {
        assert_eq!(Level::FAST.dict_size(), 1 << 16);
        assert_eq!(Level::DEFAULT.dict_size(), 1 << 23);
        assert_eq!(Level::BEST.dict_size(), 1 << 26);
    }

    #[test]
    fn test_roundtrip_single_byte() {
        let packed = compress(b"A", Level::DEFAULT).unwrap();
        assert_eq!(decompress_bytes(&packed).unwrap(), b"A");
    }

    #[test]
    fn test_roundtrip_empty() {
        let packed = compress(b"", Level::DEFAULT).unwrap();
        assert_eq!(packed.len(), 13 + 5);
        assert!(decompress_bytes(&packed).unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_text() {
        let data = b"Hello, LZMA World! This is a test of compression and decompression.";
        let packed = compress(data, Level::DEFAULT).unwrap();
        assert_eq!(decompress_bytes(&packed).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_repeated() {
        let data = vec![b'A'; 1000];
        let packed = compress(&data, Level::DEFAULT).unwrap();
        assert!(packed.len() < 40);
        assert_eq!(decompress_bytes(&packed).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_every_level() {
        let data: Vec<u8> = b"abcdefgh".repeat(64);
        for level in 0..=9u8 {
            let packed = compress(&data, Level::new(level)).unwrap();
            assert_eq!(
                decompress_bytes(&packed).unwrap(),
                data,
                "level {level} failed"
            );
        }
    }

    #[test]
    fn test_header_layout() {
        let packed = compress(b"xyz", Level::new(3)).unwrap();
        assert_eq!(packed[0], 0x5D);
        // Level 3 presets a 1 MiB dictionary.
        assert_eq!(
            u32::from_le_bytes([packed[1], packed[2], packed[3], packed[4]]),
            1 << 20
        );
        assert_eq!(
            u64::from_le_bytes([
                packed[5], packed[6], packed[7], packed[8], packed[9], packed[10], packed[11],
                packed[12]
            ]),
            3
        );
    }
}
