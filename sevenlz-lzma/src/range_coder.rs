//! Range coder for LZMA compression.
//!
//! The range coder is the adaptive binary arithmetic coder underlying
//! LZMA:
//!
//! - 32-bit range, renormalized whenever it drops below 2^24
//! - 11-bit adaptive probabilities (2048 = certainty, 1024 = 50%)
//! - carry propagation on the encoder side through a one-byte cache plus
//!   a pending-0xFF counter, so no emitted byte is ever rewritten

use sevenlz_core::error::{Result, SevenLzError};
use std::io::Read;

/// Number of bits in the probability model.
pub const PROB_BITS: u32 = 11;

/// Probability representing 50%.
pub const PROB_INIT: u16 = 1 << (PROB_BITS - 1);

/// Probability denominator (2048).
pub const PROB_MAX: u16 = 1 << PROB_BITS;

/// Adaptation shift: the update moves 1/32 of the distance to the rail.
pub const MOVE_BITS: u32 = 5;

/// Renormalization threshold.
pub const TOP_VALUE: u32 = 1 << 24;

/// Range decoder over a byte source.
///
/// A short read from the source is reported as corruption of the stream
/// being decoded, not as a panic; the caller maps it into its own error
/// accounting.
#[derive(Debug)]
pub struct RangeDecoder<R: Read> {
    reader: R,
    range: u32,
    code: u32,
}

impl<R: Read> RangeDecoder<R> {
    /// Create a new range decoder, consuming the 5 initialization bytes.
    ///
    /// The first byte of every LZMA stream is zero (it is the encoder's
    /// initial cache byte); anything else is corruption.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut init = [0u8; 5];
        reader
            .read_exact(&mut init)
            .map_err(|_| SevenLzError::unexpected_eof(5))?;

        if init[0] != 0x00 {
            return Err(SevenLzError::invalid_header(
                "nonzero first byte in LZMA stream",
            ));
        }

        Ok(Self {
            reader,
            range: 0xFFFF_FFFF,
            code: u32::from_be_bytes([init[1], init[2], init[3], init[4]]),
        })
    }

    #[inline]
    fn normalize(&mut self) -> Result<()> {
        if self.range < TOP_VALUE {
            let mut buf = [0u8; 1];
            self.reader
                .read_exact(&mut buf)
                .map_err(|_| SevenLzError::unexpected_eof(1))?;
            self.range <<= 8;
            self.code = (self.code << 8) | buf[0] as u32;
        }
        Ok(())
    }

    /// Decode a single bit against an adaptive probability.
    #[inline]
    pub fn decode_bit(&mut self, prob: &mut u16) -> Result<u32> {
        let bound = (self.range >> PROB_BITS) * (*prob as u32);

        let bit = if self.code < bound {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
            0
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            1
        };

        self.normalize()?;
        Ok(bit)
    }

    /// Decode one bit at fixed 50% probability.
    #[inline]
    pub fn decode_direct_bit(&mut self) -> Result<u32> {
        self.range >>= 1;
        self.code = self.code.wrapping_sub(self.range);

        // The sign of the subtraction is the complement of the bit.
        let t = 0u32.wrapping_sub(self.code >> 31);
        self.code = self.code.wrapping_add(self.range & t);

        self.normalize()?;
        Ok(t.wrapping_add(1))
    }

    /// Decode `count` uniform bits, most significant first.
    pub fn decode_direct_bits(&mut self, count: u32) -> Result<u32> {
        let mut result = 0u32;
        for _ in 0..count {
            result = (result << 1) | self.decode_direct_bit()?;
        }
        Ok(result)
    }

    /// Decode a `num_bits`-level bit tree, returning the symbol.
    pub fn decode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            let bit = self.decode_bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
        }
        Ok(m as u32 - (1 << num_bits))
    }

    /// Decode a bit tree in reverse bit order (low bit first).
    pub fn decode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32) -> Result<u32> {
        let mut m = 1usize;
        let mut result = 0u32;
        for i in 0..num_bits {
            let bit = self.decode_bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
            result |= bit << i;
        }
        Ok(result)
    }

    /// True when the final code value is zero, as it must be after the
    /// last symbol of a well-formed stream has been decoded.
    pub fn is_finished(&self) -> bool {
        self.code == 0
    }

    /// Current range value (used by invariant tests).
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Borrow the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Release the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Range encoder accumulating into an in-memory buffer.
///
/// `low` is a 33-bit accumulator in a u64; bit 32 is the carry into
/// already-cached output. The cache mechanism defers emission of bytes
/// that a later carry could still increment.
#[derive(Debug)]
pub struct RangeEncoder {
    buffer: Vec<u8>,
    range: u32,
    low: u64,
    cache: u8,
    cache_size: u64,
}

impl RangeEncoder {
    /// Create a new range encoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            range: 0xFFFF_FFFF,
            low: 0,
            cache: 0,
            cache_size: 1,
        }
    }

    fn shift_low(&mut self) {
        if self.low < 0xFF00_0000 || self.low > 0xFFFF_FFFF {
            let carry = (self.low >> 32) as u8;
            let mut tmp = self.cache;
            loop {
                self.buffer.push(tmp.wrapping_add(carry));
                tmp = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = (self.low >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = (self.low << 8) & 0xFFFF_FFFF;
    }

    #[inline]
    fn normalize(&mut self) {
        if self.range < TOP_VALUE {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Encode a single bit against an adaptive probability.
    #[inline]
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) {
        let bound = (self.range >> PROB_BITS) * (*prob as u32);

        if bit == 0 {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
        } else {
            self.low += bound as u64;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
        }

        self.normalize();
    }

    /// Encode one bit at fixed 50% probability.
    #[inline]
    pub fn encode_direct_bit(&mut self, bit: u32) {
        self.range >>= 1;
        if bit != 0 {
            self.low += self.range as u64;
        }
        self.normalize();
    }

    /// Encode `count` uniform bits of `value`, most significant first.
    pub fn encode_direct_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.encode_direct_bit((value >> i) & 1);
        }
    }

    /// Encode a symbol through a `num_bits`-level bit tree.
    pub fn encode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encode a symbol through a bit tree in reverse bit order.
    pub fn encode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in 0..num_bits {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Flush the final 5 bytes of `low`.
    pub fn flush(&mut self) {
        for _ in 0..5 {
            self.shift_low();
        }
    }

    /// Bytes emitted so far (excluding unflushed cache).
    pub fn bytes_written(&self) -> usize {
        self.buffer.len()
    }

    /// Current range value (used by invariant tests).
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Flush and return the encoded bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.buffer
    }
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}
