//! LZMA2 chunked framing.
//!
//! LZMA2 wraps raw LZMA streams into self-delimiting chunks so that a
//! container can carry incompressible data unexpanded, reset the
//! dictionary or coder state mid-stream, and know every chunk's exact
//! packed and unpacked size up front.
//!
//! ## Chunk format
//!
//! Every chunk opens with a control byte:
//!
//! - `0x00` — end of stream
//! - `0x01` — uncompressed chunk, dictionary reset first
//! - `0x02` — uncompressed chunk, no reset
//! - `0x80..=0xFF` — LZMA chunk; bits 5..6 carry the reset code
//!   (0 = none, 1 = state, 2 = state + new props, 3 = state + new props
//!   + dictionary), bits 0..4 are the top bits of `unpack_size − 1`
//!
//! Compressed chunks follow with two bytes of `unpack_size − 1`, two
//! bytes of `pack_size − 1`, and, for reset codes ≥ 2, the properties
//! byte. Uncompressed chunks carry two bytes of `size − 1`. All size
//! fields are big-endian.

use crate::decoder::{CoreStatus, LzmaCore};
use crate::encoder::{LzmaEncoder, LzmaOptions};
use crate::model::{DICT_SIZE_MIN, LzmaProperties};
use crate::range_coder::RangeDecoder;
use sevenlz_core::error::{Result, SevenLzError};
use sevenlz_core::ringbuffer::HistoryBuffer;
use sevenlz_core::traits::{CancelToken, Control, DecodeStatus, ProgressFn};
use std::io::Read;

/// Maximum unpacked bytes per compressed chunk (21-bit size field).
pub const CHUNK_MAX_UNPACKED: usize = 1 << 21;

/// Maximum packed bytes per compressed chunk (16-bit size field).
pub const CHUNK_MAX_PACKED: usize = 1 << 16;

/// Maximum bytes per uncompressed chunk (16-bit size field).
pub const CHUNK_MAX_UNCOMPRESSED: usize = 1 << 16;

/// Control byte constants and helpers.
pub mod control {
    /// End of stream.
    pub const EOS: u8 = 0x00;
    /// Uncompressed chunk, dictionary reset.
    pub const UNCOMPRESSED_RESET: u8 = 0x01;
    /// Uncompressed chunk, no reset.
    pub const UNCOMPRESSED: u8 = 0x02;
    /// LZMA chunk flag (bit 7).
    pub const LZMA_FLAG: u8 = 0x80;

    /// No reset before this chunk.
    pub const RESET_NONE: u8 = 0;
    /// Reset coder state, keep properties.
    pub const RESET_STATE: u8 = 1;
    /// Reset coder state, new properties byte follows.
    pub const RESET_STATE_PROPS: u8 = 2;
    /// Reset state, new properties, and the dictionary.
    pub const RESET_ALL: u8 = 3;

    /// Build an LZMA chunk control byte.
    #[inline]
    pub const fn lzma(reset: u8, unpack_size_high: u8) -> u8 {
        LZMA_FLAG | (reset << 5) | (unpack_size_high & 0x1F)
    }

    /// Reset code of an LZMA control byte.
    #[inline]
    pub const fn reset_code(ctrl: u8) -> u8 {
        (ctrl >> 5) & 0x3
    }
}

/// LZMA2 encoder configuration.
#[derive(Debug, Clone, Copy)]
pub struct Lzma2Config {
    /// Input bytes per chunk attempt, clamped to [`CHUNK_MAX_UNPACKED`].
    pub chunk_size: usize,
    /// Options for the per-chunk LZMA encoders.
    pub options: LzmaOptions,
}

impl Lzma2Config {
    /// Configuration from encoder options, default chunking.
    pub fn new(options: LzmaOptions) -> Self {
        Self {
            chunk_size: CHUNK_MAX_UNPACKED,
            options,
        }
    }

    /// Set the chunk size.
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(1, CHUNK_MAX_UNPACKED);
        self
    }
}

impl Default for Lzma2Config {
    fn default() -> Self {
        Self::new(LzmaOptions::default())
    }
}

/// LZMA2 encoder.
///
/// Each chunk is coded as an independent LZMA stream context (state and
/// properties reset; the first chunk also resets the dictionary), so the
/// stream decodes with any conforming decoder while chunks stay
/// individually re-encodable. Chunks that would expand are stored
/// uncompressed instead.
pub struct Lzma2Encoder {
    config: Lzma2Config,
}

impl Lzma2Encoder {
    /// Create an encoder; options are validated here.
    pub fn new(config: Lzma2Config) -> Result<Self> {
        config.options.validate()?;
        Ok(Self { config })
    }

    /// The configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Encode `data` into a terminated LZMA2 stream.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.encode_with(data, &CancelToken::new(), None)
    }

    /// Encode with cancellation and progress checks at chunk boundaries.
    pub fn encode_with(
        &self,
        data: &[u8],
        cancel: &CancelToken,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode_body(data, cancel, progress.as_deref_mut(), &mut out)?;
        out.push(control::EOS);
        Ok(out)
    }

    /// Encode the chunk sequence without the stream terminator. The
    /// parallel block encoder concatenates such bodies before adding a
    /// single terminator.
    pub(crate) fn encode_body(
        &self,
        data: &[u8],
        cancel: &CancelToken,
        mut progress: Option<&mut ProgressFn<'_>>,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let mut offset = 0usize;
        let mut first = true;

        while offset < data.len() {
            if cancel.is_canceled() {
                return Err(SevenLzError::Canceled);
            }
            if let Some(cb) = progress.as_deref_mut() {
                if cb(offset as u64, out.len() as u64) == Control::Cancel {
                    return Err(SevenLzError::Canceled);
                }
            }

            let mut take = (data.len() - offset).min(self.config.chunk_size);
            loop {
                let chunk = &data[offset..offset + take];
                let packed = self.compress_chunk(chunk)?;

                if packed.len() < chunk.len() && packed.len() <= CHUNK_MAX_PACKED {
                    write_lzma_chunk(out, chunk.len(), &packed, self.config.options.props, first);
                    break;
                }
                if packed.len() > CHUNK_MAX_PACKED && take > CHUNK_MAX_UNCOMPRESSED {
                    // Too big for the 16-bit pack field; halve the input
                    // until it fits or falls through to stored chunks.
                    take /= 2;
                    continue;
                }
                write_uncompressed_chunks(out, chunk, first);
                break;
            }

            offset += take;
            first = false;
        }

        if let Some(cb) = progress.as_deref_mut() {
            let _ = cb(offset as u64, out.len() as u64);
        }
        Ok(())
    }

    fn compress_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = LzmaEncoder::new(self.config.options.write_end_marker(false))?;
        encoder.encode(chunk)
    }
}

fn write_lzma_chunk(
    out: &mut Vec<u8>,
    unpack_size: usize,
    packed: &[u8],
    props: LzmaProperties,
    reset_dict: bool,
) {
    let reset = if reset_dict {
        control::RESET_ALL
    } else {
        control::RESET_STATE_PROPS
    };
    let unpack_m1 = unpack_size - 1;
    let pack_m1 = packed.len() - 1;

    out.push(control::lzma(reset, (unpack_m1 >> 16) as u8));
    out.extend_from_slice(&(unpack_m1 as u16).to_be_bytes());
    out.extend_from_slice(&(pack_m1 as u16).to_be_bytes());
    out.push(props.to_byte());
    out.extend_from_slice(packed);
}

fn write_uncompressed_chunks(out: &mut Vec<u8>, data: &[u8], mut reset_dict: bool) {
    for part in data.chunks(CHUNK_MAX_UNCOMPRESSED) {
        out.push(if reset_dict {
            control::UNCOMPRESSED_RESET
        } else {
            control::UNCOMPRESSED
        });
        out.extend_from_slice(&((part.len() - 1) as u16).to_be_bytes());
        out.extend_from_slice(part);
        reset_dict = false;
    }
}

/// LZMA2 decoder.
///
/// Holds the dictionary and coder state across chunks, applying the
/// resets each control byte demands, and enforces that every chunk
/// consumes exactly its declared packed size and produces exactly its
/// declared unpacked size.
pub struct Lzma2Decoder {
    history: HistoryBuffer,
    core: Option<LzmaCore>,
    props: Option<LzmaProperties>,
    /// The first chunk must reset the dictionary.
    need_dict_reset: bool,
    /// An uncompressed chunk invalidates the coder state; the next
    /// compressed chunk must carry a state reset.
    need_state_reset: bool,
    finished: bool,
}

impl Lzma2Decoder {
    /// Create a decoder with a dictionary of `dict_size` bytes (rounded
    /// up to 4 KiB).
    pub fn new(dict_size: u32) -> Self {
        Self {
            history: HistoryBuffer::new(dict_size.max(DICT_SIZE_MIN) as usize),
            core: None,
            props: None,
            need_dict_reset: true,
            need_state_reset: true,
            finished: false,
        }
    }

    /// Whether the stream terminator was seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode chunks from `reader` until the terminator or end of input.
    ///
    /// Exactly the declared bytes of each chunk are consumed; anything
    /// after the terminator byte is left unread in `reader`.
    pub fn decode<R: Read>(&mut self, reader: &mut R) -> Result<(Vec<u8>, DecodeStatus)> {
        self.decode_with(reader, &CancelToken::new())
    }

    /// [`decode`](Self::decode) with a cancellation check per chunk.
    pub fn decode_with<R: Read>(
        &mut self,
        reader: &mut R,
        cancel: &CancelToken,
    ) -> Result<(Vec<u8>, DecodeStatus)> {
        let mut out = Vec::new();

        loop {
            if self.finished {
                return Ok((out, DecodeStatus::ReachedEndMarker));
            }
            if cancel.is_canceled() {
                return Err(SevenLzError::Canceled);
            }

            let mut ctrl = [0u8; 1];
            match reader.read(&mut ctrl) {
                Ok(0) => return Ok((out, DecodeStatus::NeedMoreInput)),
                Ok(_) => {}
                Err(e) => return Err(e.into()),
            }
            let ctrl = ctrl[0];

            match ctrl {
                control::EOS => {
                    self.finished = true;
                    return Ok((out, DecodeStatus::ReachedEndMarker));
                }
                control::UNCOMPRESSED_RESET | control::UNCOMPRESSED => {
                    self.decode_uncompressed_chunk(reader, ctrl, &mut out)?;
                }
                c if c >= control::LZMA_FLAG => {
                    self.decode_lzma_chunk(reader, c, &mut out)?;
                }
                c => {
                    return Err(SevenLzError::invalid_header(format!(
                        "invalid LZMA2 control byte 0x{c:02X}"
                    )));
                }
            }
        }
    }

    fn decode_uncompressed_chunk<R: Read>(
        &mut self,
        reader: &mut R,
        ctrl: u8,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let reset_dict = ctrl == control::UNCOMPRESSED_RESET;
        if self.need_dict_reset && !reset_dict {
            return Err(SevenLzError::invalid_header(
                "first LZMA2 chunk must reset the dictionary",
            ));
        }

        let size = read_be16(reader)? as usize + 1;

        if reset_dict {
            self.history.reset();
        }

        let start = out.len();
        out.resize(start + size, 0);
        reader
            .read_exact(&mut out[start..])
            .map_err(|_| SevenLzError::unexpected_eof(size))?;
        for &byte in &out[start..] {
            self.history.push(byte);
        }

        self.need_dict_reset = false;
        self.need_state_reset = true;
        Ok(())
    }

    fn decode_lzma_chunk<R: Read>(
        &mut self,
        reader: &mut R,
        ctrl: u8,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let reset = control::reset_code(ctrl);

        let unpack_size = (((ctrl & 0x1F) as usize) << 16 | read_be16(reader)? as usize) + 1;
        let pack_size = read_be16(reader)? as usize + 1;

        if reset >= control::RESET_STATE_PROPS {
            let mut byte = [0u8; 1];
            reader
                .read_exact(&mut byte)
                .map_err(|_| SevenLzError::unexpected_eof(1))?;
            let props = LzmaProperties::from_byte(byte[0])
                .ok_or_else(|| SevenLzError::invalid_header("invalid LZMA2 properties byte"))?;
            self.props = Some(props);
        }

        if self.need_dict_reset && reset != control::RESET_ALL {
            return Err(SevenLzError::invalid_header(
                "first LZMA2 chunk must reset the dictionary",
            ));
        }
        if self.need_state_reset && reset == control::RESET_NONE {
            return Err(SevenLzError::invalid_header(
                "LZMA2 chunk requires a state reset here",
            ));
        }

        let props = self
            .props
            .ok_or_else(|| SevenLzError::invalid_header("LZMA2 chunk before any properties"))?;

        if reset == control::RESET_ALL {
            self.history.reset();
        }
        if reset >= control::RESET_STATE {
            match &mut self.core {
                Some(core) => core.reset(Some(props)),
                None => self.core = Some(LzmaCore::new(props)),
            }
        }
        let core = self
            .core
            .as_mut()
            .ok_or_else(|| SevenLzError::invalid_header("LZMA2 chunk before any state reset"))?;

        let mut packed = vec![0u8; pack_size];
        reader
            .read_exact(&mut packed)
            .map_err(|_| SevenLzError::unexpected_eof(pack_size))?;

        let mut rc = RangeDecoder::new(std::io::Cursor::new(&packed[..]))?;

        let status =
            core.decode_limit(&mut rc, &mut self.history, out, unpack_size as u64)?;
        if status == CoreStatus::EndMarker {
            return Err(SevenLzError::corrupted(
                out.len() as u64,
                "end marker before the declared chunk size",
            ));
        }

        // A chunk may still close with an end marker even though it is
        // length-delimited; consume it so the size accounting below sees
        // the whole packed payload.
        if (rc.get_ref().position() as usize) < pack_size {
            core.consume_end_marker(&mut rc)?;
        }

        // The chunk must account for every declared packed byte.
        let consumed = rc.get_ref().position() as usize;
        if consumed != pack_size {
            return Err(SevenLzError::size_mismatch(pack_size as u64, consumed as u64));
        }

        self.need_dict_reset = false;
        self.need_state_reset = false;
        Ok(())
    }
}

fn read_be16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader
        .read_exact(&mut buf)
        .map_err(|_| SevenLzError::unexpected_eof(2))?;
    Ok(u16::from_be_bytes(buf))
}

/// Encode `data` into a terminated LZMA2 stream.
pub fn encode_lzma2(data: &[u8], config: &Lzma2Config) -> Result<Vec<u8>> {
    Lzma2Encoder::new(*config)?.encode(data)
}

/// Decode a complete LZMA2 stream from a slice.
pub fn decode_lzma2(data: &[u8], dict_size: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(data);
    let mut decoder = Lzma2Decoder::new(dict_size);
    let (out, status) = decoder.decode(&mut cursor)?;
    match status {
        DecodeStatus::ReachedEndMarker => Ok(out),
        _ => Err(SevenLzError::unexpected_eof(1)),
    }
}

/// Dictionary size from the one-byte LZMA2 properties encoding used by
/// the XZ/7z containers: `(2 | (p & 1)) << (p / 2 + 11)`, with 40
/// meaning 4 GiB − 1.
pub fn dict_size_from_props(props: u8) -> Option<u32> {
    match props {
        0..=39 => Some((2 | (props as u32 & 1)) << (props / 2 + 11)),
        40 => Some(u32::MAX),
        _ => None,
    }
}

/// Smallest properties byte whose dictionary covers `dict_size`.
pub fn props_from_dict_size(dict_size: u32) -> u8 {
    for props in 0..40u8 {
        if dict_size_from_props(props).is_some_and(|s| s >= dict_size) {
            return props;
        }
    }
    40
}
