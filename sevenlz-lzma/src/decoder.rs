//! LZMA decompression.
//!
//! The decoder replays the encoder's symbol stream: range-decode the
//! decision prefix, then reconstruct a literal or copy a match out of the
//! history ring. Distances are validated against the bytes actually in
//! history before any copy; a failed validation poisons the stream with a
//! corruption error rather than reading stale buffer contents.
//!
//! The symbol loop lives in [`LzmaCore`], shared between the standalone
//! decoder here and the LZMA2 framer, which drives it chunk by chunk with
//! its own history ring and reset policy.

use crate::model::{
    DICT_SIZE_MIN, DIST_ALIGN_BITS, DistanceModel, END_POS_MODEL_INDEX, LEN_LOW_BITS,
    LEN_LOW_SYMBOLS, LEN_MID_BITS, LEN_MID_SYMBOLS, LengthModel, LzmaModel, LzmaProperties,
    MATCH_LEN_MIN, State, len_to_dist_state,
};
use crate::range_coder::RangeDecoder;
use sevenlz_core::error::{Result, SevenLzError};
use sevenlz_core::ringbuffer::HistoryBuffer;
use sevenlz_core::traits::DecodeStatus;
use std::io::Read;

/// Why the symbol loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoreStatus {
    /// Produced exactly the requested number of bytes.
    LimitReached,
    /// Decoded the in-stream end marker.
    EndMarker,
}

/// Adaptive decoder state: probabilities, state machine, rep tuple, and
/// the position counter feeding `posState` and the literal position
/// context. Reset together, as one LZMA stream context.
#[derive(Debug, Clone)]
pub(crate) struct LzmaCore {
    model: LzmaModel,
    state: State,
    /// Rep tuple as back values (distance − 1).
    reps: [u32; 4],
    total_pos: u64,
}

impl LzmaCore {
    pub(crate) fn new(props: LzmaProperties) -> Self {
        Self {
            model: LzmaModel::new(props),
            state: State::new(),
            reps: [0; 4],
            total_pos: 0,
        }
    }

    /// Reset the stream context, optionally switching properties.
    pub(crate) fn reset(&mut self, props: Option<LzmaProperties>) {
        match props {
            Some(p) if p != self.model.props => self.model = LzmaModel::new(p),
            _ => self.model.reset(),
        }
        self.state = State::new();
        self.reps = [0; 4];
        self.total_pos = 0;
    }

    /// Decode symbols until `limit` bytes have been appended to `out`
    /// (and the history ring), or the end marker appears.
    pub(crate) fn decode_limit<R: Read>(
        &mut self,
        rc: &mut RangeDecoder<R>,
        history: &mut HistoryBuffer,
        out: &mut Vec<u8>,
        limit: u64,
    ) -> Result<CoreStatus> {
        let mut produced = 0u64;
        let pos_mask = self.model.props.pos_mask();

        while produced < limit {
            let pos_state = (self.total_pos & pos_mask) as usize;
            let state_idx = self.state.value();

            if rc.decode_bit(&mut self.model.is_match[state_idx][pos_state])? == 0 {
                let byte = self.decode_literal(rc, history)?;
                history.push(byte);
                out.push(byte);
                produced += 1;
                self.total_pos += 1;
                self.state.update_literal();
                continue;
            }

            let (len, back) = if rc.decode_bit(&mut self.model.is_rep[state_idx])? == 0 {
                // Fresh match: length then distance.
                let len = decode_length(rc, &mut self.model.match_len, pos_state)?;
                let back = decode_distance(rc, &mut self.model.distance, len)?;

                if back == u32::MAX {
                    return Ok(CoreStatus::EndMarker);
                }

                self.reps = [back, self.reps[0], self.reps[1], self.reps[2]];
                self.state.update_match();
                (len, back)
            } else if rc.decode_bit(&mut self.model.is_rep_g0[state_idx])? == 0 {
                if rc.decode_bit(&mut self.model.is_rep0_long[state_idx][pos_state])? == 0 {
                    // Short rep: one byte at rep0.
                    let dist = self.reps[0] as u64 + 1;
                    if dist > history.len() as u64 {
                        return Err(SevenLzError::invalid_distance(dist, history.len() as u64));
                    }
                    let byte = history.byte_back(dist as usize);
                    history.push(byte);
                    out.push(byte);
                    produced += 1;
                    self.total_pos += 1;
                    self.state.update_short_rep();
                    continue;
                }
                let len = decode_length(rc, &mut self.model.rep_len, pos_state)?;
                self.state.update_rep();
                (len, self.reps[0])
            } else {
                // rep1..3, MRU-rotated to the front.
                let back = if rc.decode_bit(&mut self.model.is_rep_g1[state_idx])? == 0 {
                    let b = self.reps[1];
                    self.reps[1] = self.reps[0];
                    b
                } else if rc.decode_bit(&mut self.model.is_rep_g2[state_idx])? == 0 {
                    let b = self.reps[2];
                    self.reps[2] = self.reps[1];
                    self.reps[1] = self.reps[0];
                    b
                } else {
                    let b = self.reps[3];
                    self.reps[3] = self.reps[2];
                    self.reps[2] = self.reps[1];
                    self.reps[1] = self.reps[0];
                    b
                };
                self.reps[0] = back;

                let len = decode_length(rc, &mut self.model.rep_len, pos_state)?;
                self.state.update_rep();
                (len, back)
            };

            let dist = back as u64 + 1;
            if dist > history.len() as u64 {
                return Err(SevenLzError::invalid_distance(dist, history.len() as u64));
            }
            if len as u64 > limit - produced {
                return Err(SevenLzError::corrupted(
                    self.total_pos,
                    "match crosses the declared output boundary",
                ));
            }

            history.copy_match(dist as usize, len as usize, out);
            produced += len as u64;
            self.total_pos += len as u64;
        }

        Ok(CoreStatus::LimitReached)
    }

    /// Consume a trailing end marker: one match symbol whose back value
    /// is all ones. Used by the LZMA2 framer for chunks that carry the
    /// marker despite being length-delimited.
    pub(crate) fn consume_end_marker<R: Read>(
        &mut self,
        rc: &mut RangeDecoder<R>,
    ) -> Result<()> {
        let pos_state = (self.total_pos & self.model.props.pos_mask()) as usize;
        let state_idx = self.state.value();

        if rc.decode_bit(&mut self.model.is_match[state_idx][pos_state])? != 1
            || rc.decode_bit(&mut self.model.is_rep[state_idx])? != 0
        {
            return Err(SevenLzError::corrupted(
                self.total_pos,
                "expected end marker",
            ));
        }
        let len = decode_length(rc, &mut self.model.match_len, pos_state)?;
        let back = decode_distance(rc, &mut self.model.distance, len)?;
        if back != u32::MAX {
            return Err(SevenLzError::corrupted(
                self.total_pos,
                "expected end marker",
            ));
        }
        Ok(())
    }

    fn decode_literal<R: Read>(
        &mut self,
        rc: &mut RangeDecoder<R>,
        history: &mut HistoryBuffer,
    ) -> Result<u8> {
        let prev_byte = if self.total_pos == 0 {
            0
        } else {
            history.last_byte()
        };
        let lit_ctx = self.model.props.literal_context(self.total_pos, prev_byte);
        let tree = &mut self.model.literal.probs[lit_ctx];

        let mut sym = 1usize;
        if self.state.is_literal() {
            while sym < 0x100 {
                let bit = rc.decode_bit(&mut tree[sym])? as usize;
                sym = (sym << 1) | bit;
            }
        } else {
            // Matched literal: the byte at rep0 supplies bit context
            // until the first mismatch.
            let mut mb = history.byte_back(self.reps[0] as usize + 1) as usize;
            loop {
                let match_bit = (mb >> 7) & 1;
                mb = (mb << 1) & 0xFF;
                let bit = rc.decode_bit(&mut tree[((1 + match_bit) << 8) + sym])? as usize;
                sym = (sym << 1) | bit;
                if match_bit != bit {
                    break;
                }
                if sym >= 0x100 {
                    break;
                }
            }
            while sym < 0x100 {
                let bit = rc.decode_bit(&mut tree[sym])? as usize;
                sym = (sym << 1) | bit;
            }
        }
        Ok((sym - 0x100) as u8)
    }
}

/// Decode a match/rep length (absolute, 2..=273).
pub(crate) fn decode_length<R: Read>(
    rc: &mut RangeDecoder<R>,
    model: &mut LengthModel,
    pos_state: usize,
) -> Result<u32> {
    if rc.decode_bit(&mut model.choice)? == 0 {
        let sym = rc.decode_bit_tree(&mut model.low[pos_state], LEN_LOW_BITS)?;
        Ok(sym + MATCH_LEN_MIN as u32)
    } else if rc.decode_bit(&mut model.choice2)? == 0 {
        let sym = rc.decode_bit_tree(&mut model.mid[pos_state], LEN_MID_BITS)?;
        Ok(sym + (MATCH_LEN_MIN + LEN_LOW_SYMBOLS) as u32)
    } else {
        let sym = rc.decode_bit_tree(&mut model.high, crate::model::LEN_HIGH_BITS)?;
        Ok(sym + (MATCH_LEN_MIN + LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS) as u32)
    }
}

/// Decode a back value (distance − 1).
pub(crate) fn decode_distance<R: Read>(
    rc: &mut RangeDecoder<R>,
    model: &mut DistanceModel,
    len: u32,
) -> Result<u32> {
    let len_state = len_to_dist_state(len);
    let slot = rc.decode_bit_tree(&mut model.slot[len_state], 6)?;

    if slot < 4 {
        return Ok(slot);
    }

    let num_direct = (slot >> 1) - 1;
    let mut back = (2 | (slot & 1)) << num_direct;

    if slot < END_POS_MODEL_INDEX as u32 {
        let probs = &mut model.special[DistanceModel::special_base(slot)..];
        back += rc.decode_bit_tree_reverse(probs, num_direct)?;
    } else {
        back = back.wrapping_add(rc.decode_direct_bits(num_direct - DIST_ALIGN_BITS)? << DIST_ALIGN_BITS);
        back = back.wrapping_add(rc.decode_bit_tree_reverse(&mut model.align, DIST_ALIGN_BITS)?);
    }

    Ok(back)
}

/// Streaming LZMA decoder over a byte source.
pub struct LzmaDecoder<R: Read> {
    rc: RangeDecoder<R>,
    core: LzmaCore,
    history: HistoryBuffer,
    unpacked_size: Option<u64>,
    produced: u64,
    finished: bool,
}

impl<R: Read> LzmaDecoder<R> {
    /// Create a decoder for a raw stream. Dictionary sizes below 4 KiB
    /// are rounded up, as the header rules require.
    pub fn new(reader: R, props: LzmaProperties, dict_size: u32) -> Result<Self> {
        let dict_size = dict_size.max(DICT_SIZE_MIN);
        Ok(Self {
            rc: RangeDecoder::new(reader)?,
            core: LzmaCore::new(props),
            history: HistoryBuffer::new(dict_size as usize),
            unpacked_size: None,
            produced: 0,
            finished: false,
        })
    }

    /// Bound the stream to a known uncompressed size. Reaching it counts
    /// as end of stream; an end marker is then unnecessary (and is not
    /// consumed if present).
    #[must_use]
    pub fn with_unpacked_size(mut self, size: Option<u64>) -> Self {
        self.unpacked_size = size;
        self
    }

    /// Create a decoder from the `.lzma` file layout: the 5-byte
    /// properties header, then the 8-byte little-endian uncompressed
    /// size (`u64::MAX` meaning unknown / end-marker delimited).
    pub fn from_header(mut reader: R) -> Result<Self> {
        let mut header = [0u8; 13];
        reader
            .read_exact(&mut header)
            .map_err(|_| SevenLzError::unexpected_eof(13))?;

        let props = LzmaProperties::from_byte(header[0])
            .ok_or_else(|| SevenLzError::invalid_header("invalid LZMA properties byte"))?;
        let mut dict_size = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
        let unpacked = u64::from_le_bytes([
            header[5], header[6], header[7], header[8], header[9], header[10], header[11],
            header[12],
        ]);
        let unpacked = (unpacked != u64::MAX).then_some(unpacked);

        // No distance can exceed the output size; a header demanding far
        // more dictionary than that buys nothing but allocation.
        if let Some(size) = unpacked {
            let needed = size.clamp(DICT_SIZE_MIN as u64, u32::MAX as u64) as u32;
            dict_size = dict_size.min(needed);
        }

        Ok(Self::new(reader, props, dict_size)?.with_unpacked_size(unpacked))
    }

    /// Total bytes produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Whether the end of the stream was reached.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode up to `max_out` bytes (all remaining if `None`).
    ///
    /// Corruption is an error and the decoder refuses further input
    /// afterwards; the statuses cover the well-formed outcomes.
    pub fn decode(&mut self, max_out: Option<u64>) -> Result<(Vec<u8>, DecodeStatus)> {
        if self.finished {
            return Ok((Vec::new(), DecodeStatus::ReachedEndMarker));
        }

        let remaining = self
            .unpacked_size
            .map(|total| total - self.produced);
        let budget = match (max_out, remaining) {
            (Some(m), Some(r)) => m.min(r),
            (Some(m), None) => m,
            (None, Some(r)) => r,
            // Unknown size and no cap: decode in chunks until the marker.
            (None, None) => u64::MAX,
        };

        let mut out = Vec::new();
        let status = self
            .core
            .decode_limit(&mut self.rc, &mut self.history, &mut out, budget)?;
        self.produced += out.len() as u64;

        let status = match status {
            CoreStatus::EndMarker => {
                if let Some(total) = self.unpacked_size {
                    if self.produced != total {
                        return Err(SevenLzError::size_mismatch(total, self.produced));
                    }
                }
                self.finished = true;
                DecodeStatus::ReachedEndMarker
            }
            CoreStatus::LimitReached => {
                if remaining.is_some_and(|r| r == out.len() as u64) {
                    self.finished = true;
                    DecodeStatus::ReachedEndMarker
                } else {
                    DecodeStatus::ReachedOutputLimit
                }
            }
        };
        Ok((out, status))
    }

    /// Decode the whole stream.
    pub fn decode_to_end(&mut self) -> Result<Vec<u8>> {
        let mut all = Vec::new();
        loop {
            let (chunk, status) = self.decode(None)?;
            all.extend_from_slice(&chunk);
            if status == DecodeStatus::ReachedEndMarker {
                return Ok(all);
            }
        }
    }
}

/// Decompress a `.lzma` stream (13-byte header + raw stream).
pub fn decompress<R: Read>(reader: R) -> Result<Vec<u8>> {
    LzmaDecoder::from_header(reader)?.decode_to_end()
}

/// Decompress a raw stream with out-of-band parameters.
pub fn decompress_raw<R: Read>(
    reader: R,
    props: LzmaProperties,
    dict_size: u32,
    unpacked_size: Option<u64>,
) -> Result<Vec<u8>> {
    LzmaDecoder::new(reader, props, dict_size)?
        .with_unpacked_size(unpacked_size)
        .decode_to_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_rejects_bad_properties_byte() {
        let mut data = vec![0xFFu8];
        data.extend_from_slice(&4096u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&[0; 5]);
        assert!(matches!(
            LzmaDecoder::from_header(Cursor::new(data)),
            Err(SevenLzError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let data = vec![0x5Du8, 0, 0];
        assert!(LzmaDecoder::from_header(Cursor::new(data)).is_err());
    }

    #[test]
    fn test_zero_size_stream() {
        // Properties + size 0 + the encoder's bare flush.
        let mut data = vec![0x5Du8];
        data.extend_from_slice(&4096u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0, 0, 0]);

        let out = decompress(Cursor::new(data)).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_status_for_finished_decoder() {
        let mut data = vec![0x5Du8];
        data.extend_from_slice(&4096u32.to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0, 0, 0]);

        let mut dec = LzmaDecoder::from_header(Cursor::new(data)).unwrap();
        let (chunk, status) = dec.decode(None).unwrap();
        assert!(chunk.is_empty());
        assert_eq!(status, DecodeStatus::ReachedEndMarker);
        assert!(dec.is_finished());

        // Re-entering a finished decoder is a no-op.
        let (chunk, status) = dec.decode(Some(10)).unwrap();
        assert!(chunk.is_empty());
        assert_eq!(status, DecodeStatus::ReachedEndMarker);
    }

    #[test]
    fn test_garbage_is_rejected_not_crashed() {
        // A stream of 0xFF decisions decodes into nonsense distances
        // quickly; the decoder must error out, not panic or overrun.
        let mut data = vec![0x5Du8];
        data.extend_from_slice(&4096u32.to_le_bytes());
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.push(0x00);
        data.extend_from_slice(&[0xFF; 64]);

        let result = decompress(Cursor::new(data));
        assert!(result.is_err());
    }
}
