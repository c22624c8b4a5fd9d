//! LZMA compression.
//!
//! The encoder drives the match finder and parser over the input, coding
//! each committed symbol through the range coder: the `IsMatch`/`IsRep`
//! decision prefix, then a literal (plain or matched), a rep selection
//! plus rep length, or a match length plus slot/direct/align distance
//! bits. State, rep tuple and position advance exactly as the decoder
//! will replay them.

use crate::Level;
use crate::match_finder::{
    Match, MatchFinder, MatchFinderKind, MatchFinderParams, MatchSource,
};
use crate::match_finder_mt::{MT_MIN_INPUT, with_pipeline};
use crate::model::{
    DICT_SIZE_MIN, DIST_ALIGN_BITS, DIST_ALIGN_SIZE, DistanceModel, END_POS_MODEL_INDEX,
    LEN_LOW_BITS, LEN_LOW_SYMBOLS, LEN_MID_BITS, LEN_MID_SYMBOLS, LengthModel, LzmaModel,
    LzmaProperties, MATCH_LEN_MIN, State, dist_slot, len_to_dist_state,
};
use crate::optimal::{Command, NICE_LEN_MAX, NICE_LEN_MIN, OptimalParser, ParseContext, fast_parse};
use crate::price::{DistPriceTable, LenPriceTable};
use crate::range_coder::RangeEncoder;
use sevenlz_core::error::{Result, SevenLzError};
use sevenlz_core::traits::{CancelToken, Control, ProgressFn};

/// Input consumed between cancellation/progress checkpoints.
const CHECKPOINT_BYTES: u64 = 1 << 16;

/// Parsing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Greedy longest-match heuristic.
    Fast,
    /// Price-driven optimal parse.
    #[default]
    Normal,
}

/// Encoder configuration.
#[derive(Debug, Clone, Copy)]
pub struct LzmaOptions {
    /// Literal/position context split (lc, lp, pb).
    pub props: LzmaProperties,
    /// Dictionary size in bytes.
    pub dict_size: u32,
    /// Parsing strategy.
    pub mode: ParseMode,
    /// Match length that ends the search/parse immediately (5..=273).
    pub nice_len: u32,
    /// Match finder structure.
    pub match_finder: MatchFinderKind,
    /// Chain/tree traversal bound.
    pub cut_value: u32,
    /// 1 = single-threaded; 2 = pipelined match finder.
    pub mt_threads: u32,
    /// Append the in-stream end marker. LZMA2 chunks suppress it.
    pub write_end_marker: bool,
}

impl LzmaOptions {
    /// Preset options for a compression level.
    pub fn from_level(level: Level) -> Self {
        let l = level.level();
        let (mode, match_finder) = if l <= 3 {
            (ParseMode::Fast, MatchFinderKind::Hc4)
        } else {
            (ParseMode::Normal, MatchFinderKind::Bt4)
        };
        let nice_len = match l {
            0..=6 => 32,
            7 | 8 => 64,
            _ => 128,
        };
        let cut_value = match l {
            0..=3 => 8,
            4..=6 => 32,
            7 | 8 => 64,
            _ => 128,
        };
        Self {
            props: LzmaProperties::default(),
            dict_size: level.dict_size(),
            mode,
            nice_len,
            match_finder,
            cut_value,
            mt_threads: 1,
            write_end_marker: true,
        }
    }

    /// Set the dictionary size.
    #[must_use]
    pub fn dict_size(mut self, dict_size: u32) -> Self {
        self.dict_size = dict_size;
        self
    }

    /// Set the literal/position context counts.
    #[must_use]
    pub fn props(mut self, lc: u32, lp: u32, pb: u32) -> Self {
        self.props = LzmaProperties::new(lc, lp, pb);
        self
    }

    /// Set the parsing strategy.
    #[must_use]
    pub fn mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the nice length.
    #[must_use]
    pub fn nice_len(mut self, nice_len: u32) -> Self {
        self.nice_len = nice_len;
        self
    }

    /// Set the match finder structure.
    #[must_use]
    pub fn match_finder(mut self, kind: MatchFinderKind) -> Self {
        self.match_finder = kind;
        self
    }

    /// Set the worker count (1 or 2).
    #[must_use]
    pub fn mt_threads(mut self, mt_threads: u32) -> Self {
        self.mt_threads = mt_threads;
        self
    }

    /// Set whether the end marker is written.
    #[must_use]
    pub fn write_end_marker(mut self, write: bool) -> Self {
        self.write_end_marker = write;
        self
    }

    /// Reject invalid combinations before any output is produced.
    pub fn validate(&self) -> Result<()> {
        let p = &self.props;
        if p.lc > 8 || p.lp > 4 || p.pb > 4 {
            return Err(SevenLzError::invalid_config(
                "lc must be <= 8, lp <= 4, pb <= 4",
            ));
        }
        if p.lc + p.lp > 4 {
            return Err(SevenLzError::invalid_config("lc + lp must not exceed 4"));
        }
        if self.dict_size < DICT_SIZE_MIN {
            return Err(SevenLzError::invalid_config(
                "dictionary size below 4 KiB",
            ));
        }
        if !(NICE_LEN_MIN..=NICE_LEN_MAX).contains(&self.nice_len) {
            return Err(SevenLzError::invalid_config("nice_len out of 5..=273"));
        }
        if !(1..=2).contains(&self.mt_threads) {
            return Err(SevenLzError::invalid_config("mt_threads must be 1 or 2"));
        }
        if self.cut_value == 0 {
            return Err(SevenLzError::invalid_config("cut_value must be positive"));
        }
        Ok(())
    }
}

impl Default for LzmaOptions {
    fn default() -> Self {
        Self::from_level(Level::DEFAULT)
    }
}

/// LZMA encoder.
///
/// One instance encodes one stream at a time; `encode` resets all
/// adaptive state, so the instance (and its allocations) can be reused
/// for further streams.
pub struct LzmaEncoder {
    options: LzmaOptions,
    model: LzmaModel,
    state: State,
    /// Rep tuple as back values (distance − 1).
    reps: [u32; 4],
    /// Bytes of input consumed so far.
    pos: u64,
    len_prices: LenPriceTable,
    rep_len_prices: LenPriceTable,
    dist_prices: DistPriceTable,
}

impl LzmaEncoder {
    /// Create an encoder; the options are validated here.
    pub fn new(options: LzmaOptions) -> Result<Self> {
        options.validate()?;
        let num_pos_states = options.props.num_pos_states();
        Ok(Self {
            options,
            model: LzmaModel::new(options.props),
            state: State::new(),
            reps: [0; 4],
            pos: 0,
            len_prices: LenPriceTable::new(num_pos_states),
            rep_len_prices: LenPriceTable::new(num_pos_states),
            dist_prices: DistPriceTable::new(),
        })
    }

    /// The configured options.
    pub fn options(&self) -> &LzmaOptions {
        &self.options
    }

    /// Append the 5-byte properties header: the packed `(pb*5+lp)*9+lc`
    /// byte, then the dictionary size little-endian.
    pub fn write_properties(&self, out: &mut Vec<u8>) {
        out.push(self.options.props.to_byte());
        out.extend_from_slice(&self.options.dict_size.to_le_bytes());
    }

    /// Encode `data` as one raw LZMA stream.
    pub fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.encode_with(data, &CancelToken::new(), None)
    }

    /// Encode with cooperative cancellation and progress reporting.
    /// The callbacks fire at block boundaries, never mid-symbol.
    pub fn encode_with(
        &mut self,
        data: &[u8],
        cancel: &CancelToken,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Vec<u8>> {
        self.reset();

        // A dictionary larger than the input buys nothing; clamping it
        // keeps the finder's cyclic structures proportional to the data.
        let needed = data
            .len()
            .clamp(DICT_SIZE_MIN as usize, u32::MAX as usize) as u32;
        let eff_dict = self.options.dict_size.min(needed);
        let params = MatchFinderParams::new(eff_dict, self.options.match_finder)
            .cut_value(self.options.cut_value);

        if self.options.mt_threads >= 2 && data.len() >= MT_MIN_INPUT {
            let progress = progress.as_deref_mut();
            with_pipeline(data, params, |source| {
                self.encode_stream(data, source, cancel, progress)
            })
        } else {
            let mut finder = MatchFinder::new(params);
            self.encode_stream(data, &mut finder, cancel, progress.as_deref_mut())
        }
    }

    fn reset(&mut self) {
        self.model.reset();
        self.state = State::new();
        self.reps = [0; 4];
        self.pos = 0;
    }

    fn refresh_prices(&mut self) {
        self.len_prices.refresh_if_stale(&self.model.match_len);
        self.rep_len_prices.refresh_if_stale(&self.model.rep_len);
        self.dist_prices.refresh_if_stale(&self.model.distance);
    }

    fn encode_stream(
        &mut self,
        data: &[u8],
        finder: &mut dyn MatchSource,
        cancel: &CancelToken,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Vec<u8>> {
        let mut rc = RangeEncoder::new();
        let mut parser = OptimalParser::new();
        let mut scratch: Vec<Match> = Vec::with_capacity(64);
        let mut next_checkpoint = CHECKPOINT_BYTES;

        self.len_prices.refresh(&self.model.match_len);
        self.rep_len_prices.refresh(&self.model.rep_len);
        self.dist_prices.refresh(&self.model.distance);

        while (self.pos as usize) < data.len() {
            if self.pos >= next_checkpoint {
                next_checkpoint = self.pos + CHECKPOINT_BYTES;
                if cancel.is_canceled() {
                    return Err(SevenLzError::Canceled);
                }
                if let Some(cb) = progress.as_deref_mut() {
                    if cb(self.pos, rc.bytes_written() as u64) == Control::Cancel {
                        return Err(SevenLzError::Canceled);
                    }
                }
            }

            self.refresh_prices();
            let ctx = ParseContext {
                model: &self.model,
                len_prices: &self.len_prices,
                rep_len_prices: &self.rep_len_prices,
                dist_prices: &self.dist_prices,
                state: self.state,
                reps: self.reps,
                nice_len: self.options.nice_len,
            };

            match self.options.mode {
                ParseMode::Fast => {
                    let cmd = fast_parse(&ctx, finder, data, self.pos as usize, &mut scratch);
                    self.emit(&mut rc, data, cmd);
                }
                ParseMode::Normal => {
                    let cmds = parser.parse(&ctx, finder, data, self.pos as usize);
                    for &cmd in cmds {
                        self.emit(&mut rc, data, cmd);
                    }
                }
            }
        }

        if self.options.write_end_marker {
            self.emit_end_marker(&mut rc);
        }

        if let Some(cb) = progress.as_deref_mut() {
            let _ = cb(self.pos, rc.bytes_written() as u64);
        }
        Ok(rc.finish())
    }

    fn emit(&mut self, rc: &mut RangeEncoder, data: &[u8], cmd: Command) {
        let pos_state = (self.pos & self.model.props.pos_mask()) as usize;
        let state_idx = self.state.value();
        let at = self.pos as usize;

        match cmd {
            Command::Literal => {
                rc.encode_bit(&mut self.model.is_match[state_idx][pos_state], 0);

                let prev_byte = if at > 0 { data[at - 1] } else { 0 };
                let lit_ctx = self.model.props.literal_context(self.pos, prev_byte);
                let tree = &mut self.model.literal.probs[lit_ctx];

                if self.state.is_literal() {
                    encode_literal(rc, tree, data[at]);
                } else {
                    let match_byte = data[at - self.reps[0] as usize - 1];
                    encode_literal_matched(rc, tree, data[at], match_byte);
                }

                self.state.update_literal();
                self.pos += 1;
            }
            Command::ShortRep => {
                rc.encode_bit(&mut self.model.is_match[state_idx][pos_state], 1);
                rc.encode_bit(&mut self.model.is_rep[state_idx], 1);
                rc.encode_bit(&mut self.model.is_rep_g0[state_idx], 0);
                rc.encode_bit(&mut self.model.is_rep0_long[state_idx][pos_state], 0);

                self.state.update_short_rep();
                self.pos += 1;
            }
            Command::Rep { idx, len } => {
                rc.encode_bit(&mut self.model.is_match[state_idx][pos_state], 1);
                rc.encode_bit(&mut self.model.is_rep[state_idx], 1);

                if idx == 0 {
                    rc.encode_bit(&mut self.model.is_rep_g0[state_idx], 0);
                    rc.encode_bit(&mut self.model.is_rep0_long[state_idx][pos_state], 1);
                } else {
                    rc.encode_bit(&mut self.model.is_rep_g0[state_idx], 1);
                    if idx == 1 {
                        rc.encode_bit(&mut self.model.is_rep_g1[state_idx], 0);
                    } else {
                        rc.encode_bit(&mut self.model.is_rep_g1[state_idx], 1);
                        if idx == 2 {
                            rc.encode_bit(&mut self.model.is_rep_g2[state_idx], 0);
                        } else {
                            rc.encode_bit(&mut self.model.is_rep_g2[state_idx], 1);
                        }
                    }
                    let back = self.reps[idx];
                    self.reps.copy_within(..idx, 1);
                    self.reps[0] = back;
                }

                encode_length(rc, &mut self.model.rep_len, len, pos_state);
                self.rep_len_prices.tick();
                self.state.update_rep();
                self.pos += len as u64;
            }
            Command::Match { back, len } => {
                rc.encode_bit(&mut self.model.is_match[state_idx][pos_state], 1);
                rc.encode_bit(&mut self.model.is_rep[state_idx], 0);

                encode_length(rc, &mut self.model.match_len, len, pos_state);
                self.len_prices.tick();
                encode_distance(rc, &mut self.model.distance, back, len);
                self.dist_prices.tick();

                self.reps = [back, self.reps[0], self.reps[1], self.reps[2]];
                self.state.update_match();
                self.pos += len as u64;
            }
        }
    }

    /// The end marker is a match with the all-ones back value and the
    /// minimum length.
    fn emit_end_marker(&mut self, rc: &mut RangeEncoder) {
        let pos_state = (self.pos & self.model.props.pos_mask()) as usize;
        let state_idx = self.state.value();

        rc.encode_bit(&mut self.model.is_match[state_idx][pos_state], 1);
        rc.encode_bit(&mut self.model.is_rep[state_idx], 0);
        encode_length(rc, &mut self.model.match_len, MATCH_LEN_MIN as u32, pos_state);
        encode_distance(rc, &mut self.model.distance, u32::MAX, MATCH_LEN_MIN as u32);
    }
}

/// Encode a literal through the plain bit tree.
fn encode_literal(rc: &mut RangeEncoder, tree: &mut [u16; 0x300], byte: u8) {
    let mut sym = byte as usize | 0x100;
    loop {
        let bit = ((sym >> 7) & 1) as u32;
        rc.encode_bit(&mut tree[sym >> 8], bit);
        sym <<= 1;
        if sym >= 0x10000 {
            break;
        }
    }
}

/// Encode a literal with the byte at the last match distance supplying
/// the bit context until the first mismatch.
fn encode_literal_matched(rc: &mut RangeEncoder, tree: &mut [u16; 0x300], byte: u8, match_byte: u8) {
    let mut offs = 0x100usize;
    let mut sym = byte as usize | 0x100;
    let mut mb = match_byte as usize;
    loop {
        mb <<= 1;
        let bit = ((sym >> 7) & 1) as u32;
        rc.encode_bit(&mut tree[offs + (mb & offs) + (sym >> 8)], bit);
        sym <<= 1;
        offs &= !(mb ^ sym);
        if sym >= 0x10000 {
            break;
        }
    }
}

/// Encode a match/rep length (absolute, 2..=273).
fn encode_length(rc: &mut RangeEncoder, model: &mut LengthModel, len: u32, pos_state: usize) {
    let len = len as usize - MATCH_LEN_MIN;

    if len < LEN_LOW_SYMBOLS {
        rc.encode_bit(&mut model.choice, 0);
        rc.encode_bit_tree(&mut model.low[pos_state], LEN_LOW_BITS, len as u32);
    } else if len < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
        rc.encode_bit(&mut model.choice, 1);
        rc.encode_bit(&mut model.choice2, 0);
        rc.encode_bit_tree(
            &mut model.mid[pos_state],
            LEN_MID_BITS,
            (len - LEN_LOW_SYMBOLS) as u32,
        );
    } else {
        rc.encode_bit(&mut model.choice, 1);
        rc.encode_bit(&mut model.choice2, 1);
        rc.encode_bit_tree(
            &mut model.high,
            crate::model::LEN_HIGH_BITS,
            (len - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32,
        );
    }
}

/// Encode a back value (distance − 1): slot tree, then model bits below
/// [`FULL_DISTANCES`](crate::model::FULL_DISTANCES) or direct + aligned
/// bits above.
fn encode_distance(rc: &mut RangeEncoder, model: &mut DistanceModel, back: u32, len: u32) {
    let slot = dist_slot(back);
    let len_state = len_to_dist_state(len);
    rc.encode_bit_tree(&mut model.slot[len_state], 6, slot);

    if slot >= 4 {
        let num_direct = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << num_direct;
        let reduced = back - base;

        if slot < END_POS_MODEL_INDEX as u32 {
            let probs = &mut model.special[DistanceModel::special_base(slot)..];
            rc.encode_bit_tree_reverse(probs, num_direct, reduced);
        } else {
            rc.encode_direct_bits(reduced >> DIST_ALIGN_BITS, num_direct - DIST_ALIGN_BITS);
            rc.encode_bit_tree_reverse(
                &mut model.align,
                DIST_ALIGN_BITS,
                reduced & (DIST_ALIGN_SIZE as u32 - 1),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        assert!(LzmaOptions::default().validate().is_ok());

        let bad = LzmaOptions::default().props(4, 2, 2);
        assert!(matches!(
            bad.validate(),
            Err(SevenLzError::InvalidConfig { .. })
        ));

        let bad = LzmaOptions::default().props(3, 0, 5);
        assert!(bad.validate().is_err());

        let bad = LzmaOptions::default().dict_size(1024);
        assert!(bad.validate().is_err());

        let bad = LzmaOptions::default().nice_len(4);
        assert!(bad.validate().is_err());

        let bad = LzmaOptions::default().mt_threads(3);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_level_presets() {
        let fast = LzmaOptions::from_level(Level::FAST);
        assert_eq!(fast.mode, ParseMode::Fast);
        assert_eq!(fast.match_finder, MatchFinderKind::Hc4);

        let best = LzmaOptions::from_level(Level::BEST);
        assert_eq!(best.mode, ParseMode::Normal);
        assert_eq!(best.match_finder, MatchFinderKind::Bt4);
        assert!(best.nice_len > fast.nice_len);
    }

    #[test]
    fn test_properties_header() {
        let enc = LzmaEncoder::new(
            LzmaOptions::default().dict_size(1 << 20),
        )
        .unwrap();
        let mut out = Vec::new();
        enc.write_properties(&mut out);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], 0x5D);
        assert_eq!(u32::from_le_bytes(out[1..5].try_into().unwrap()), 1 << 20);
    }

    #[test]
    fn test_empty_input_is_just_end_marker() {
        let mut enc = LzmaEncoder::new(LzmaOptions::default()).unwrap();
        let out = enc.encode(b"").unwrap();
        // End marker plus range coder flush only.
        assert!(out.len() <= 16, "empty stream was {} bytes", out.len());
    }

    #[test]
    fn test_repeated_input_compresses_hard() {
        let data = vec![0x41u8; 4096];
        let mut enc = LzmaEncoder::new(LzmaOptions::default()).unwrap();
        let out = enc.encode(&data).unwrap();
        assert!(out.len() < 30, "4096 x 'A' took {} bytes", out.len());
    }

    #[test]
    fn test_incompressible_expands_little() {
        let mut x = 0x0137_F8C1u32;
        let data: Vec<u8> = (0..(1 << 16))
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                (x >> 16) as u8
            })
            .collect();
        let mut enc = LzmaEncoder::new(LzmaOptions::default()).unwrap();
        let out = enc.encode(&data).unwrap();
        assert!(out.len() >= data.len() / 2, "random data shrank: {}", out.len());
        assert!(
            out.len() < data.len() + 1024,
            "random data blew up: {}",
            out.len()
        );
    }

    #[test]
    fn test_cancellation() {
        let data = vec![0xABu8; 1 << 20];
        let mut enc = LzmaEncoder::new(LzmaOptions::default()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            enc.encode_with(&data, &token, None),
            Err(SevenLzError::Canceled)
        ));
    }

    #[test]
    fn test_progress_reports_monotonic() {
        let data = vec![0x55u8; 1 << 18];
        let mut enc = LzmaEncoder::new(LzmaOptions::default()).unwrap();
        let mut seen = Vec::new();
        let mut cb = |consumed: u64, _produced: u64| {
            seen.push(consumed);
            Control::Continue
        };
        enc.encode_with(&data, &CancelToken::new(), Some(&mut cb))
            .unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), data.len() as u64);
    }
}
