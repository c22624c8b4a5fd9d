//! LZMA probability models.
//!
//! LZMA drives every bit through an adaptive binary range coder; this
//! module holds the catalog of context probability tables the coder is
//! indexed by:
//!
//! - literal coding (context = previous byte bits + position bits)
//! - literal-vs-match and rep-selection decisions (context = state)
//! - match and rep length coding
//! - distance slot / special-position / alignment coding
//!
//! plus the 12-entry state machine that classifies recent symbol history.

use crate::range_coder::PROB_INIT;

/// Default literal context bits.
pub const LC_DEFAULT: u32 = 3;

/// Default literal position bits.
pub const LP_DEFAULT: u32 = 0;

/// Default position bits.
pub const PB_DEFAULT: u32 = 2;

/// Maximum number of position states (pb ≤ 4).
pub const POS_STATES_MAX: usize = 1 << 4;

/// Number of states in the LZMA state machine.
pub const NUM_STATES: usize = 12;

/// Number of bits for low length coding.
pub const LEN_LOW_BITS: u32 = 3;
/// Number of bits for mid length coding.
pub const LEN_MID_BITS: u32 = 3;
/// Number of bits for high length coding.
pub const LEN_HIGH_BITS: u32 = 8;

/// Number of low length symbols.
pub const LEN_LOW_SYMBOLS: usize = 1 << LEN_LOW_BITS;
/// Number of mid length symbols.
pub const LEN_MID_SYMBOLS: usize = 1 << LEN_MID_BITS;
/// Number of high length symbols.
pub const LEN_HIGH_SYMBOLS: usize = 1 << LEN_HIGH_BITS;

/// Total number of encodable length symbols (2..=273).
pub const LEN_SYMBOLS: usize = LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + LEN_HIGH_SYMBOLS;

/// Minimum match length.
pub const MATCH_LEN_MIN: usize = 2;

/// Maximum match length.
pub const MATCH_LEN_MAX: usize = MATCH_LEN_MIN + LEN_SYMBOLS - 1;

/// Number of distance slots.
pub const DIST_SLOTS: usize = 64;

/// Number of length-conditioned distance-slot contexts.
pub const LEN_TO_DIST_STATES: usize = 4;

/// Number of alignment bits for large distances.
pub const DIST_ALIGN_BITS: u32 = 4;
/// Size of the alignment table.
pub const DIST_ALIGN_SIZE: usize = 1 << DIST_ALIGN_BITS;

/// First distance slot coded with direct + aligned bits.
pub const END_POS_MODEL_INDEX: usize = 14;

/// Distances below this are fully model-coded.
pub const FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX / 2);

/// Distance value reserved for the in-stream end marker.
pub const END_MARKER_DIST: u32 = u32::MAX;

/// Minimum accepted dictionary size (4 KiB).
pub const DICT_SIZE_MIN: u32 = 1 << 12;

/// Map a match length to its distance-slot context, clamped at 3.
#[inline]
pub fn len_to_dist_state(len: u32) -> usize {
    ((len as usize - MATCH_LEN_MIN).min(LEN_TO_DIST_STATES - 1)) as usize
}

/// Distance slot for a distance value (the `back` value, distance − 1).
///
/// Slots 0..3 are the distance itself; above that, the slot packs the bit
/// length and the bit below the top bit.
#[inline]
pub fn dist_slot(dist: u32) -> u32 {
    if dist < 4 {
        return dist;
    }
    let bits = 32 - dist.leading_zeros();
    ((bits - 1) << 1) | ((dist >> (bits - 2)) & 1)
}

/// LZMA state machine state.
///
/// Tracks which class of symbol was seen recently (runs of literals,
/// literal after match, rep after literal, ...). The value indexes the
/// first dimension of the decision probability tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State(u8);

impl State {
    /// Initial state.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Get the state value.
    pub fn value(self) -> usize {
        self.0 as usize
    }

    /// States below 7 mean the previous symbol was a literal; literals in
    /// those states use the plain (unmatched) literal coder.
    pub fn is_literal(self) -> bool {
        self.0 < 7
    }

    /// Update state after a literal.
    pub fn update_literal(&mut self) {
        self.0 = match self.0 {
            0..=3 => 0,
            4..=9 => self.0 - 3,
            _ => self.0 - 6,
        };
    }

    /// Update state after a match.
    pub fn update_match(&mut self) {
        self.0 = if self.0 < 7 { 7 } else { 10 };
    }

    /// Update state after a rep match of length ≥ 2.
    pub fn update_rep(&mut self) {
        self.0 = if self.0 < 7 { 8 } else { 11 };
    }

    /// Update state after a short rep (rep0, length 1).
    pub fn update_short_rep(&mut self) {
        self.0 = if self.0 < 7 { 9 } else { 11 };
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// LZMA properties (lc, lp, pb).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzmaProperties {
    /// Literal context bits, 0..=8.
    pub lc: u32,
    /// Literal position bits, 0..=4.
    pub lp: u32,
    /// Position bits, 0..=4.
    pub pb: u32,
}

impl LzmaProperties {
    /// Create new properties. Values are not validated here; encoder
    /// construction validates the combination.
    pub fn new(lc: u32, lp: u32, pb: u32) -> Self {
        Self { lc, lp, pb }
    }

    /// Parse from the packed properties byte `(pb * 5 + lp) * 9 + lc`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let mut v = byte as u32;
        if v >= 9 * 5 * 5 {
            return None;
        }
        let lc = v % 9;
        v /= 9;
        let lp = v % 5;
        let pb = v / 5;
        Some(Self { lc, lp, pb })
    }

    /// Encode to the packed properties byte.
    pub fn to_byte(&self) -> u8 {
        ((self.pb * 5 + self.lp) * 9 + self.lc) as u8
    }

    /// Number of literal coder contexts, `2^(lc + lp)`.
    pub fn num_literal_contexts(&self) -> usize {
        1 << (self.lc + self.lp)
    }

    /// Number of position states, `2^pb`.
    pub fn num_pos_states(&self) -> usize {
        1 << self.pb
    }

    /// Mask extracting `posState` from a position.
    pub fn pos_mask(&self) -> u64 {
        (1 << self.pb) - 1
    }

    /// Literal coder context for a position and previous byte.
    #[inline]
    pub fn literal_context(&self, pos: u64, prev_byte: u8) -> usize {
        let low = (pos & ((1 << self.lp) - 1)) as usize;
        let high = (prev_byte as usize) >> (8 - self.lc as usize);
        (low << self.lc) + high
    }
}

impl Default for LzmaProperties {
    fn default() -> Self {
        Self {
            lc: LC_DEFAULT,
            lp: LP_DEFAULT,
            pb: PB_DEFAULT,
        }
    }
}

/// Length coder model: a choice bit, a sub-choice bit, and three trees
/// for the low (2..9), mid (10..17) and high (18..273) ranges. Low and
/// mid trees are per-posState.
#[derive(Debug, Clone)]
pub struct LengthModel {
    /// Low vs mid+high.
    pub choice: u16,
    /// Mid vs high.
    pub choice2: u16,
    /// Low tree per position state.
    pub low: Vec<[u16; LEN_LOW_SYMBOLS]>,
    /// Mid tree per position state.
    pub mid: Vec<[u16; LEN_MID_SYMBOLS]>,
    /// Shared high tree.
    pub high: [u16; LEN_HIGH_SYMBOLS],
}

impl LengthModel {
    /// Create a new length model for `num_pos_states` position states.
    pub fn new(num_pos_states: usize) -> Self {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: vec![[PROB_INIT; LEN_LOW_SYMBOLS]; num_pos_states],
            mid: vec![[PROB_INIT; LEN_MID_SYMBOLS]; num_pos_states],
            high: [PROB_INIT; LEN_HIGH_SYMBOLS],
        }
    }

    /// Reset all probabilities.
    pub fn reset(&mut self) {
        self.choice = PROB_INIT;
        self.choice2 = PROB_INIT;
        for arr in &mut self.low {
            arr.fill(PROB_INIT);
        }
        for arr in &mut self.mid {
            arr.fill(PROB_INIT);
        }
        self.high.fill(PROB_INIT);
    }
}

/// Literal coder model: one 0x300-entry tree per literal context.
///
/// Entries 0x001..0x0FF form the plain bit tree; 0x100..0x2FF are the
/// matched-literal variants selected by the bit at the match distance.
#[derive(Debug, Clone)]
pub struct LiteralModel {
    /// Probability trees, one per literal context.
    pub probs: Vec<[u16; 0x300]>,
}

impl LiteralModel {
    /// Create a new literal model for `num_contexts` contexts.
    pub fn new(num_contexts: usize) -> Self {
        Self {
            probs: vec![[PROB_INIT; 0x300]; num_contexts],
        }
    }

    /// Reset all probabilities.
    pub fn reset(&mut self) {
        for tree in &mut self.probs {
            tree.fill(PROB_INIT);
        }
    }
}

/// Number of entries in the special-position table. Reverse-tree nodes
/// are 1-based, so the table carries one unused leading slot.
pub const SPECIAL_SIZE: usize = 1 + FULL_DISTANCES - END_POS_MODEL_INDEX;

/// Distance coder model: slot trees, the special-position bits for slots
/// 4..13, and the alignment bits for slots ≥ 14.
#[derive(Debug, Clone)]
pub struct DistanceModel {
    /// Slot tree per length-conditioned context.
    pub slot: [[u16; DIST_SLOTS]; LEN_TO_DIST_STATES],
    /// Reverse-tree bits for distances below [`FULL_DISTANCES`],
    /// flat-indexed by `special_base(slot) + tree_node`.
    pub special: [u16; SPECIAL_SIZE],
    /// Low 4 bits of large distances.
    pub align: [u16; DIST_ALIGN_SIZE],
}

impl DistanceModel {
    /// Create a new distance model.
    pub fn new() -> Self {
        Self {
            slot: [[PROB_INIT; DIST_SLOTS]; LEN_TO_DIST_STATES],
            special: [PROB_INIT; SPECIAL_SIZE],
            align: [PROB_INIT; DIST_ALIGN_SIZE],
        }
    }

    /// Reset all probabilities.
    pub fn reset(&mut self) {
        for tree in &mut self.slot {
            tree.fill(PROB_INIT);
        }
        self.special.fill(PROB_INIT);
        self.align.fill(PROB_INIT);
    }

    /// Flat base index into `special` for a slot in 4..14. The reverse
    /// tree for slot `s` touches indices `base + m` for tree nodes
    /// `m ∈ [1, 2^levels − 1]`; slot regions do not overlap.
    #[inline]
    pub fn special_base(slot: u32) -> usize {
        let num_direct = (slot >> 1) - 1;
        let base = (2 | (slot & 1)) << num_direct;
        (base - slot) as usize
    }
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete LZMA model: every probability table one coder instance owns.
#[derive(Debug, Clone)]
pub struct LzmaModel {
    /// Properties this model was sized for.
    pub props: LzmaProperties,

    /// Literal vs match, per state and posState.
    pub is_match: [[u16; POS_STATES_MAX]; NUM_STATES],
    /// Match vs rep.
    pub is_rep: [u16; NUM_STATES],
    /// rep0 vs rep1..3.
    pub is_rep_g0: [u16; NUM_STATES],
    /// rep1 vs rep2..3.
    pub is_rep_g1: [u16; NUM_STATES],
    /// rep2 vs rep3.
    pub is_rep_g2: [u16; NUM_STATES],
    /// Short rep vs long rep0, per state and posState.
    pub is_rep0_long: [[u16; POS_STATES_MAX]; NUM_STATES],

    /// Match length coder.
    pub match_len: LengthModel,
    /// Rep length coder.
    pub rep_len: LengthModel,

    /// Literal coder.
    pub literal: LiteralModel,

    /// Distance coder.
    pub distance: DistanceModel,
}

impl LzmaModel {
    /// Create a fresh model for the given properties.
    pub fn new(props: LzmaProperties) -> Self {
        let num_pos_states = props.num_pos_states();
        let num_literal_contexts = props.num_literal_contexts();

        Self {
            props,
            is_match: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            is_rep: [PROB_INIT; NUM_STATES],
            is_rep_g0: [PROB_INIT; NUM_STATES],
            is_rep_g1: [PROB_INIT; NUM_STATES],
            is_rep_g2: [PROB_INIT; NUM_STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; NUM_STATES],
            match_len: LengthModel::new(num_pos_states),
            rep_len: LengthModel::new(num_pos_states),
            literal: LiteralModel::new(num_literal_contexts),
            distance: DistanceModel::new(),
        }
    }

    /// Reset every probability to the equiprobable initial value.
    pub fn reset(&mut self) {
        for row in &mut self.is_match {
            row.fill(PROB_INIT);
        }
        self.is_rep.fill(PROB_INIT);
        self.is_rep_g0.fill(PROB_INIT);
        self.is_rep_g1.fill(PROB_INIT);
        self.is_rep_g2.fill(PROB_INIT);
        for row in &mut self.is_rep0_long {
            row.fill(PROB_INIT);
        }
        self.match_len.reset();
        self.rep_len.reset();
        self.literal.reset();
        self.distance.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut state = State::new();
        assert!(state.is_literal());

        state.update_match();
        assert_eq!(state.value(), 7);
        assert!(!state.is_literal());

        state.update_literal();
        assert_eq!(state.value(), 4);

        state.update_literal();
        assert_eq!(state.value(), 1);

        state.update_literal();
        assert_eq!(state.value(), 0);
    }

    #[test]
    fn test_state_rep_transitions() {
        let mut state = State::new();
        state.update_rep();
        assert_eq!(state.value(), 8);

        state.update_short_rep();
        assert_eq!(state.value(), 11);

        state.update_literal();
        assert_eq!(state.value(), 5);
    }

    #[test]
    fn test_properties_byte_roundtrip() {
        for lc in 0..=8u32 {
            for lp in 0..=4u32 {
                for pb in 0..=4u32 {
                    let props = LzmaProperties::new(lc, lp, pb);
                    let decoded = LzmaProperties::from_byte(props.to_byte()).unwrap();
                    assert_eq!(decoded, props);
                }
            }
        }
    }

    #[test]
    fn test_properties_byte_rejects_garbage() {
        assert!(LzmaProperties::from_byte(225).is_none());
        assert!(LzmaProperties::from_byte(255).is_none());
        assert!(LzmaProperties::from_byte(224).is_some());
    }

    #[test]
    fn test_default_properties() {
        let props = LzmaProperties::default();
        assert_eq!((props.lc, props.lp, props.pb), (3, 0, 2));
        assert_eq!(props.to_byte(), 0x5D);
    }

    #[test]
    fn test_literal_context() {
        let props = LzmaProperties::new(3, 0, 2);
        assert_eq!(props.literal_context(0, 0), 0);
        assert_eq!(props.literal_context(5, 0b1110_0000), 0b111);

        let props = LzmaProperties::new(0, 2, 0);
        assert_eq!(props.literal_context(6, 0xFF), 2);
    }

    #[test]
    fn test_dist_slot() {
        assert_eq!(dist_slot(0), 0);
        assert_eq!(dist_slot(3), 3);
        assert_eq!(dist_slot(4), 4);
        assert_eq!(dist_slot(5), 4);
        assert_eq!(dist_slot(6), 5);
        assert_eq!(dist_slot(7), 5);
        assert_eq!(dist_slot(96), 12);
        assert_eq!(dist_slot(u32::MAX), 63);
    }

    #[test]
    fn test_special_base_layout() {
        // Tree nodes are 1-based; regions for consecutive slots must not
        // overlap and the last one must end exactly at the table edge.
        let mut used = [false; SPECIAL_SIZE];
        for slot in 4..END_POS_MODEL_INDEX as u32 {
            let base = DistanceModel::special_base(slot);
            let levels = (slot >> 1) - 1;
            for m in 1..(1usize << levels) {
                assert!(!used[base + m], "slot {slot} node {m} collides");
                used[base + m] = true;
            }
        }
        assert!(!used[0]);
        assert!(used[SPECIAL_SIZE - 1]);
        assert_eq!(used.iter().filter(|&&u| u).count(), SPECIAL_SIZE - 1);
    }

    #[test]
    fn test_len_constants() {
        assert_eq!(MATCH_LEN_MAX, 273);
        assert_eq!(LEN_SYMBOLS, 272);
        assert_eq!(FULL_DISTANCES, 128);
    }

    #[test]
    fn test_model_creation() {
        let model = LzmaModel::new(LzmaProperties::default());
        assert_eq!(model.literal.probs.len(), 8);
        assert_eq!(model.match_len.low.len(), 4);
    }
}
