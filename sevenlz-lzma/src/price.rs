//! Bit-price model for encoder decisions.
//!
//! Every adaptive bit costs `−log₂(prob/2048)` bits of output. The parser
//! compares alternative symbol sequences by summing these costs, so they
//! are precomputed in fixed point: one bit = `1 << PRICE_SHIFT` units.
//!
//! The probability → price table is built once at compile time by the
//! squaring method: squaring the scaled probability doubles its log, and
//! counting the shifts needed to renormalize extracts integer log bits.
//! Length and distance prices are cached per context and refreshed on an
//! interval, since recomputing tree walks for every candidate in the DP
//! would dominate the parse.

use crate::model::{
    DIST_ALIGN_BITS, DIST_ALIGN_SIZE, DIST_SLOTS, DistanceModel, END_POS_MODEL_INDEX,
    FULL_DISTANCES, LEN_HIGH_BITS, LEN_LOW_BITS, LEN_LOW_SYMBOLS, LEN_MID_BITS, LEN_MID_SYMBOLS,
    LEN_SYMBOLS, LEN_TO_DIST_STATES, LengthModel, MATCH_LEN_MIN, dist_slot,
};
use crate::range_coder::{PROB_BITS, PROB_MAX};

/// log2 scale of prices: one bit of output costs `1 << PRICE_SHIFT`.
pub const PRICE_SHIFT: u32 = 4;

/// Probability quantization for the price table.
const REDUCE_BITS: u32 = 4;

/// Price of a symbol that can never be chosen.
pub const INFINITY_PRICE: u32 = 1 << 30;

/// How many length symbols are coded between refreshes of the cached
/// length-price tables.
pub const LEN_PRICE_REFRESH: u32 = 64;

/// How many distance symbols are coded between refreshes of the cached
/// distance-price tables.
pub const DIST_PRICE_REFRESH: u32 = 128;

const PRICE_TABLE_SIZE: usize = (PROB_MAX as usize) >> REDUCE_BITS;

static PROB_PRICES: [u32; PRICE_TABLE_SIZE] = build_prob_prices();

const fn build_prob_prices() -> [u32; PRICE_TABLE_SIZE] {
    let mut prices = [0u32; PRICE_TABLE_SIZE];
    let mut i = 0;
    while i < PRICE_TABLE_SIZE {
        // Midpoint of the quantization bucket.
        let mut w: u32 = ((i as u32) << REDUCE_BITS) + (1 << (REDUCE_BITS - 1));
        let mut bit_count: u32 = 0;
        let mut j = 0;
        while j < PRICE_SHIFT {
            w = w * w;
            bit_count <<= 1;
            while w >= 1 << 16 {
                w >>= 1;
                bit_count += 1;
            }
            j += 1;
        }
        prices[i] = (PROB_BITS << PRICE_SHIFT) - 15 - bit_count;
        i += 1;
    }
    prices
}

/// Price of coding `bit` against `prob`.
#[inline]
pub fn bit_price(prob: u16, bit: u32) -> u32 {
    let p = (prob as u32 ^ bit.wrapping_neg()) & (PROB_MAX as u32 - 1);
    PROB_PRICES[(p >> REDUCE_BITS) as usize]
}

/// Price of coding a 0 bit against `prob`.
#[inline]
pub fn bit_price0(prob: u16) -> u32 {
    PROB_PRICES[(prob >> REDUCE_BITS) as usize]
}

/// Price of coding a 1 bit against `prob`.
#[inline]
pub fn bit_price1(prob: u16) -> u32 {
    PROB_PRICES[((PROB_MAX - 1 - prob) >> REDUCE_BITS) as usize]
}

/// Price of `count` uniform direct bits.
#[inline]
pub fn direct_bits_price(count: u32) -> u32 {
    count << PRICE_SHIFT
}

/// Price of coding `symbol` through a bit tree.
pub fn bit_tree_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0u32;
    let mut m = 1usize;
    for i in (0..num_bits).rev() {
        let bit = (symbol >> i) & 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}

/// Price of coding `symbol` through a reverse-order bit tree.
pub fn bit_tree_reverse_price(probs: &[u16], num_bits: u32, symbol: u32) -> u32 {
    let mut price = 0u32;
    let mut m = 1usize;
    for i in 0..num_bits {
        let bit = (symbol >> i) & 1;
        price += bit_price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    price
}

/// Price of coding `byte` through a plain literal tree.
pub fn literal_price(tree: &[u16; 0x300], byte: u8) -> u32 {
    let mut price = 0u32;
    let mut sym = byte as usize | 0x100;
    loop {
        price += bit_price(tree[sym >> 8], ((sym >> 7) & 1) as u32);
        sym <<= 1;
        if sym >= 0x10000 {
            break;
        }
    }
    price
}

/// Price of coding `byte` through the matched-literal path, where each
/// bit is contexted by the corresponding bit of `match_byte` until the
/// first mismatch.
pub fn matched_literal_price(tree: &[u16; 0x300], byte: u8, match_byte: u8) -> u32 {
    let mut price = 0u32;
    let mut offs = 0x100usize;
    let mut sym = byte as usize | 0x100;
    let mut mb = match_byte as usize;
    loop {
        mb <<= 1;
        price += bit_price(
            tree[offs + (mb & offs) + (sym >> 8)],
            ((sym >> 7) & 1) as u32,
        );
        sym <<= 1;
        offs &= !(mb ^ sym);
        if sym >= 0x10000 {
            break;
        }
    }
    price
}

/// Cached prices for one length coder (match or rep lengths).
#[derive(Debug, Clone)]
pub struct LenPriceTable {
    prices: Vec<[u32; LEN_SYMBOLS]>,
    counter: u32,
}

impl LenPriceTable {
    /// Create an empty table for `num_pos_states` contexts; prices are
    /// not valid until the first [`refresh`](Self::refresh).
    pub fn new(num_pos_states: usize) -> Self {
        Self {
            prices: vec![[0u32; LEN_SYMBOLS]; num_pos_states],
            counter: 0,
        }
    }

    /// Recompute all cached prices from the live probabilities.
    pub fn refresh(&mut self, model: &LengthModel) {
        let choice0 = bit_price0(model.choice);
        let choice1 = bit_price1(model.choice);
        let choice2_0 = choice1 + bit_price0(model.choice2);
        let choice2_1 = choice1 + bit_price1(model.choice2);

        for (pos_state, row) in self.prices.iter_mut().enumerate() {
            for (i, price) in row.iter_mut().enumerate() {
                *price = if i < LEN_LOW_SYMBOLS {
                    choice0 + bit_tree_price(&model.low[pos_state], LEN_LOW_BITS, i as u32)
                } else if i < LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS {
                    choice2_0
                        + bit_tree_price(
                            &model.mid[pos_state],
                            LEN_MID_BITS,
                            (i - LEN_LOW_SYMBOLS) as u32,
                        )
                } else {
                    choice2_1
                        + bit_tree_price(
                            &model.high,
                            LEN_HIGH_BITS,
                            (i - LEN_LOW_SYMBOLS - LEN_MID_SYMBOLS) as u32,
                        )
                };
            }
        }
        self.counter = LEN_PRICE_REFRESH;
    }

    /// Refresh if the interval has elapsed.
    pub fn refresh_if_stale(&mut self, model: &LengthModel) {
        if self.counter == 0 {
            self.refresh(model);
        }
    }

    /// Note that one length symbol was coded.
    pub fn tick(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    /// Cached price of coding `len` (absolute, ≥ 2) in `pos_state`.
    #[inline]
    pub fn price(&self, len: u32, pos_state: usize) -> u32 {
        self.prices[pos_state][len as usize - MATCH_LEN_MIN]
    }
}

/// Cached prices for the distance coder.
#[derive(Debug, Clone)]
pub struct DistPriceTable {
    slot_prices: [[u32; DIST_SLOTS]; LEN_TO_DIST_STATES],
    full_prices: [[u32; FULL_DISTANCES]; LEN_TO_DIST_STATES],
    align_prices: [u32; DIST_ALIGN_SIZE],
    counter: u32,
}

impl DistPriceTable {
    /// Create an empty table; prices are not valid until the first
    /// [`refresh`](Self::refresh).
    pub fn new() -> Self {
        Self {
            slot_prices: [[0; DIST_SLOTS]; LEN_TO_DIST_STATES],
            full_prices: [[0; FULL_DISTANCES]; LEN_TO_DIST_STATES],
            align_prices: [0; DIST_ALIGN_SIZE],
            counter: 0,
        }
    }

    /// Recompute all cached prices from the live probabilities.
    pub fn refresh(&mut self, model: &DistanceModel) {
        for len_state in 0..LEN_TO_DIST_STATES {
            for slot in 0..DIST_SLOTS as u32 {
                let mut price = bit_tree_price(&model.slot[len_state], 6, slot);
                if slot >= END_POS_MODEL_INDEX as u32 {
                    // Direct bits are uniform; fold them in here so the
                    // lookup is a single add at parse time.
                    price += direct_bits_price((slot >> 1) - 1 - DIST_ALIGN_BITS);
                }
                self.slot_prices[len_state][slot as usize] = price;
            }

            for dist in 0..FULL_DISTANCES as u32 {
                let slot = dist_slot(dist);
                let mut price = self.slot_prices[len_state][slot as usize];
                if slot >= 4 {
                    let num_direct = (slot >> 1) - 1;
                    let base = (2 | (slot & 1)) << num_direct;
                    let reduced = dist - base;
                    let probs = &model.special[DistanceModel::special_base(slot)..];
                    price += bit_tree_reverse_price(probs, num_direct, reduced);
                }
                self.full_prices[len_state][dist as usize] = price;
            }
        }

        for (align, price) in self.align_prices.iter_mut().enumerate() {
            *price =
                bit_tree_reverse_price(&model.align, DIST_ALIGN_BITS, align as u32);
        }

        self.counter = DIST_PRICE_REFRESH;
    }

    /// Refresh if the interval has elapsed.
    pub fn refresh_if_stale(&mut self, model: &DistanceModel) {
        if self.counter == 0 {
            self.refresh(model);
        }
    }

    /// Note that one distance was coded.
    pub fn tick(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    /// Cached price of coding the `back` value (distance − 1).
    #[inline]
    pub fn price(&self, back: u32, len_state: usize) -> u32 {
        if (back as usize) < FULL_DISTANCES {
            self.full_prices[len_state][back as usize]
        } else {
            self.slot_prices[len_state][dist_slot(back) as usize]
                + self.align_prices[(back & (DIST_ALIGN_SIZE as u32 - 1)) as usize]
        }
    }
}

impl Default for DistPriceTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_coder::PROB_INIT;

    #[test]
    fn test_even_probability_costs_one_bit() {
        let price = bit_price(PROB_INIT, 0);
        let one_bit = 1 << PRICE_SHIFT;
        assert!(
            price.abs_diff(one_bit) <= 1,
            "50% bit priced at {price} units"
        );
        assert_eq!(bit_price(PROB_INIT, 0), bit_price(PROB_INIT, 1));
    }

    #[test]
    fn test_price_monotonic_in_probability() {
        // Likelier bits must never price higher.
        let mut last = u32::MAX;
        for prob in (64..2048u16).step_by(64) {
            let p = bit_price(prob, 0);
            assert!(p <= last, "price not monotonic at prob {prob}");
            last = p;
        }
    }

    #[test]
    fn test_skewed_prices() {
        // A near-certain bit is cheap, its complement expensive.
        assert!(bit_price(1984, 0) < 4);
        assert!(bit_price(1984, 1) > 4 << PRICE_SHIFT);
    }

    #[test]
    fn test_direct_bits_price() {
        assert_eq!(direct_bits_price(8), 8 << PRICE_SHIFT);
    }

    #[test]
    fn test_tree_price_even() {
        let probs = [PROB_INIT; 64];
        let price = bit_tree_price(&probs, 6, 33);
        let six_bits = 6 << PRICE_SHIFT;
        assert!(price.abs_diff(six_bits) <= 6);
    }

    #[test]
    fn test_literal_price_even() {
        let tree = [PROB_INIT; 0x300];
        let price = literal_price(&tree, 0xA7);
        let eight_bits = 8 << PRICE_SHIFT;
        assert!(price.abs_diff(eight_bits) <= 8);
    }

    #[test]
    fn test_matched_literal_price_even() {
        let tree = [PROB_INIT; 0x300];
        let price = matched_literal_price(&tree, 0xA7, 0xA7);
        let eight_bits = 8 << PRICE_SHIFT;
        assert!(price.abs_diff(eight_bits) <= 8);
    }

    #[test]
    fn test_len_price_table_matches_tree_walk() {
        let model = LengthModel::new(4);
        let mut table = LenPriceTable::new(4);
        table.refresh(&model);

        // Fresh model: low lengths cost choice0 + 3 even bits.
        let expected = bit_price0(model.choice)
            + bit_tree_price(&model.low[0], LEN_LOW_BITS, 3);
        assert_eq!(table.price(5, 0), expected);

        // High lengths route through both choice bits.
        let expected = bit_price1(model.choice)
            + bit_price1(model.choice2)
            + bit_tree_price(&model.high, LEN_HIGH_BITS, 100);
        assert_eq!(table.price(118, 0), expected);
    }

    #[test]
    fn test_dist_price_table_covers_both_ranges() {
        let model = DistanceModel::new();
        let mut table = DistPriceTable::new();
        table.refresh(&model);

        // Small backs come from the full table, large from slot + align.
        let small = table.price(17, 0);
        let large = table.price(1 << 20, 0);
        assert!(small > 0 && large > small);

        let slot = dist_slot(1 << 20);
        let expected = bit_tree_price(&model.slot[0], 6, slot)
            + direct_bits_price((slot >> 1) - 1 - DIST_ALIGN_BITS)
            + bit_tree_reverse_price(&model.align, DIST_ALIGN_BITS, 0);
        assert_eq!(large, expected);
    }

    #[test]
    fn test_refresh_interval() {
        let model = LengthModel::new(1);
        let mut table = LenPriceTable::new(1);
        table.refresh(&model);
        for _ in 0..LEN_PRICE_REFRESH {
            table.tick();
        }
        assert_eq!(table.counter, 0);
        table.refresh_if_stale(&model);
        assert_eq!(table.counter, LEN_PRICE_REFRESH);
    }
}
