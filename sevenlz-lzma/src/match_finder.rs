//! Sliding-window match finders.
//!
//! The finders maintain hash tables over 2-, 3- and 4-byte prefixes of
//! every input position. `hash2`/`hash3` supply short candidates directly;
//! `hash4` heads a per-position structure stored in the flat `son` arena:
//!
//! - **hc4**: `son[cyclic]` holds the previous position with the same
//!   4-byte hash, forming a chain walked most-recent-first.
//! - **bt4**: `son[2 * cyclic]`/`son[2 * cyclic + 1]` hold the children of
//!   a binary search tree ordered by suffix; each lookup also re-roots the
//!   tree at the current position, so the structure is maintained
//!   incrementally as the window slides.
//!
//! Positions are stored as `u32` offsets from a moving base; entries older
//! than the cyclic buffer are expired during traversal, and when the
//! offsets approach `u32::MAX` every table is renormalized by a fixed
//! delta. The arena holds plain integers keyed by position age, so there
//! is no ownership graph to manage.

use crate::model::MATCH_LEN_MAX;

/// Sentinel for an unoccupied hash slot or absent child.
const EMPTY: u32 = u32::MAX;

/// Stored offsets above this trigger renormalization.
const NORMALIZE_THRESHOLD: u32 = 0xF000_0000;

/// hash3/hash4 multiplier (golden-ratio derived).
const HASH_PRIME: u32 = 0x9E37_79B9;

/// Slots in the 2-byte and 3-byte hash tables.
const HASH2_SIZE: usize = 1 << 16;
const HASH3_SIZE: usize = 1 << 16;

/// Upper bound on the 4-byte hash table (16 Mi slots).
const HASH4_MAX_BITS: u32 = 24;

/// A candidate back-reference: `len` bytes at `dist` (≥ 1) behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Match length in bytes.
    pub len: u32,
    /// Distance in bytes; 1 means "the previous byte".
    pub dist: u32,
}

/// Which 4-byte structure the finder maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchFinderKind {
    /// Hash chains: cheaper updates, worse candidates.
    Hc4,
    /// Binary tree: costlier updates, best candidates.
    #[default]
    Bt4,
}

/// Precomputed hash triple for one position.
#[derive(Debug, Clone, Copy)]
pub struct HashTriple {
    pub(crate) h2: u32,
    pub(crate) h3: u32,
    pub(crate) h4: u32,
}

/// 4-byte hash table mask for a dictionary size: ≈ max(64 Ki slots,
/// dictSize / 2), power-of-two, capped.
pub(crate) fn hash4_mask_for_dict(dict_size: u32) -> u32 {
    let slots = (dict_size as usize / 2)
        .max(HASH2_SIZE)
        .next_power_of_two()
        .min(1 << HASH4_MAX_BITS);
    slots as u32 - 1
}

/// Compute the hash triple for the 4 bytes at `data[pos..]`.
///
/// This is a pure function of the window contents, which is what lets the
/// multi-threaded pipeline compute it on a separate thread.
#[inline]
pub(crate) fn hash_triple(data: &[u8], pos: usize, h4_mask: u32) -> HashTriple {
    let b = &data[pos..pos + 4];
    let v2 = b[0] as u32 | (b[1] as u32) << 8;
    let v3 = v2 | (b[2] as u32) << 16;
    let v4 = v3 | (b[3] as u32) << 24;
    HashTriple {
        h2: v2,
        h3: (v3.wrapping_mul(HASH_PRIME) >> 16) & (HASH3_SIZE as u32 - 1),
        h4: (v4.wrapping_mul(HASH_PRIME) >> 8) & h4_mask,
    }
}

/// What the encoder consumes: per-position match lists plus the ability
/// to advance without asking. Implemented by the in-thread finder and by
/// the consumer end of the multi-threaded pipeline.
pub(crate) trait MatchSource {
    /// Matches at the current position; advances by one.
    fn matches(&mut self, data: &[u8], out: &mut Vec<Match>);
    /// Advance `n` positions without reporting.
    fn skip(&mut self, data: &[u8], n: usize);
}

impl MatchSource for MatchFinder {
    fn matches(&mut self, data: &[u8], out: &mut Vec<Match>) {
        MatchFinder::matches(self, data, out);
    }

    fn skip(&mut self, data: &[u8], n: usize) {
        MatchFinder::skip(self, data, n);
    }
}

/// Match finder configuration.
#[derive(Debug, Clone, Copy)]
pub struct MatchFinderParams {
    /// Dictionary size: the maximum distance ever reported.
    pub dict_size: u32,
    /// Finder structure.
    pub kind: MatchFinderKind,
    /// Maximum chain/tree descent per position.
    pub cut_value: u32,
}

impl MatchFinderParams {
    /// Parameters for a dictionary of `dict_size` bytes.
    pub fn new(dict_size: u32, kind: MatchFinderKind) -> Self {
        let cut_value = match kind {
            MatchFinderKind::Hc4 => 8 + 16,
            MatchFinderKind::Bt4 => 32,
        };
        Self {
            dict_size,
            kind,
            cut_value,
        }
    }

    /// Override the traversal depth.
    #[must_use]
    pub fn cut_value(mut self, cut_value: u32) -> Self {
        self.cut_value = cut_value.max(1);
        self
    }
}

/// Sliding-window match finder over an in-memory buffer.
///
/// The finder does not own the window; every call takes the input slice
/// and the finder tracks its current position in it. Calls must walk the
/// input strictly left to right: one `matches`/`skip` step per position.
#[derive(Debug)]
pub struct MatchFinder {
    kind: MatchFinderKind,
    dict_size: usize,
    cyclic_size: usize,
    cyclic_pos: usize,
    /// Logical position == index into the input slice.
    pos: usize,
    /// Subtracted from `pos` when storing table offsets.
    base: usize,
    hash2: Vec<u32>,
    hash3: Vec<u32>,
    hash4: Vec<u32>,
    hash4_mask: u32,
    son: Vec<u32>,
    cut_value: u32,
}

impl MatchFinder {
    /// Create a finder. All tables are allocated here, once; the coding
    /// loops never allocate.
    pub fn new(params: MatchFinderParams) -> Self {
        let dict_size = params.dict_size as usize;
        let cyclic_size = dict_size + 1;

        let h4_slots = hash4_mask_for_dict(params.dict_size) as usize + 1;

        let son_len = match params.kind {
            MatchFinderKind::Hc4 => cyclic_size,
            MatchFinderKind::Bt4 => cyclic_size * 2,
        };

        Self {
            kind: params.kind,
            dict_size,
            cyclic_size,
            cyclic_pos: 0,
            pos: 0,
            base: 0,
            hash2: vec![EMPTY; HASH2_SIZE],
            hash3: vec![EMPTY; HASH3_SIZE],
            hash4: vec![EMPTY; h4_slots],
            hash4_mask: h4_slots as u32 - 1,
            son: vec![EMPTY; son_len],
            cut_value: params.cut_value,
        }
    }

    /// Current position in the input.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Finder structure in use.
    pub fn kind(&self) -> MatchFinderKind {
        self.kind
    }

    /// Collect matches at the current position into `out` (cleared
    /// first), then advance by one. Lengths are strictly increasing;
    /// distances are at least 1 and at most `dict_size`.
    pub fn matches(&mut self, data: &[u8], out: &mut Vec<Match>) {
        if data.len() - self.pos >= 4 {
            let h = hash_triple(data, self.pos, self.hash4_mask);
            self.matches_with_hash(data, h, out);
        } else {
            out.clear();
            self.advance_unhashed();
        }
    }

    /// Advance `n` positions without reporting matches, still inserting
    /// every position into the hash structures.
    pub fn skip(&mut self, data: &[u8], n: usize) {
        for _ in 0..n {
            if data.len() - self.pos >= 4 {
                let h = hash_triple(data, self.pos, self.hash4_mask);
                self.skip_with_hash(data, h);
            } else {
                self.advance_unhashed();
            }
        }
    }

    /// `matches` with a precomputed hash triple (multi-threaded path).
    pub(crate) fn matches_with_hash(&mut self, data: &[u8], h: HashTriple, out: &mut Vec<Match>) {
        out.clear();
        let pos = self.pos;
        let len_limit = (data.len() - pos).min(MATCH_LEN_MAX);
        let cur = (pos - self.base) as u32;

        let mut max_len = 1u32;

        // Length-2 candidate from the exact 16-bit hash.
        let c2 = self.hash2[h.h2 as usize];
        self.hash2[h.h2 as usize] = cur;
        if let Some(dist) = self.live_distance(c2) {
            let mpos = pos - dist;
            if data[mpos] == data[pos] && data[mpos + 1] == data[pos + 1] {
                let len = self.extend(data, mpos, pos, 2, len_limit);
                out.push(Match {
                    len,
                    dist: dist as u32,
                });
                max_len = len;
            }
        }

        // Length-3 candidate.
        let c3 = self.hash3[h.h3 as usize];
        self.hash3[h.h3 as usize] = cur;
        if let Some(dist) = self.live_distance(c3) {
            let mpos = pos - dist;
            if len_limit >= 3
                && data[mpos] == data[pos]
                && data[mpos + 1] == data[pos + 1]
                && data[mpos + 2] == data[pos + 2]
            {
                let len = self.extend(data, mpos, pos, 3, len_limit);
                if len > max_len {
                    out.push(Match {
                        len,
                        dist: dist as u32,
                    });
                    max_len = len;
                }
            }
        }

        let head = self.hash4[h.h4 as usize];
        self.hash4[h.h4 as usize] = cur;

        match self.kind {
            MatchFinderKind::Hc4 => self.chain_find(data, head, len_limit, max_len, out),
            MatchFinderKind::Bt4 => self.tree_find(data, head, len_limit, max_len, Some(out)),
        }

        self.advance();
    }

    /// `skip` one position with a precomputed hash triple.
    pub(crate) fn skip_with_hash(&mut self, data: &[u8], h: HashTriple) {
        let pos = self.pos;
        let len_limit = (data.len() - pos).min(MATCH_LEN_MAX);
        let cur = (pos - self.base) as u32;

        self.hash2[h.h2 as usize] = cur;
        self.hash3[h.h3 as usize] = cur;
        let head = self.hash4[h.h4 as usize];
        self.hash4[h.h4 as usize] = cur;

        match self.kind {
            MatchFinderKind::Hc4 => {
                self.son[self.cyclic_pos] = head;
            }
            MatchFinderKind::Bt4 => {
                self.tree_find(data, head, len_limit, MATCH_LEN_MAX as u32, None);
            }
        }

        self.advance();
    }

    /// Distance from the current position to a stored offset, if the
    /// entry is occupied and not expired.
    #[inline]
    fn live_distance(&self, stored: u32) -> Option<usize> {
        if stored == EMPTY {
            return None;
        }
        let mpos = self.base + stored as usize;
        let dist = self.pos - mpos;
        if dist == 0 || dist > self.dict_size {
            return None;
        }
        Some(dist)
    }

    /// Extend a verified prefix of `known` bytes up to `len_limit`.
    #[inline]
    fn extend(&self, data: &[u8], mpos: usize, pos: usize, known: u32, len_limit: usize) -> u32 {
        let mut len = known as usize;
        while len < len_limit && data[mpos + len] == data[pos + len] {
            len += 1;
        }
        len as u32
    }

    /// Walk the hc4 chain, recording every strictly-longer candidate.
    fn chain_find(
        &mut self,
        data: &[u8],
        head: u32,
        len_limit: usize,
        mut max_len: u32,
        out: &mut Vec<Match>,
    ) {
        let pos = self.pos;
        self.son[self.cyclic_pos] = head;

        let mut cur_match = head;
        let mut cut = self.cut_value;

        loop {
            let Some(dist) = self.live_distance(cur_match) else {
                break;
            };
            if cut == 0 {
                break;
            }
            cut -= 1;

            let mpos = pos - dist;
            // A longer match must agree at the current best length.
            if (max_len as usize) < len_limit && data[mpos + max_len as usize] == data[pos + max_len as usize] {
                let mut len = 0usize;
                while len < len_limit && data[mpos + len] == data[pos + len] {
                    len += 1;
                }
                if len as u32 > max_len {
                    max_len = len as u32;
                    out.push(Match {
                        len: max_len,
                        dist: dist as u32,
                    });
                    if len >= len_limit {
                        break;
                    }
                }
            }

            let cyc = self.cyclic_index(dist);
            let next = self.son[cyc];
            // Chains run strictly backwards; anything else is stale.
            if next >= cur_match {
                break;
            }
            cur_match = next;
        }
    }

    /// Descend the bt4 tree from `head`, re-rooting at the current
    /// position. With `out` set, strictly-longer candidates are recorded;
    /// without, this is the pure insertion used by `skip`.
    fn tree_find(
        &mut self,
        data: &[u8],
        head: u32,
        len_limit: usize,
        mut max_len: u32,
        mut out: Option<&mut Vec<Match>>,
    ) {
        let pos = self.pos;
        let mut ptr0 = self.cyclic_pos * 2 + 1;
        let mut ptr1 = self.cyclic_pos * 2;
        let mut len0 = 0usize;
        let mut len1 = 0usize;
        let mut cur_match = head;
        let mut cut = self.cut_value;

        if len_limit < 4 {
            // Too close to the end to compare 4-byte suffixes; detach.
            self.son[ptr0] = EMPTY;
            self.son[ptr1] = EMPTY;
            return;
        }

        loop {
            let dist = match self.live_distance(cur_match) {
                Some(d) if cut > 0 => d,
                _ => {
                    self.son[ptr0] = EMPTY;
                    self.son[ptr1] = EMPTY;
                    return;
                }
            };
            cut -= 1;

            let mpos = pos - dist;
            let pair = self.cyclic_index(dist) * 2;
            let mut len = len0.min(len1);

            if data[mpos + len] == data[pos + len] {
                len += 1;
                while len < len_limit && data[mpos + len] == data[pos + len] {
                    len += 1;
                }
                if let Some(list) = out.as_deref_mut() {
                    if len as u32 > max_len {
                        max_len = len as u32;
                        list.push(Match {
                            len: max_len,
                            dist: dist as u32,
                        });
                    }
                }
                if len == len_limit {
                    // Full agreement: the node is replaced by this
                    // position; adopt its children.
                    self.son[ptr1] = self.son[pair];
                    self.son[ptr0] = self.son[pair + 1];
                    return;
                }
            }

            if data[mpos + len] < data[pos + len] {
                self.son[ptr1] = cur_match;
                ptr1 = pair + 1;
                cur_match = self.son[ptr1];
                len1 = len;
            } else {
                self.son[ptr0] = cur_match;
                ptr0 = pair;
                cur_match = self.son[ptr0];
                len0 = len;
            }
        }
    }

    /// Cyclic `son` index of the position `dist` back from current.
    #[inline]
    fn cyclic_index(&self, dist: usize) -> usize {
        if self.cyclic_pos >= dist {
            self.cyclic_pos - dist
        } else {
            self.cyclic_pos + self.cyclic_size - dist
        }
    }

    /// Advance past a tail position too short to hash.
    pub(crate) fn advance_unhashed(&mut self) {
        match self.kind {
            MatchFinderKind::Hc4 => {
                self.son[self.cyclic_pos] = EMPTY;
            }
            MatchFinderKind::Bt4 => {
                self.son[self.cyclic_pos * 2] = EMPTY;
                self.son[self.cyclic_pos * 2 + 1] = EMPTY;
            }
        }
        self.advance();
    }

    #[inline]
    fn advance(&mut self) {
        self.pos += 1;
        self.cyclic_pos += 1;
        if self.cyclic_pos == self.cyclic_size {
            self.cyclic_pos = 0;
        }
        if (self.pos - self.base) as u64 >= NORMALIZE_THRESHOLD as u64 {
            self.normalize();
        }
    }

    /// Shift every stored offset down so the tables stay within `u32`.
    ///
    /// Keeps the last cyclic buffer of offsets addressable; everything
    /// older is expired anyway and collapses to the empty sentinel.
    fn normalize(&mut self) {
        let keep = self.cyclic_size as u32;
        let delta = (self.pos - self.base) as u32 - keep;

        for table in [&mut self.hash2, &mut self.hash3, &mut self.hash4, &mut self.son] {
            for slot in table.iter_mut() {
                *slot = if *slot == EMPTY || *slot < delta {
                    EMPTY
                } else {
                    *slot - delta
                };
            }
        }
        self.base += delta as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finder(kind: MatchFinderKind, dict: u32) -> MatchFinder {
        MatchFinder::new(MatchFinderParams::new(dict, kind))
    }

    fn longest_at(mf: &mut MatchFinder, data: &[u8]) -> Option<Match> {
        let mut out = Vec::new();
        mf.matches(data, &mut out);
        out.last().copied()
    }

    #[test]
    fn test_finds_planted_match() {
        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let data = b"abcdefgh0123abcdefgh";
            let mut mf = finder(kind, 1 << 16);
            let mut out = Vec::new();

            for _ in 0..12 {
                mf.matches(data, &mut out);
            }
            // At position 12 the 8-byte run from position 0 repeats.
            mf.matches(data, &mut out);
            let best = out.last().copied().expect("no match found");
            assert_eq!(best.len, 8, "{kind:?}");
            assert_eq!(best.dist, 12, "{kind:?}");
        }
    }

    #[test]
    fn test_lengths_strictly_increase() {
        let mut data = Vec::new();
        data.extend_from_slice(b"the cat sat on the mat; the cat sat on the hat");
        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let mut mf = finder(kind, 1 << 16);
            let mut out = Vec::new();
            for _ in 0..data.len() {
                mf.matches(&data, &mut out);
                let mut last = 0;
                for m in &out {
                    assert!(m.len > last, "{kind:?}: lengths not increasing: {out:?}");
                    assert!(m.dist >= 1);
                    last = m.len;
                }
            }
        }
    }

    #[test]
    fn test_match_content_is_correct() {
        let data: Vec<u8> = (0..200u32)
            .flat_map(|i| [(i % 7) as u8, (i % 13) as u8])
            .collect();
        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let mut mf = finder(kind, 1 << 12);
            let mut out = Vec::new();
            for pos in 0..data.len() {
                mf.matches(&data, &mut out);
                for m in &out {
                    let d = m.dist as usize;
                    let l = m.len as usize;
                    assert!(d <= pos);
                    assert_eq!(
                        &data[pos - d..pos - d + l],
                        &data[pos..pos + l],
                        "{kind:?}: bogus match {m:?} at {pos}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_repeated_run() {
        let data = vec![0x41u8; 600];
        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let mut mf = finder(kind, 1 << 12);
            let mut out = Vec::new();
            mf.matches(&data, &mut out);
            assert!(out.is_empty());

            mf.matches(&data, &mut out);
            let best = out.last().unwrap();
            assert_eq!(best.dist, 1);
            assert_eq!(best.len as usize, MATCH_LEN_MAX.min(599));
        }
    }

    #[test]
    fn test_expiry_beyond_dictionary() {
        // Dictionary of 4 KiB: a repeat 5000 bytes later must not be
        // reported.
        let mut data = vec![0u8; 5016];
        let pattern = b"expiring-pattern";
        data[..16].copy_from_slice(pattern);
        // Fill the middle with unique junk so nothing else matches.
        for (i, b) in data[16..5000].iter_mut().enumerate() {
            *b = (i * 2654435761 >> 7) as u8;
        }
        data[5000..5016].copy_from_slice(pattern);

        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let mut mf = finder(kind, 1 << 12);
            let mut out = Vec::new();
            for _ in 0..5000 {
                mf.matches(&data, &mut out);
            }
            mf.matches(&data, &mut out);
            for m in &out {
                assert!(m.dist as usize <= 1 << 12, "{kind:?}: expired {m:?}");
            }
        }
    }

    #[test]
    fn test_skip_keeps_structures_searchable() {
        let data = b"0123456789abcdef0123456789abcdef";
        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let mut mf = finder(kind, 1 << 12);
            mf.skip(data, 16);
            let best = longest_at(&mut mf, data).expect("skip lost the history");
            assert_eq!(best.dist, 16);
            assert_eq!(best.len, 16);
        }
    }

    #[test]
    fn test_tail_positions() {
        let data = b"xyxyxy";
        for kind in [MatchFinderKind::Hc4, MatchFinderKind::Bt4] {
            let mut mf = finder(kind, 1 << 12);
            let mut out = Vec::new();
            for _ in 0..data.len() {
                mf.matches(data, &mut out);
                for m in &out {
                    assert!(mf.pos() - 1 + m.len as usize <= data.len());
                }
            }
            assert_eq!(mf.pos(), data.len());
        }
    }

    #[test]
    fn test_cut_value_bounds_work() {
        // A pathological input where every position hashes alike still
        // terminates quickly with a small cut value.
        let data = vec![7u8; 4096];
        let mut mf = MatchFinder::new(
            MatchFinderParams::new(1 << 12, MatchFinderKind::Hc4).cut_value(4),
        );
        let mut out = Vec::new();
        for _ in 0..data.len() {
            mf.matches(&data, &mut out);
        }
        assert_eq!(mf.pos(), data.len());
    }
}
