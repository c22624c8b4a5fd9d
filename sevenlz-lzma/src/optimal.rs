//! Parsers: optimal (dynamic programming) and fast (greedy).
//!
//! The normal-mode parser runs a windowed DP over the lookahead: node `k`
//! holds the cheapest known way to arrive `k` bytes ahead of the current
//! position, together with the coder state and rep tuple that path would
//! leave behind. Each settled node is extended by every continuation the
//! format offers (literal, short rep, rep0..3 at every length, fresh
//! match at every length), and the committed path is read back through
//! predecessor links. Costs come from the price tables in [`crate::price`].
//!
//! Ties keep the earlier decision: a continuation replaces a node only
//! when it is strictly cheaper. This is not bitstream-visible.
//!
//! The fast-mode parser skips the DP entirely and applies the classic
//! longest-match heuristic with a preference for rep matches and a
//! penalty for short matches at large distances.

use crate::match_finder::{Match, MatchSource};
use crate::model::{
    LzmaModel, MATCH_LEN_MAX, MATCH_LEN_MIN, State, len_to_dist_state,
};
use crate::price::{
    DistPriceTable, INFINITY_PRICE, LenPriceTable, bit_price0, bit_price1, literal_price,
    matched_literal_price,
};

/// Upper bound on DP nodes per parse window.
pub const OPT_MAX: usize = 4096;

/// Lower bound for the `nice_len` option.
pub const NICE_LEN_MIN: u32 = 5;

/// Upper bound for the `nice_len` option.
pub const NICE_LEN_MAX: u32 = MATCH_LEN_MAX as u32;

/// One committed symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Single literal byte.
    Literal,
    /// rep0 with length 1.
    ShortRep,
    /// Rep match through rep index `idx`.
    Rep { idx: usize, len: u32 },
    /// Fresh match at `back` (distance − 1).
    Match { back: u32, len: u32 },
}

impl Command {
    /// Bytes this symbol consumes.
    pub(crate) fn len(&self) -> u32 {
        match self {
            Command::Literal | Command::ShortRep => 1,
            Command::Rep { len, .. } | Command::Match { len, .. } => *len,
        }
    }
}

/// How an optimal node was reached.
#[derive(Debug, Clone, Copy)]
enum Arrival {
    Start,
    Literal,
    ShortRep,
    Rep(u8),
    Match(u32),
}

#[derive(Debug, Clone, Copy)]
struct OptNode {
    price: u32,
    prev: u32,
    len: u32,
    arrival: Arrival,
    state: State,
    reps: [u32; 4],
}

impl OptNode {
    fn unreached() -> Self {
        Self {
            price: INFINITY_PRICE,
            prev: 0,
            len: 0,
            arrival: Arrival::Start,
            state: State::new(),
            reps: [0; 4],
        }
    }
}

/// Record a candidate path into node `idx` if it is strictly cheaper.
/// Grows the initialized window as needed (`last` tracks the furthest
/// touched node, so untouched slots are never re-zeroed).
#[allow(clippy::too_many_arguments)]
fn consider(
    opts: &mut [OptNode],
    last: &mut usize,
    idx: usize,
    price: u32,
    prev: usize,
    arrival: Arrival,
    len: u32,
    state: State,
    reps: [u32; 4],
) {
    while *last < idx {
        *last += 1;
        opts[*last] = OptNode::unreached();
    }
    if price < opts[idx].price {
        opts[idx] = OptNode {
            price,
            prev: prev as u32,
            len,
            arrival,
            state,
            reps,
        };
    }
}

/// Borrowed view of everything the parser prices against.
pub(crate) struct ParseContext<'a> {
    pub model: &'a LzmaModel,
    pub len_prices: &'a LenPriceTable,
    pub rep_len_prices: &'a LenPriceTable,
    pub dist_prices: &'a DistPriceTable,
    pub state: State,
    pub reps: [u32; 4],
    pub nice_len: u32,
}

/// Reusable parser buffers. Allocated once per encoder.
#[derive(Debug)]
pub(crate) struct OptimalParser {
    opts: Vec<OptNode>,
    cmds: Vec<Command>,
    matches: Vec<Match>,
    /// Highest initialized node index this window.
    last: usize,
}

impl OptimalParser {
    pub(crate) fn new() -> Self {
        Self {
            opts: vec![OptNode::unreached(); OPT_MAX],
            cmds: Vec::with_capacity(64),
            matches: Vec::with_capacity(64),
            last: 0,
        }
    }

    /// Length of the longest rep match at `data[at..]` under `reps`.
    fn rep_len(data: &[u8], at: usize, back: u32, limit: usize) -> u32 {
        let back = back as usize;
        if back + 1 > at {
            return 0;
        }
        let src = at - back - 1;
        let mut len = 0usize;
        while len < limit && data[src + len] == data[at + len] {
            len += 1;
        }
        len as u32
    }


    /// Parse one window in normal mode. Returns the committed commands;
    /// the finder is left exactly past the committed bytes.
    pub(crate) fn parse(
        &mut self,
        ctx: &ParseContext<'_>,
        finder: &mut dyn MatchSource,
        data: &[u8],
        pos: usize,
    ) -> &[Command] {
        self.cmds.clear();

        let avail = data.len() - pos;
        finder.matches(data, &mut self.matches);
        let mut consumed = 1usize;

        // Longest rep at the window start, under the live rep tuple.
        let rep_limit = avail.min(MATCH_LEN_MAX);
        let mut best_rep_idx = 0usize;
        let mut best_rep_len = 0u32;
        let mut rep0_len = 0u32;
        for (idx, &back) in ctx.reps.iter().enumerate() {
            let len = Self::rep_len(data, pos, back, rep_limit);
            if idx == 0 {
                rep0_len = len;
            }
            if len > best_rep_len {
                best_rep_len = len;
                best_rep_idx = idx;
            }
        }

        let best_match = self.matches.last().copied();

        // A confidently long match ends the window immediately.
        if best_rep_len >= ctx.nice_len {
            self.cmds.push(Command::Rep {
                idx: best_rep_idx,
                len: best_rep_len,
            });
            finder.skip(data, best_rep_len as usize - consumed);
            return &self.cmds;
        }
        if let Some(m) = best_match {
            if m.len >= ctx.nice_len {
                self.cmds.push(Command::Match {
                    back: m.dist - 1,
                    len: m.len,
                });
                finder.skip(data, m.len as usize - consumed);
                return &self.cmds;
            }
        }

        // Nothing to weigh: bare literal.
        if best_match.is_none() && best_rep_len < MATCH_LEN_MIN as u32 && rep0_len == 0 {
            self.cmds.push(Command::Literal);
            return &self.cmds;
        }

        // Seed the DP window from node 0.
        self.opts[0] = OptNode {
            price: 0,
            prev: 0,
            len: 0,
            arrival: Arrival::Start,
            state: ctx.state,
            reps: ctx.reps,
        };
        self.last = 0;

        let horizon = avail.min(OPT_MAX - 1);
        self.extend_from(ctx, data, pos, 0, horizon, rep0_len > 0);

        let mut tail: Option<Command> = None;
        let mut cur = 1usize;
        while cur < self.last {
            finder.matches(data, &mut self.matches);
            consumed += 1;

            let avail_cur = data.len() - (pos + cur);

            // A long match mid-window cuts the parse at this node; the
            // match is emitted directly after the path reaching it.
            let node_reps = self.opts[cur].reps;
            let mut cut = None;
            if let Some(m) = self.matches.last() {
                if m.len >= ctx.nice_len {
                    cut = Some(Command::Match {
                        back: m.dist - 1,
                        len: m.len,
                    });
                }
            }
            if cut.is_none() {
                let limit = avail_cur.min(MATCH_LEN_MAX);
                for (idx, &back) in node_reps.iter().enumerate() {
                    let len = Self::rep_len(data, pos + cur, back, limit);
                    if len >= ctx.nice_len {
                        cut = Some(Command::Rep { idx, len });
                        break;
                    }
                }
            }
            if let Some(cmd) = cut {
                self.last = cur;
                tail = Some(cmd);
                break;
            }

            self.extend_from(ctx, data, pos, cur, horizon, false);
            cur += 1;
        }

        // Read the winning path back through the predecessor links.
        let mut k = self.last;
        let mut rev = 0usize;
        while k > 0 {
            let node = self.opts[k];
            let cmd = match node.arrival {
                Arrival::Literal => Command::Literal,
                Arrival::ShortRep => Command::ShortRep,
                Arrival::Rep(idx) => Command::Rep {
                    idx: idx as usize,
                    len: node.len,
                },
                Arrival::Match(back) => Command::Match {
                    back,
                    len: node.len,
                },
                Arrival::Start => unreachable!("start node has no predecessor"),
            };
            self.cmds.push(cmd);
            rev += 1;
            k = node.prev as usize;
        }
        self.cmds[..rev].reverse();
        if let Some(cmd) = tail {
            self.cmds.push(cmd);
        }

        let committed: usize = self.cmds.iter().map(|c| c.len() as usize).sum();
        finder.skip(data, committed - consumed);
        &self.cmds
    }

    /// Extend every continuation from settled node `cur`, using the match
    /// list currently in `self.matches` (which belongs to this node's
    /// position).
    fn extend_from(
        &mut self,
        ctx: &ParseContext<'_>,
        data: &[u8],
        pos: usize,
        cur: usize,
        horizon: usize,
        start_rep0_hit: bool,
    ) {
        let node = self.opts[cur];
        let at = pos + cur;
        let avail = data.len() - at;
        let budget = (horizon - cur).min(avail);
        if budget == 0 {
            return;
        }

        let opts = &mut self.opts;
        let last = &mut self.last;
        let model = ctx.model;
        let pos_state = (at as u64 & model.props.pos_mask()) as usize;
        let state = node.state.value();
        let base_price = node.price;

        // Literal.
        let prev_byte = if at > 0 { data[at - 1] } else { 0 };
        let lit_ctx = model.props.literal_context(at as u64, prev_byte);
        let tree = &model.literal.probs[lit_ctx];
        let lit_price = if node.state.is_literal() {
            literal_price(tree, data[at])
        } else {
            let match_byte = data[at - node.reps[0] as usize - 1];
            matched_literal_price(tree, data[at], match_byte)
        };
        {
            let mut st = node.state;
            st.update_literal();
            consider(
                opts,
                last,
                cur + 1,
                base_price + bit_price0(model.is_match[state][pos_state]) + lit_price,
                cur,
                Arrival::Literal,
                1,
                st,
                node.reps,
            );
        }

        let rep_prefix =
            bit_price1(model.is_match[state][pos_state]) + bit_price1(model.is_rep[state]);

        // Short rep: the next byte equals the byte at rep0.
        let rep0_hit = if cur == 0 {
            start_rep0_hit
        } else {
            Self::rep_len(data, at, node.reps[0], 1) == 1
        };
        if rep0_hit {
            let price = base_price
                + rep_prefix
                + bit_price0(model.is_rep_g0[state])
                + bit_price0(model.is_rep0_long[state][pos_state]);
            let mut st = node.state;
            st.update_short_rep();
            consider(
                opts,
                last,
                cur + 1,
                price,
                cur,
                Arrival::ShortRep,
                1,
                st,
                node.reps,
            );
        }

        // Rep matches at every length.
        let rep_cap = budget.min(MATCH_LEN_MAX);
        for idx in 0..4 {
            let len = Self::rep_len(data, at, node.reps[idx], rep_cap);
            if len < MATCH_LEN_MIN as u32 {
                continue;
            }
            let sel_price = match idx {
                0 => {
                    bit_price0(model.is_rep_g0[state])
                        + bit_price1(model.is_rep0_long[state][pos_state])
                }
                1 => bit_price1(model.is_rep_g0[state]) + bit_price0(model.is_rep_g1[state]),
                2 => {
                    bit_price1(model.is_rep_g0[state])
                        + bit_price1(model.is_rep_g1[state])
                        + bit_price0(model.is_rep_g2[state])
                }
                _ => {
                    bit_price1(model.is_rep_g0[state])
                        + bit_price1(model.is_rep_g1[state])
                        + bit_price1(model.is_rep_g2[state])
                }
            };

            let mut reps = node.reps;
            let back = reps[idx];
            reps.copy_within(..idx, 1);
            reps[0] = back;
            let mut st = node.state;
            st.update_rep();

            for l in MATCH_LEN_MIN as u32..=len {
                let price =
                    base_price + rep_prefix + sel_price + ctx.rep_len_prices.price(l, pos_state);
                consider(
                    opts,
                    last,
                    cur + l as usize,
                    price,
                    cur,
                    Arrival::Rep(idx as u8),
                    l,
                    st,
                    reps,
                );
            }
        }

        // Fresh matches. Each length is priced with the first (nearest)
        // list entry that covers it.
        let match_prefix =
            bit_price1(model.is_match[state][pos_state]) + bit_price0(model.is_rep[state]);
        let mut offs = 0usize;
        for l in MATCH_LEN_MIN as u32.. {
            if l as usize > budget {
                break;
            }
            while offs < self.matches.len() && self.matches[offs].len < l {
                offs += 1;
            }
            if offs == self.matches.len() {
                break;
            }
            let back = self.matches[offs].dist - 1;
            let price = base_price
                + match_prefix
                + ctx.len_prices.price(l, pos_state)
                + ctx.dist_prices.price(back, len_to_dist_state(l));

            let mut st = node.state;
            st.update_match();
            let reps = [back, node.reps[0], node.reps[1], node.reps[2]];
            consider(
                opts,
                last,
                cur + l as usize,
                price,
                cur,
                Arrival::Match(back),
                l,
                st,
                reps,
            );
        }
    }
}

/// Fast-mode parse: one command per call, classic greedy heuristics.
pub(crate) fn fast_parse(
    ctx: &ParseContext<'_>,
    finder: &mut dyn MatchSource,
    data: &[u8],
    pos: usize,
    matches: &mut Vec<Match>,
) -> Command {
    let avail = data.len() - pos;
    finder.matches(data, matches);

    let rep_limit = avail.min(MATCH_LEN_MAX);
    let mut best_rep_idx = 0usize;
    let mut best_rep_len = 0u32;
    for (idx, &back) in ctx.reps.iter().enumerate() {
        let len = OptimalParser::rep_len(data, pos, back, rep_limit);
        if len > best_rep_len {
            best_rep_len = len;
            best_rep_idx = idx;
        }
    }

    let (mut main_len, main_dist) = match matches.last() {
        Some(m) => (m.len, m.dist),
        None => (0, 0),
    };

    // Short matches far away cost more than the literals they replace.
    if main_len == 2 && main_dist > 512 {
        main_len = 0;
    }
    if main_len == 3 && main_dist > (1 << 15) {
        main_len = 0;
    }

    // A rep nearly as long as the best match wins: it needs no distance.
    if best_rep_len >= MATCH_LEN_MIN as u32
        && (best_rep_len + 1 >= main_len
            || (best_rep_len + 2 >= main_len && main_dist >= (1 << 9)))
    {
        let cmd = Command::Rep {
            idx: best_rep_idx,
            len: best_rep_len,
        };
        finder.skip(data, best_rep_len as usize - 1);
        return cmd;
    }

    if main_len >= MATCH_LEN_MIN as u32 {
        let cmd = Command::Match {
            back: main_dist - 1,
            len: main_len,
        };
        finder.skip(data, main_len as usize - 1);
        return cmd;
    }

    // Short rep beats a literal when the byte repeats.
    if OptimalParser::rep_len(data, pos, ctx.reps[0], 1) == 1 && !ctx.state.is_literal() {
        return Command::ShortRep;
    }

    Command::Literal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_finder::{MatchFinder, MatchFinderKind, MatchFinderParams};
    use crate::model::LzmaProperties;
    use crate::price::{DistPriceTable, LenPriceTable};

    fn ctx_fixtures(model: &LzmaModel) -> (LenPriceTable, LenPriceTable, DistPriceTable) {
        let mut len_prices = LenPriceTable::new(model.props.num_pos_states());
        let mut rep_len_prices = LenPriceTable::new(model.props.num_pos_states());
        let mut dist_prices = DistPriceTable::new();
        len_prices.refresh(&model.match_len);
        rep_len_prices.refresh(&model.rep_len);
        dist_prices.refresh(&model.distance);
        (len_prices, rep_len_prices, dist_prices)
    }

    fn run_parse(data: &[u8]) -> Vec<Command> {
        let model = LzmaModel::new(LzmaProperties::default());
        let (len_prices, rep_len_prices, dist_prices) = ctx_fixtures(&model);
        let mut finder =
            MatchFinder::new(MatchFinderParams::new(1 << 16, MatchFinderKind::Bt4));
        let mut parser = OptimalParser::new();

        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let ctx = ParseContext {
                model: &model,
                len_prices: &len_prices,
                rep_len_prices: &rep_len_prices,
                dist_prices: &dist_prices,
                state: State::new(),
                reps: [0; 4],
                nice_len: 32,
            };
            let cmds = parser.parse(&ctx, &mut finder, data, pos);
            assert!(!cmds.is_empty());
            for c in cmds {
                pos += c.len() as usize;
            }
            out.extend_from_slice(cmds);
        }
        assert_eq!(pos, data.len());
        out
    }

    #[test]
    fn test_parse_covers_input_exactly() {
        let data = b"abcabcabcabc-abcabcabcabc-abcabcabcabc";
        let cmds = run_parse(data);
        let total: u32 = cmds.iter().map(Command::len).sum();
        assert_eq!(total as usize, data.len());
    }

    #[test]
    fn test_parse_uses_matches_on_repeats() {
        let data = vec![b'Q'; 400];
        let cmds = run_parse(&data);
        // A 400-byte run must not be parsed as 400 literals.
        let literals = cmds
            .iter()
            .filter(|c| matches!(c, Command::Literal))
            .count();
        assert!(literals < 8, "run parsed as {literals} literals: {cmds:?}");
        assert!(
            cmds.iter()
                .any(|c| matches!(c, Command::Match { .. } | Command::Rep { .. }))
        );
    }

    #[test]
    fn test_parse_unmatchable_is_literals() {
        // No byte repeats within the window, so neither matches nor reps
        // can apply and every command must be a literal.
        let data: Vec<u8> = (0..64u32).map(|i| (i * 37 % 251) as u8).collect();
        let cmds = run_parse(&data);
        assert!(cmds.iter().all(|c| matches!(c, Command::Literal)));
        assert_eq!(cmds.len(), 64);
    }

    #[test]
    fn test_fast_parse_prefers_rep() {
        let model = LzmaModel::new(LzmaProperties::default());
        let (len_prices, rep_len_prices, dist_prices) = ctx_fixtures(&model);
        // "abcdef" twice: at the second copy with rep0 back = 5 the rep
        // and the fresh match have equal length, so the rep must win.
        let data = b"abcdefabcdef";
        let mut finder =
            MatchFinder::new(MatchFinderParams::new(1 << 12, MatchFinderKind::Hc4));
        let mut matches = Vec::new();
        finder.skip(data, 6);

        let ctx = ParseContext {
            model: &model,
            len_prices: &len_prices,
            rep_len_prices: &rep_len_prices,
            dist_prices: &dist_prices,
            state: State::new(),
            reps: [5, 0, 0, 0],
            nice_len: 32,
        };
        let cmd = fast_parse(&ctx, &mut finder, data, 6, &mut matches);
        assert_eq!(cmd, Command::Rep { idx: 0, len: 6 });
    }

    #[test]
    fn test_command_len() {
        assert_eq!(Command::Literal.len(), 1);
        assert_eq!(Command::ShortRep.len(), 1);
        assert_eq!(Command::Rep { idx: 2, len: 9 }.len(), 9);
        assert_eq!(Command::Match { back: 4, len: 273 }.len(), 273);
    }
}
