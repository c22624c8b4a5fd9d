//! Block-parallel LZMA2 encoding (requires the `parallel` feature).
//!
//! The input is split into blocks of at least the dictionary size. Each
//! block is encoded as a self-contained LZMA2 substream whose first
//! chunk resets the dictionary, so the blocks are independent and the
//! workers share nothing. The compressed bodies are reassembled in block
//! order and closed with a single stream terminator, producing output
//! identical to encoding the same blocks sequentially — any conforming
//! LZMA2 decoder accepts it.

use crate::lzma2::{Lzma2Config, Lzma2Encoder, control};
use rayon::prelude::*;
use sevenlz_core::error::Result;
use sevenlz_core::traits::CancelToken;

/// Encode `data` as block-parallel LZMA2.
///
/// `block_size` is raised to the dictionary size if smaller; rayon picks
/// the worker count. Output order is the input block order regardless of
/// completion order.
pub fn compress_parallel(
    data: &[u8],
    config: &Lzma2Config,
    block_size: usize,
) -> Result<Vec<u8>> {
    compress_parallel_with(data, config, block_size, &CancelToken::new())
}

/// [`compress_parallel`] with a cancellation token shared by all
/// workers; each checks it at its chunk boundaries.
pub fn compress_parallel_with(
    data: &[u8],
    config: &Lzma2Config,
    block_size: usize,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(vec![control::EOS]);
    }

    let block_size = block_size.max(config.options.dict_size as usize).max(1);
    let blocks: Vec<&[u8]> = data.chunks(block_size).collect();

    let bodies: Vec<Result<Vec<u8>>> = blocks
        .par_iter()
        .map(|block| {
            let encoder = Lzma2Encoder::new(*config)?;
            let mut body = Vec::new();
            encoder.encode_body(block, cancel, None, &mut body)?;
            Ok(body)
        })
        .collect();

    let mut out = Vec::new();
    for body in bodies {
        out.extend_from_slice(&body?);
    }
    out.push(control::EOS);
    Ok(out)
}
