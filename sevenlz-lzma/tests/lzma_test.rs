//! End-to-end LZMA/LZMA2 integration tests.

use sevenlz_core::traits::DecodeStatus;
use sevenlz_lzma::{
    Level, Lzma2Config, LzmaDecoder, LzmaOptions, LzmaProperties, MatchFinderKind, ParseMode,
    compress, compress_raw, decode_lzma2, decompress_bytes, encode_lzma2,
};
use std::io::Cursor;

/// Deterministic xorshift stream, good enough to be incompressible.
fn random_bytes(len: usize, mut seed: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(len);
    for _ in 0..len {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        data.push((seed >> 32) as u8);
    }
    data
}

/// English-ish filler with enough variation to be honest about ratios.
fn text_corpus(len: usize) -> Vec<u8> {
    let sentences = [
        "The sliding window keeps the most recent history available for back-references. ",
        "Each position is hashed by its two, three and four byte prefixes. ",
        "The range coder splits its interval in proportion to adaptive probabilities. ",
        "Match lengths between two and two hundred seventy three are coded in three tiers. ",
        "Distances are bucketed into slots with direct and aligned low bits. ",
        "A repeated distance can be reused from a four entry most recently used list. ",
    ];
    let mut data = Vec::with_capacity(len);
    let mut i = 0usize;
    while data.len() < len {
        data.extend_from_slice(sentences[i % sentences.len()].as_bytes());
        if i % 7 == 0 {
            data.extend_from_slice(format!("(section {i}) ").as_bytes());
        }
        i += 1;
    }
    data.truncate(len);
    data
}

fn raw_options(level: Level) -> LzmaOptions {
    LzmaOptions::from_level(level).dict_size(1 << 16)
}

fn roundtrip_raw(data: &[u8], options: LzmaOptions) {
    let packed = compress_raw(data, options).unwrap();
    let out = sevenlz_lzma::decompress_raw(
        Cursor::new(&packed),
        options.props,
        options.dict_size,
        (!options.write_end_marker).then_some(data.len() as u64),
    )
    .unwrap();
    assert_eq!(out, data, "config {options:?}");
}

// S1: a single byte through the exact scenario configuration.
#[test]
fn test_single_byte_stream() {
    let options = LzmaOptions::default().dict_size(1 << 12).props(3, 0, 2);
    let packed = compress_raw(b"\x41", options).unwrap();

    let mut decoder =
        LzmaDecoder::new(Cursor::new(&packed), options.props, options.dict_size).unwrap();
    let (out, status) = decoder.decode(None).unwrap();
    assert_eq!(out, b"\x41");
    assert_eq!(status, DecodeStatus::ReachedEndMarker);
}

// S2: a 4096-byte run compresses to a handful of bytes.
#[test]
fn test_repeating_block_is_tiny() {
    let data = vec![0x41u8; 4096];
    let packed = compress_raw(&data, raw_options(Level::DEFAULT)).unwrap();
    assert!(packed.len() < 30, "run took {} bytes", packed.len());

    let out = sevenlz_lzma::decompress_raw(
        Cursor::new(&packed),
        LzmaProperties::default(),
        1 << 16,
        None,
    )
    .unwrap();
    assert_eq!(out, data);
}

// S3: incompressible data survives byte-exact and barely expands.
#[test]
fn test_random_megabyte() {
    let data = random_bytes(1 << 20, 0x0123_4567_89AB_CDEF);

    let config = Lzma2Config::new(LzmaOptions::from_level(Level::new(1)).dict_size(1 << 16));
    let packed = encode_lzma2(&data, &config).unwrap();
    assert!(packed.len() >= data.len());
    assert!(
        packed.len() <= data.len() + 256,
        "random data expanded to {}",
        packed.len()
    );

    let out = decode_lzma2(&packed, 1 << 16).unwrap();
    assert_eq!(out, data);
}

// S4: a text corpus at level 5 lands well under the sanity ratio.
#[test]
fn test_text_corpus_ratio() {
    let data = text_corpus(30_000);
    let packed = compress(&data, Level::new(5)).unwrap();
    let ratio = packed.len() as f64 / data.len() as f64;
    assert!(ratio < 0.45, "ratio {ratio:.3}");

    assert_eq!(decompress_bytes(&packed).unwrap(), data);
}

// S5: a multi-chunk LZMA2 stream with verifiable per-chunk accounting.
#[test]
fn test_lzma2_chunked_stream() {
    let data = text_corpus(3 << 20);
    let config = Lzma2Config::new(
        LzmaOptions::from_level(Level::new(2)).dict_size(1 << 18),
    )
    .chunk_size(1 << 18);
    let packed = encode_lzma2(&data, &config).unwrap();

    // Walk the chunk headers: sizes must tile the stream exactly, and
    // the first chunk must reset the dictionary.
    let mut pos = 0usize;
    let mut chunks = 0usize;
    let mut declared_unpacked = 0usize;
    loop {
        let ctrl = packed[pos];
        pos += 1;
        if ctrl == 0x00 {
            break;
        }
        if ctrl >= 0x80 {
            let unpack =
                (((ctrl & 0x1F) as usize) << 16 | u16::from_be_bytes([packed[pos], packed[pos + 1]]) as usize)
                    + 1;
            let pack = u16::from_be_bytes([packed[pos + 2], packed[pos + 3]]) as usize + 1;
            let reset = (ctrl >> 5) & 3;
            pos += 4;
            if reset >= 2 {
                pos += 1; // props byte
            }
            if chunks == 0 {
                assert_eq!(reset, 3, "first chunk must reset the dictionary");
            }
            pos += pack;
            declared_unpacked += unpack;
        } else {
            assert!(ctrl == 0x01 || ctrl == 0x02);
            let size = u16::from_be_bytes([packed[pos], packed[pos + 1]]) as usize + 1;
            pos += 2 + size;
            declared_unpacked += size;
        }
        chunks += 1;
    }
    assert_eq!(pos, packed.len());
    assert_eq!(declared_unpacked, data.len());
    assert!(chunks > 1, "expected multiple chunks");

    let out = decode_lzma2(&packed, config.options.dict_size);
    assert_eq!(out.unwrap(), data);
}

// S6: a flipped bit must surface as an error, not a crash or overrun.
#[test]
fn test_single_bit_corruption_detected() {
    let data = text_corpus(64 * 1024);
    let config = Lzma2Config::new(LzmaOptions::from_level(Level::new(3)).dict_size(1 << 16));
    let mut packed = encode_lzma2(&data, &config).unwrap();

    let mid = packed.len() / 2;
    packed[mid] ^= 0x10;

    match decode_lzma2(&packed, 1 << 16) {
        Err(_) => {}
        // A flip that survives the size accounting must at least not
        // masquerade as the original data.
        Ok(out) => assert_ne!(out, data),
    }
}

// Property 5: the pipelined match finder changes nothing in the output.
#[test]
fn test_mt_encoder_equivalence() {
    let data = text_corpus(384 * 1024);

    for mode in [ParseMode::Fast, ParseMode::Normal] {
        let base = LzmaOptions::from_level(Level::new(4))
            .dict_size(1 << 16)
            .mode(mode);

        let st = compress_raw(&data, base.mt_threads(1)).unwrap();
        let mt = compress_raw(&data, base.mt_threads(2)).unwrap();
        assert_eq!(st, mt, "{mode:?}: single- and multi-threaded outputs differ");

        let out = sevenlz_lzma::decompress_raw(
            Cursor::new(&st),
            base.props,
            base.dict_size,
            None,
        )
        .unwrap();
        assert_eq!(out, data);
    }
}

// Round-trip across the configuration matrix.
#[test]
fn test_roundtrip_config_matrix() {
    let samples: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"a".to_vec(),
        b"abcabcabcabcabc".to_vec(),
        text_corpus(10_000),
        random_bytes(5_000, 42),
        vec![0u8; 2048],
    ];

    let props = [(3u32, 0u32, 2u32), (0, 2, 0), (1, 1, 1), (4, 0, 4), (2, 2, 3)];
    let finders = [MatchFinderKind::Hc4, MatchFinderKind::Bt4];
    let modes = [ParseMode::Fast, ParseMode::Normal];

    for data in &samples {
        for &(lc, lp, pb) in &props {
            for &finder in &finders {
                for &mode in &modes {
                    let options = LzmaOptions::default()
                        .dict_size(1 << 14)
                        .props(lc, lp, pb)
                        .match_finder(finder)
                        .mode(mode);
                    roundtrip_raw(data, options);
                }
            }
        }
    }
}

// A dictionary smaller than the input forces wrap-around and bounded
// distances on both sides.
#[test]
fn test_window_smaller_than_input() {
    let data = text_corpus(300_000);
    let options = LzmaOptions::from_level(Level::new(4)).dict_size(1 << 14);
    let packed = compress_raw(&data, options).unwrap();
    let out =
        sevenlz_lzma::decompress_raw(Cursor::new(&packed), options.props, 1 << 14, None).unwrap();
    assert_eq!(out, data);
}

// Rep distances get exercised by alternating between a few patterns.
#[test]
fn test_rep_distance_rotation() {
    let a = b"first-pattern-first-pattern!";
    let b = b"second/pattern/second";
    let c = b"THIRD PATTERN THIRD";
    let mut data = Vec::new();
    for i in 0..300 {
        match i % 3 {
            0 => data.extend_from_slice(a),
            1 => data.extend_from_slice(b),
            _ => data.extend_from_slice(c),
        }
        data.push(b'0' + (i % 10) as u8);
    }

    for mode in [ParseMode::Fast, ParseMode::Normal] {
        let options = raw_options(Level::DEFAULT).mode(mode);
        roundtrip_raw(&data, options);
    }
}

// The `.lzma` container stores the size and omits the end marker; the
// decoder must stop exactly at the declared size.
#[test]
fn test_container_size_delimited() {
    let data = text_corpus(5_000);
    let packed = compress(&data, Level::new(4)).unwrap();

    let mut decoder = LzmaDecoder::from_header(Cursor::new(&packed)).unwrap();
    let (first, status) = decoder.decode(Some(1000)).unwrap();
    assert_eq!(first.len(), 1000);
    assert_eq!(status, DecodeStatus::ReachedOutputLimit);

    let (rest, status) = decoder.decode(None).unwrap();
    assert_eq!(status, DecodeStatus::ReachedEndMarker);
    assert_eq!([first, rest].concat(), data);
}
