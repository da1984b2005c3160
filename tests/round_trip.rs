//! Raw DEFLATE streams through the public API.

use ripflate::{deflate, deflate_with, inflate, Compression, ErrorKind};

fn text(len: usize) -> Vec<u8> {
    let words = ["stream", "block", "window", "symbol", "length", "distance", "code"];
    let mut out = Vec::with_capacity(len + 16);
    let mut i = 0usize;
    while out.len() < len {
        out.extend_from_slice(words[(i * 7 + i / 5) % words.len()].as_bytes());
        out.push(if i % 11 == 10 { b'\n' } else { b' ' });
        i += 1;
    }
    out.truncate(len);
    out
}

fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

fn stored_block(data: &[u8], is_final: bool) -> Vec<u8> {
    let len = data.len() as u16;
    let mut block = vec![is_final as u8];
    block.extend_from_slice(&len.to_le_bytes());
    block.extend_from_slice(&(!len).to_le_bytes());
    block.extend_from_slice(data);
    block
}

#[test]
fn empty_input() {
    for level in 0..=9 {
        let compressed = deflate_with(b"", Compression::new(level)).unwrap();
        assert!(inflate(&compressed, 0).unwrap().is_empty());
    }
}

#[test]
fn single_byte() {
    let compressed = deflate(b"A").unwrap();
    assert_eq!(inflate(&compressed, 1).unwrap(), b"A");
}

#[test]
fn all_same_byte() {
    let input = vec![255u8; 5000];
    let compressed = deflate(&input).unwrap();
    assert_eq!(inflate(&compressed, input.len()).unwrap(), input);
    assert!(compressed.len() < input.len() / 20);
}

#[test]
fn max_match_length() {
    let input = vec![42u8; 258 * 10];
    let compressed = deflate_with(&input, Compression::best()).unwrap();
    assert_eq!(inflate(&compressed, input.len()).unwrap(), input);
}

#[test]
fn text_at_every_level() {
    let input = text(150_000);
    let mut sizes = Vec::new();
    for level in 0..=9 {
        let compressed = deflate_with(&input, Compression::new(level)).unwrap();
        assert_eq!(inflate(&compressed, input.len()).unwrap(), input, "level {}", level);
        sizes.push(compressed.len());
    }
    assert!(sizes[0] > input.len());
    assert!(sizes[9] <= sizes[1]);
}

#[test]
fn noise_does_not_grow_much() {
    let input = noise(200_000);
    let compressed = deflate(&input).unwrap();
    assert_eq!(inflate(&compressed, input.len()).unwrap(), input);
    // Stored blocks cost five bytes per 65535.
    assert!(compressed.len() <= input.len() + 5 * 4 + 8);
}

#[test]
fn mixed_content() {
    let mut input = text(40_000);
    input.extend(noise(40_000));
    input.extend(vec![0u8; 40_000]);
    input.extend(text(40_000));
    let compressed = deflate(&input).unwrap();
    assert_eq!(inflate(&compressed, input.len()).unwrap(), input);
}

#[test]
fn stored_blocks_at_any_boundary() {
    let input = text(3000);
    for split in [0, 1, 7, 1500, 2999, 3000] {
        let mut stream = stored_block(&input[..split], false);
        stream.extend(stored_block(&input[split..], true));
        assert_eq!(inflate(&stream, input.len()).unwrap(), input, "split {}", split);
    }
}

#[test]
fn stored_length_check() {
    let mut stream = stored_block(b"abc", true);
    stream[3] ^= 0x01;
    assert_eq!(inflate(&stream, 3).unwrap_err().kind(), ErrorKind::LengthMismatch);
}

#[test]
fn truncated_streams() {
    let input = text(20_000);
    for level in [0, 1, 6] {
        let compressed = deflate_with(&input, Compression::new(level)).unwrap();
        for cut in [0, 1, 2, compressed.len() / 2, compressed.len() - 1] {
            let err = inflate(&compressed[..cut], input.len()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TruncatedInput, "level {} cut {}", level, cut);
        }
    }
}

#[test]
fn reserved_block_type() {
    assert_eq!(
        inflate(&[0x07], 0).unwrap_err().kind(),
        ErrorKind::UnsupportedFeature
    );
}
