#![forbid(unsafe_code)]

use log::*;

use crate::bit_stream::{BitOrder, BitSequence, BitStream};
use crate::error::Result;

////////////////////////////////////////////////////////////////////////////////

pub const WINDOW_SIZE: usize = 32768;
pub const MIN_MATCH: usize = 3;
pub const MAX_MATCH: usize = 258;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
    131, 163, 195, 227, 258,
];

const LENGTH_EXTRA_BITS: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

const DISTANCE_EXTRA_BITS: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

const FIRST_LENGTH_SYMBOL: u16 = 257;

////////////////////////////////////////////////////////////////////////////////

/// A length or distance symbol: a base value plus a number of extra bits
/// that follow the symbol in the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeCode {
    pub base: u16,
    pub extra_bits: u8,
}

impl RangeCode {
    pub fn read_value(&self, stream: &mut BitStream) -> Result<usize> {
        let extra = if self.extra_bits != 0 {
            stream.read_bits(self.extra_bits, BitOrder::LsbFirst)?.bits()
        } else {
            0
        };
        Ok((self.base + extra).into())
    }

    pub fn extra(&self, value: u16) -> BitSequence {
        BitSequence::new(value - self.base, self.extra_bits)
    }
}

/// Length symbols are 257..=285.
pub fn length_code(symbol: u16) -> Option<RangeCode> {
    let idx = symbol.checked_sub(FIRST_LENGTH_SYMBOL)? as usize;
    Some(RangeCode {
        base: *LENGTH_BASE.get(idx)?,
        extra_bits: LENGTH_EXTRA_BITS[idx],
    })
}

/// Distance symbols are 0..=29.
pub fn distance_code(symbol: u16) -> Option<RangeCode> {
    let idx = symbol as usize;
    Some(RangeCode {
        base: *DISTANCE_BASE.get(idx)?,
        extra_bits: DISTANCE_EXTRA_BITS[idx],
    })
}

pub fn length_symbol(length: u16) -> (u16, RangeCode) {
    debug_assert!((MIN_MATCH..=MAX_MATCH).contains(&(length as usize)));
    let idx = LENGTH_BASE.partition_point(|&base| base <= length) - 1;
    (
        FIRST_LENGTH_SYMBOL + idx as u16,
        RangeCode {
            base: LENGTH_BASE[idx],
            extra_bits: LENGTH_EXTRA_BITS[idx],
        },
    )
}

pub fn distance_symbol(distance: u16) -> (u16, RangeCode) {
    debug_assert!((1..=WINDOW_SIZE).contains(&(distance as usize)));
    let idx = DISTANCE_BASE.partition_point(|&base| base <= distance) - 1;
    (
        idx as u16,
        RangeCode {
            base: DISTANCE_BASE[idx],
            extra_bits: DISTANCE_EXTRA_BITS[idx],
        },
    )
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    Literal(u8),
    Match { length: u16, distance: u16 },
}

const HASH_BITS: usize = 15;
const HASH_SIZE: usize = 1 << HASH_BITS;
const NO_POS: usize = usize::MAX;

/// Hash-chain longest match search.
#[derive(Clone, Debug)]
pub struct Matcher {
    max_chain: usize,
    lazy: bool,
}

impl Matcher {
    pub fn new(max_chain: usize, lazy: bool) -> Self {
        Self { max_chain, lazy }
    }

    /// Tokenize `data[start..]`, allowing matches to reach back into the
    /// preceding `data[..start]`.
    pub fn tokens(&self, data: &[u8], start: usize) -> Vec<Token> {
        let mut chains = Chains::new(data, start.saturating_sub(WINDOW_SIZE));
        let mut tokens = Vec::with_capacity(data.len() - start);

        let mut pos = start;
        while pos < data.len() {
            chains.insert_up_to(pos);
            let found = self.find(&chains, pos);

            if let Some((length, distance)) = found {
                if self.lazy && pos + 1 < data.len() {
                    chains.insert_up_to(pos + 1);
                    if let Some((next_length, _)) = self.find(&chains, pos + 1) {
                        if next_length > length {
                            tokens.push(Token::Literal(data[pos]));
                            pos += 1;
                            continue;
                        }
                    }
                }
                tokens.push(Token::Match {
                    length: length as u16,
                    distance: distance as u16,
                });
                pos += length;
            } else {
                tokens.push(Token::Literal(data[pos]));
                pos += 1;
            }
        }

        trace!(
            "tokenized {} bytes into {} tokens",
            data.len() - start,
            tokens.len()
        );
        tokens
    }

    fn find(&self, chains: &Chains, pos: usize) -> Option<(usize, usize)> {
        let data = chains.data;
        let max_len = MAX_MATCH.min(data.len() - pos);
        if max_len < MIN_MATCH || self.max_chain == 0 {
            return None;
        }

        let mut best = (MIN_MATCH - 1, 0);
        let mut candidate = chains.head[hash(data, pos)];
        let mut steps = 0;
        while candidate != NO_POS && steps < self.max_chain {
            let distance = pos - candidate;
            if distance > WINDOW_SIZE {
                break;
            }
            if data[candidate + best.0] == data[pos + best.0] {
                let len = data[candidate..]
                    .iter()
                    .zip(&data[pos..pos + max_len])
                    .take_while(|(a, b)| a == b)
                    .count();
                if len > best.0 {
                    best = (len, distance);
                    if len == max_len {
                        break;
                    }
                }
            }
            candidate = chains.prev[candidate];
            steps += 1;
        }

        (best.0 >= MIN_MATCH).then(|| best)
    }
}

struct Chains<'a> {
    data: &'a [u8],
    head: Vec<usize>,
    prev: Vec<usize>,
    inserted: usize,
}

impl<'a> Chains<'a> {
    fn new(data: &'a [u8], from: usize) -> Self {
        Self {
            data,
            head: vec![NO_POS; HASH_SIZE],
            prev: vec![NO_POS; data.len()],
            inserted: from,
        }
    }

    /// Make every position before `pos` reachable through the chains.
    fn insert_up_to(&mut self, pos: usize) {
        while self.inserted < pos {
            let p = self.inserted;
            if p + MIN_MATCH <= self.data.len() {
                let h = hash(self.data, p);
                self.prev[p] = self.head[h];
                self.head[h] = p;
            }
            self.inserted += 1;
        }
    }
}

fn hash(data: &[u8], pos: usize) -> usize {
    let h = ((data[pos] as usize) << 10) ^ ((data[pos + 1] as usize) << 5) ^ data[pos + 2] as usize;
    h & (HASH_SIZE - 1)
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_codes() {
        assert_eq!(length_code(257), Some(RangeCode { base: 3, extra_bits: 0 }));
        assert_eq!(length_code(265), Some(RangeCode { base: 11, extra_bits: 1 }));
        assert_eq!(length_code(284), Some(RangeCode { base: 227, extra_bits: 5 }));
        assert_eq!(length_code(285), Some(RangeCode { base: 258, extra_bits: 0 }));
        assert_eq!(length_code(286), None);
        assert_eq!(length_code(256), None);
    }

    #[test]
    fn distance_codes() {
        assert_eq!(distance_code(0), Some(RangeCode { base: 1, extra_bits: 0 }));
        assert_eq!(distance_code(4), Some(RangeCode { base: 5, extra_bits: 1 }));
        assert_eq!(distance_code(29), Some(RangeCode { base: 24577, extra_bits: 13 }));
        assert_eq!(distance_code(30), None);
    }

    #[test]
    fn symbols_cover_every_value() {
        for length in MIN_MATCH as u16..=MAX_MATCH as u16 {
            let (symbol, code) = length_symbol(length);
            assert_eq!(length_code(symbol), Some(code));
            assert!(code.base <= length);
            assert!(length - code.base < 1 << code.extra_bits || length == code.base);
        }
        assert_eq!(length_symbol(257).0, 284);
        assert_eq!(length_symbol(258).0, 285);

        for distance in 1..=WINDOW_SIZE as u16 {
            let (symbol, code) = distance_symbol(distance);
            assert_eq!(distance_code(symbol), Some(code));
            assert!(distance - code.base < 1 << code.extra_bits || distance == code.base);
        }
        assert_eq!(distance_symbol(32768).0, 29);
    }

    #[test]
    fn read_value() -> Result<()> {
        let mut stream = BitStream::from_bytes(vec![0b0000_0110]);
        let code = length_code(269).unwrap();
        assert_eq!(code.read_value(&mut stream)?, 19 + 2);
        assert_eq!(stream.len(), 6);
        Ok(())
    }

    fn expand(tokens: &[Token]) -> Vec<u8> {
        let mut out: Vec<u8> = vec![];
        for token in tokens {
            match *token {
                Token::Literal(byte) => out.push(byte),
                Token::Match { length, distance } => {
                    for _ in 0..length {
                        out.push(out[out.len() - distance as usize]);
                    }
                }
            }
        }
        out
    }

    #[test]
    fn finds_repeats() {
        let data = b"abcabcabcabcabcX";
        let tokens = Matcher::new(16, false).tokens(data, 0);
        assert_eq!(
            tokens,
            vec![
                Token::Literal(b'a'),
                Token::Literal(b'b'),
                Token::Literal(b'c'),
                Token::Match {
                    length: 12,
                    distance: 3
                },
                Token::Literal(b'X'),
            ]
        );
    }

    #[test]
    fn tokens_reproduce_input() {
        let mut data = Vec::new();
        for i in 0..5000u32 {
            data.push((i * i % 251) as u8);
            if i % 7 == 0 {
                data.extend_from_slice(b"the quick brown fox");
            }
        }
        for &lazy in &[false, true] {
            let tokens = Matcher::new(64, lazy).tokens(&data, 0);
            assert_eq!(expand(&tokens), data);
            assert!(tokens.len() < data.len() / 2);
        }
    }

    #[test]
    fn matches_reach_into_history() {
        let data = b"hello world, hello world";
        let tokens = Matcher::new(8, true).tokens(data, 13);
        assert_eq!(
            tokens,
            vec![Token::Match {
                length: 11,
                distance: 13
            }]
        );
    }
}
