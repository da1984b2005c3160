#![forbid(unsafe_code)]

use std::{cmp::Reverse, collections::BinaryHeap, convert::TryFrom, marker::PhantomData};

use log::*;

use crate::bit_stream::{BitOrder, BitSequence, BitStream};
use crate::error::{Error, Result};
use crate::lz77::{self, RangeCode};

////////////////////////////////////////////////////////////////////////////////

pub const MAX_BITS: usize = 15;
pub const MAX_CODE_LENGTH_BITS: u8 = 7;

pub const END_OF_BLOCK: u16 = 256;
pub const LITLEN_SYMBOLS: usize = 286;
pub const DISTANCE_SYMBOLS: usize = 30;

const TREE_CODE_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

pub fn decode_litlen_distance_trees(
    stream: &mut BitStream,
) -> Result<(HuffmanCoding<LitLenToken>, HuffmanCoding<DistanceToken>)> {
    info!("dynamic tree");

    let hlit = stream.read_bits(5, BitOrder::LsbFirst)?.bits() as usize + 257;
    let hdist = stream.read_bits(5, BitOrder::LsbFirst)?.bits() as usize + 1;
    let hclen = stream.read_bits(4, BitOrder::LsbFirst)?.bits() as usize + 4;
    debug!("HLIT:\t{:?}", hlit);
    debug!("HDIST:\t{:?}", hdist);
    debug!("HCLEN:\t{:?}", hclen);

    if hlit > LITLEN_SYMBOLS || hdist > DISTANCE_SYMBOLS {
        return Err(Error::invalid_code(format!(
            "too many length or distance symbols: HLIT={}, HDIST={}",
            hlit, hdist
        )));
    }

    let mut tree_len = [0u8; 19];
    for &symbol in TREE_CODE_ORDER.iter().take(hclen) {
        tree_len[symbol] = stream.read_bits(3, BitOrder::LsbFirst)?.bits() as u8;
    }
    let tree_code_huffman = HuffmanCoding::<TreeCodeToken>::from_lengths(&tree_len)?;

    let total = hlit + hdist;
    let mut code_lengths = Vec::<u8>::with_capacity(total);
    while code_lengths.len() < total {
        let code = tree_code_huffman.read_symbol(stream)?;
        trace!("decode: {:?}", code);
        match code {
            TreeCodeToken::Length(len) => code_lengths.push(len),
            TreeCodeToken::CopyPrev => {
                let num_repetitions = stream.read_bits(2, BitOrder::LsbFirst)?.bits() + 3;
                let prev_len = *code_lengths
                    .last()
                    .ok_or_else(|| Error::invalid_code("repeat code with nothing to repeat"))?;
                code_lengths.extend(std::iter::repeat(prev_len).take(num_repetitions.into()));
            }
            TreeCodeToken::RepeatZero { base, extra_bits } => {
                let extra = stream.read_bits(extra_bits, BitOrder::LsbFirst)?;
                code_lengths.extend(std::iter::repeat(0).take((base + extra.bits()).into()));
            }
        }
    }
    if code_lengths.len() != total {
        return Err(Error::invalid_code(format!(
            "code length repeat overruns {} lengths",
            total
        )));
    }

    let (lit_lengths, dist_lengths) = code_lengths.split_at(hlit);
    if lit_lengths[END_OF_BLOCK as usize] == 0 {
        return Err(Error::invalid_code("missing end-of-block code"));
    }

    Ok((
        HuffmanCoding::<LitLenToken>::from_lengths(lit_lengths)?,
        HuffmanCoding::<DistanceToken>::from_lengths(dist_lengths)?,
    ))
}

pub fn fixed_litlen_lengths() -> [u8; 288] {
    let mut lengths = [0u8; 288];
    for (symbol, len) in lengths.iter_mut().enumerate() {
        *len = match symbol {
            0..=143 => 8,
            144..=255 => 9,
            256..=279 => 7,
            _ => 8,
        };
    }
    lengths
}

/// All 32 distance codes take part in the fixed code, though 30 and 31 never
/// appear in valid data.
pub fn fixed_distance_lengths() -> [u8; 32] {
    [5; 32]
}

pub fn get_fixed_coding() -> Result<(HuffmanCoding<LitLenToken>, HuffmanCoding<DistanceToken>)> {
    info!("fixed tree");
    Ok((
        HuffmanCoding::from_lengths(&fixed_litlen_lengths())?,
        HuffmanCoding::from_lengths(&fixed_distance_lengths())?,
    ))
}

////////////////////////////////////////////////////////////////////////////////

/// Code-length alphabet symbols as they appear in a dynamic block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeCodeToken {
    Length(u8),
    CopyPrev,
    RepeatZero { base: u16, extra_bits: u8 },
}

impl TryFrom<HuffmanCodeWord> for TreeCodeToken {
    type Error = Error;

    fn try_from(value: HuffmanCodeWord) -> Result<Self> {
        match value.0 {
            0..=15 => Ok(Self::Length(value.0 as u8)),
            16 => Ok(Self::CopyPrev),
            17 => Ok(Self::RepeatZero {
                base: 3,
                extra_bits: 3,
            }),
            18 => Ok(Self::RepeatZero {
                base: 11,
                extra_bits: 7,
            }),
            _ => Err(Error::invalid_code(format!("CL bad code: {}", value.0))),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LitLenToken {
    Literal(u8),
    EndOfBlock,
    Length(RangeCode),
}

impl TryFrom<HuffmanCodeWord> for LitLenToken {
    type Error = Error;

    fn try_from(value: HuffmanCodeWord) -> Result<Self> {
        match value.0 {
            0..=255 => Ok(Self::Literal(value.0 as u8)),
            END_OF_BLOCK => Ok(Self::EndOfBlock),
            symbol => lz77::length_code(symbol)
                .map(Self::Length)
                .ok_or_else(|| Error::invalid_code(format!("LL bad code: {}", symbol))),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DistanceToken(pub RangeCode);

impl TryFrom<HuffmanCodeWord> for DistanceToken {
    type Error = Error;

    fn try_from(value: HuffmanCodeWord) -> Result<Self> {
        lz77::distance_code(value.0)
            .map(Self)
            .ok_or_else(|| Error::invalid_code(format!("D bad code: {}", value.0)))
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HuffmanCodeWord(pub u16);

/// A canonical Huffman code over symbols `0..n`, usable in both directions.
///
/// Decoding walks the code one bit at a time: codes of each length form a
/// contiguous range starting at `first_code[len]`, and the symbols of that
/// range sit at `offsets[len]..` in `symbols`, ordered by symbol value.
pub struct HuffmanCoding<T> {
    codes: Vec<BitSequence>,
    counts: [u16; MAX_BITS + 1],
    first_code: [u16; MAX_BITS + 1],
    offsets: [u16; MAX_BITS + 1],
    symbols: Vec<u16>,
    token: PhantomData<T>,
}

impl<T> HuffmanCoding<T>
where
    T: TryFrom<HuffmanCodeWord, Error = Error>,
{
    pub fn from_lengths(code_lengths: &[u8]) -> Result<Self> {
        trace!("creating huffman coding from lengths {:?}", code_lengths);

        let mut bl_count = [0u16; MAX_BITS + 1];
        for &len in code_lengths {
            if len as usize > MAX_BITS {
                return Err(Error::invalid_code(format!(
                    "code length {} exceeds {}",
                    len, MAX_BITS
                )));
            }
            bl_count[len as usize] += 1;
        }
        bl_count[0] = 0;

        let mut left: i32 = 1;
        for &count in &bl_count[1..] {
            left = (left << 1) - count as i32;
            if left < 0 {
                return Err(Error::invalid_code("over-subscribed code lengths"));
            }
        }

        let mut next_code = [0u16; MAX_BITS + 1];
        let mut offsets = [0u16; MAX_BITS + 1];
        let mut code: u16 = 0;
        for bits in 1..=MAX_BITS {
            code = (code + bl_count[bits - 1]) << 1;
            next_code[bits] = code;
            offsets[bits] = offsets[bits - 1] + bl_count[bits - 1];
        }
        let first_code = next_code;

        let mut codes = vec![BitSequence::empty(); code_lengths.len()];
        let mut symbols = vec![0u16; bl_count.iter().map(|&c| c as usize).sum()];
        let mut filled = offsets;
        for (idx, &len) in code_lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let len = len as usize;
            codes[idx] = BitSequence::new(next_code[len], len as u8);
            next_code[len] += 1;
            symbols[filled[len] as usize] = idx as u16;
            filled[len] += 1;
        }

        Ok(Self {
            codes,
            counts: bl_count,
            first_code,
            offsets,
            symbols,
            token: PhantomData,
        })
    }

    /// Look up a complete code.
    pub fn decode_symbol(&self, seq: BitSequence) -> Option<HuffmanCodeWord> {
        let len = seq.len() as usize;
        if len == 0 || len > MAX_BITS {
            return None;
        }
        let index = seq.bits().checked_sub(self.first_code[len])?;
        if index >= self.counts[len] {
            return None;
        }
        Some(HuffmanCodeWord(
            self.symbols[(self.offsets[len] + index) as usize],
        ))
    }

    pub fn read_symbol(&self, stream: &mut BitStream) -> Result<T> {
        if self.symbols.is_empty() {
            return Err(Error::invalid_code("read from an empty code"));
        }
        let mut bits = BitSequence::empty();
        while (bits.len() as usize) < MAX_BITS {
            bits = bits.concat(stream.read_bits(1, BitOrder::MsbFirst)?);
            if let Some(word) = self.decode_symbol(bits) {
                return word.try_into();
            }
        }
        Err(Error::invalid_code(format!(
            "no symbol for code {:#017b}",
            bits.bits()
        )))
    }

    pub fn code(&self, symbol: u16) -> Option<BitSequence> {
        self.codes
            .get(symbol as usize)
            .copied()
            .filter(|code| !code.is_empty())
    }

    pub fn write_symbol(&self, stream: &mut BitStream, symbol: u16) -> Result<()> {
        let code = self
            .code(symbol)
            .ok_or_else(|| Error::invalid_code(format!("symbol {} has no code", symbol)))?;
        stream.write_bits(code, BitOrder::MsbFirst)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Build code lengths no longer than `max_bits` from symbol frequencies.
///
/// Unused symbols get length 0. When fewer than two symbols are used, a
/// second one is given a code as well so that the result is a complete code.
pub fn lengths_from_frequencies(freqs: &[u32], max_bits: u8) -> Vec<u8> {
    let mut lengths = vec![0u8; freqs.len()];
    let mut used: Vec<usize> = (0..freqs.len()).filter(|&s| freqs[s] > 0).collect();

    match used.len() {
        0 => return lengths,
        1 if freqs.len() > 1 => {
            let other = if used[0] == 0 { 1 } else { 0 };
            lengths[used[0]] = 1;
            lengths[other] = 1;
            return lengths;
        }
        1 => {
            lengths[used[0]] = 1;
            return lengths;
        }
        _ => {}
    }

    // Leaves occupy the first used.len() nodes; every merge appends a parent.
    let mut parent: Vec<usize> = Vec::with_capacity(2 * used.len());
    let mut heap = BinaryHeap::new();
    for (node, &symbol) in used.iter().enumerate() {
        parent.push(usize::MAX);
        heap.push(Reverse((freqs[symbol] as u64, node)));
    }
    while heap.len() > 1 {
        let (Reverse((w1, n1)), Reverse((w2, n2))) = match (heap.pop(), heap.pop()) {
            (Some(a), Some(b)) => (a, b),
            _ => break,
        };
        let node = parent.len();
        parent.push(usize::MAX);
        parent[n1] = node;
        parent[n2] = node;
        heap.push(Reverse((w1 + w2, node)));
    }

    let mut depth = vec![0usize; parent.len()];
    for node in (0..parent.len() - 1).rev() {
        depth[node] = depth[parent[node]] + 1;
    }

    let max_bits = max_bits as usize;
    let mut bl_count = vec![0u32; max_bits + 1];
    for &d in &depth[..used.len()] {
        bl_count[d.min(max_bits)] += 1;
    }

    // Clamping depths can leave the code over-subscribed. Each pass frees one
    // slot at max_bits by splitting the deepest shorter leaf.
    let mut kraft: u64 = (1..=max_bits)
        .map(|len| (bl_count[len] as u64) << (max_bits - len))
        .sum();
    while kraft > 1 << max_bits {
        bl_count[max_bits] -= 1;
        for len in (1..max_bits).rev() {
            if bl_count[len] != 0 {
                bl_count[len] -= 1;
                bl_count[len + 1] += 2;
                break;
            }
        }
        kraft -= 1;
    }

    used.sort_by_key(|&symbol| (Reverse(freqs[symbol]), symbol));
    let mut symbols = used.into_iter();
    for (len, &count) in bl_count.iter().enumerate().skip(1) {
        for symbol in symbols.by_ref().take(count as usize) {
            lengths[symbol] = len as u8;
        }
    }

    lengths
}

////////////////////////////////////////////////////////////////////////////////

/// The code-length section of a dynamic block header, ready to be written.
pub struct TreeHeader {
    hlit: usize,
    hdist: usize,
    hclen: usize,
    tree_len: [u8; 19],
    items: Vec<(u16, BitSequence)>,
}

impl TreeHeader {
    pub fn new(litlen_lengths: &[u8], dist_lengths: &[u8]) -> Self {
        let hlit = trimmed_len(litlen_lengths, 257);
        let hdist = trimmed_len(dist_lengths, 1);

        let mut all = Vec::with_capacity(hlit + hdist);
        all.extend_from_slice(&litlen_lengths[..hlit]);
        all.extend_from_slice(&dist_lengths[..hdist]);
        let items = run_length_encode(&all);

        let mut freqs = [0u32; 19];
        for (symbol, _) in &items {
            freqs[*symbol as usize] += 1;
        }
        let lengths = lengths_from_frequencies(&freqs, MAX_CODE_LENGTH_BITS);
        let mut tree_len = [0u8; 19];
        tree_len.copy_from_slice(&lengths);

        let hclen = TREE_CODE_ORDER
            .iter()
            .rposition(|&symbol| tree_len[symbol] != 0)
            .map_or(4, |last| (last + 1).max(4));

        debug!("HLIT:\t{}, HDIST:\t{}, HCLEN:\t{}", hlit, hdist, hclen);
        Self {
            hlit,
            hdist,
            hclen,
            tree_len,
            items,
        }
    }

    /// Size of the header in bits, excluding the 3-bit block header.
    pub fn cost(&self) -> usize {
        let items: usize = self
            .items
            .iter()
            .map(|(symbol, extra)| self.tree_len[*symbol as usize] as usize + extra.len() as usize)
            .sum();
        5 + 5 + 4 + 3 * self.hclen + items
    }

    pub fn write(&self, stream: &mut BitStream) -> Result<()> {
        let lsb = BitOrder::LsbFirst;
        stream.write_bits(BitSequence::new((self.hlit - 257) as u16, 5), lsb)?;
        stream.write_bits(BitSequence::new((self.hdist - 1) as u16, 5), lsb)?;
        stream.write_bits(BitSequence::new((self.hclen - 4) as u16, 4), lsb)?;
        for &symbol in TREE_CODE_ORDER.iter().take(self.hclen) {
            stream.write_bits(BitSequence::new(self.tree_len[symbol].into(), 3), lsb)?;
        }

        let coding = HuffmanCoding::<TreeCodeToken>::from_lengths(&self.tree_len)?;
        for &(symbol, extra) in &self.items {
            coding.write_symbol(stream, symbol)?;
            stream.write_bits(extra, lsb)?;
        }
        Ok(())
    }
}

fn trimmed_len(lengths: &[u8], min: usize) -> usize {
    lengths
        .iter()
        .rposition(|&len| len != 0)
        .map_or(min, |last| (last + 1).max(min))
}

/// Encode a code-length sequence with the repeat symbols 16, 17 and 18.
fn run_length_encode(lengths: &[u8]) -> Vec<(u16, BitSequence)> {
    let mut items = Vec::new();
    let mut i = 0;
    while i < lengths.len() {
        let len = lengths[i];
        let run = lengths[i..].iter().take_while(|&&l| l == len).count();

        if len == 0 {
            let mut rest = run;
            while rest >= 11 {
                let n = rest.min(138);
                items.push((18, BitSequence::new((n - 11) as u16, 7)));
                rest -= n;
            }
            if rest >= 3 {
                items.push((17, BitSequence::new((rest - 3) as u16, 3)));
                rest = 0;
            }
            items.extend(std::iter::repeat((0, BitSequence::empty())).take(rest));
        } else {
            items.push((len.into(), BitSequence::empty()));
            let mut rest = run - 1;
            while rest >= 3 {
                let n = rest.min(6);
                items.push((16, BitSequence::new((n - 3) as u16, 2)));
                rest -= n;
            }
            items.extend(std::iter::repeat((len.into(), BitSequence::empty())).take(rest));
        }

        i += run;
    }
    items
}

////////////////////////////////////////////////////////////////////////////////
