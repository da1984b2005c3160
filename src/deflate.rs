#![forbid(unsafe_code)]

use std::io::{self, Write};

use log::*;

use crate::bit_stream::{BitOrder, BitSequence, BitStream};
use crate::error::{Error, Result};
use crate::huffman_coding::{
    self, DistanceToken, HuffmanCoding, LitLenToken, TreeHeader, DISTANCE_SYMBOLS, END_OF_BLOCK,
    LITLEN_SYMBOLS, MAX_BITS,
};
use crate::lz77::{self, Matcher, Token, WINDOW_SIZE};
use crate::window::OutputWindow;

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
pub struct BlockHeader {
    pub is_final: bool,
    pub compression_type: CompressionType,
}

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum CompressionType {
    Uncompressed = 0,
    FixedTree = 1,
    DynamicTree = 2,
    Reserved = 3,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Uncompressed
    }
}

impl From<u16> for CompressionType {
    fn from(num: u16) -> Self {
        match num {
            0 => CompressionType::Uncompressed,
            1 => CompressionType::FixedTree,
            2 => CompressionType::DynamicTree,
            _ => CompressionType::Reserved,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

pub struct DeflateReader<'a> {
    stream: &'a mut BitStream,
    reached_last: bool,
}

impl<'a> DeflateReader<'a> {
    pub fn new(stream: &'a mut BitStream) -> Self {
        Self {
            stream,
            reached_last: false,
        }
    }

    pub fn next_block(&mut self) -> Option<Result<BlockHeader>> {
        if self.reached_last {
            return None;
        }
        Some(self.read_header())
    }

    fn read_header(&mut self) -> Result<BlockHeader> {
        let is_final = self.stream.read_bits(1, BitOrder::LsbFirst)?.bits() == 1;
        let compression_type = self.stream.read_bits(2, BitOrder::LsbFirst)?.bits().into();
        self.reached_last |= is_final;
        Ok(BlockHeader {
            is_final,
            compression_type,
        })
    }

    pub fn inflate(&mut self, window: &mut OutputWindow) -> Result<()> {
        while let Some(header) = self.next_block() {
            let header = header?;
            info!("processing block");
            debug!("ISFINAL:\t{:?}", header.is_final);
            debug!("BTYPE:\t{:?}", header.compression_type);

            match header.compression_type {
                CompressionType::Reserved => {
                    return Err(Error::unsupported("reserved block type"));
                }
                CompressionType::Uncompressed => self.copy_stored(window)?,
                CompressionType::FixedTree => {
                    let (litlen, dist) = huffman_coding::get_fixed_coding()?;
                    self.decode_symbols(&litlen, &dist, window)?;
                }
                CompressionType::DynamicTree => {
                    info!("decoding trees");
                    let (litlen, dist) = huffman_coding::decode_litlen_distance_trees(self.stream)?;
                    self.decode_symbols(&litlen, &dist, window)?;
                }
            }
        }
        Ok(())
    }

    fn copy_stored(&mut self, window: &mut OutputWindow) -> Result<()> {
        self.stream.align_reader()?;
        let len = self.stream.read_bits(16, BitOrder::LsbFirst)?.bits();
        let nlen = self.stream.read_bits(16, BitOrder::LsbFirst)?.bits();
        if len != !nlen {
            return Err(Error::LengthMismatch { len, nlen });
        }
        debug!("copying {} bytes", len);
        window.extend(&self.stream.read_buffer(len.into())?);
        Ok(())
    }

    fn decode_symbols(
        &mut self,
        litlen: &HuffmanCoding<LitLenToken>,
        dist: &HuffmanCoding<DistanceToken>,
        window: &mut OutputWindow,
    ) -> Result<()> {
        info!("processing symbols");
        loop {
            let symbol = litlen.read_symbol(self.stream)?;
            trace!("symbol: {:?}", symbol);
            match symbol {
                LitLenToken::Literal(lit) => window.push(lit),
                LitLenToken::Length(length) => {
                    let actual_len = length.read_value(self.stream)?;
                    let DistanceToken(distance) = dist.read_symbol(self.stream)?;
                    let actual_dist = distance.read_value(self.stream)?;
                    trace!("dist: {}, len: {}", actual_dist, actual_len);
                    window.write_previous(actual_dist, actual_len)?;
                }
                LitLenToken::EndOfBlock => {
                    info!("reached end of block");
                    return Ok(());
                }
            }
        }
    }
}

/// Decode a raw DEFLATE stream.
pub fn inflate(data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    inflate_prefix(data, size_hint).map(|(output, _)| output)
}

/// Decode the DEFLATE stream at the start of `data`, returning the output and
/// the number of input bytes the stream occupied.
pub(crate) fn inflate_prefix(data: &[u8], size_hint: usize) -> Result<(Vec<u8>, usize)> {
    let mut stream = BitStream::from_bytes(data.to_vec());
    let output = inflate_stream(&mut stream, size_hint)?;
    Ok((output, (stream.bits_read() / 8) as usize))
}

/// Decode one DEFLATE stream from `stream`, leaving the reader on the byte
/// boundary after its final block.
pub(crate) fn inflate_stream(stream: &mut BitStream, size_hint: usize) -> Result<Vec<u8>> {
    let start = stream.bits_read();
    let mut window = OutputWindow::with_capacity(size_hint);
    DeflateReader::new(stream).inflate(&mut window)?;
    stream.align_reader()?;

    debug!(
        "inflated {} bytes from {}",
        window.byte_count(),
        (stream.bits_read() - start) / 8
    );
    Ok(window.into_inner())
}

////////////////////////////////////////////////////////////////////////////////

/// Compression level, 0 (stored only) to 9 (slowest, smallest).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Compression(u8);

impl Compression {
    pub fn new(level: u32) -> Self {
        Self(level.min(9) as u8)
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    fn matcher(&self) -> Option<Matcher> {
        let (max_chain, lazy) = match self.0 {
            0 => return None,
            1 => (4, false),
            2 => (8, false),
            3 => (16, false),
            4 => (32, false),
            5 => (64, true),
            6 => (128, true),
            7 => (256, true),
            8 => (1024, true),
            _ => (4096, true),
        };
        Some(Matcher::new(max_chain, lazy))
    }

    fn allows_dynamic(&self) -> bool {
        self.0 >= 4
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self(6)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Largest block input; a stored block can hold at most this many bytes.
const BLOCK_INPUT: usize = 65535;
const SINK_CAPACITY: usize = 16 * 1024;
/// Bits needed by the longest length/distance pair.
const MAX_TOKEN_BITS: usize = MAX_BITS + 5 + MAX_BITS + 13;

/// A bounded bit stream that spills whole bytes into a writer.
struct BitSink<W> {
    inner: W,
    stream: BitStream,
    scratch: Vec<u8>,
}

impl<W: Write> BitSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            stream: BitStream::with_capacity(SINK_CAPACITY),
            scratch: Vec::with_capacity(SINK_CAPACITY),
        }
    }

    fn reserve(&mut self, bits: usize) -> Result<()> {
        if self.stream.free() < bits {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        self.scratch.clear();
        self.stream.drain_into(&mut self.scratch)?;
        self.inner.write_all(&self.scratch)?;
        Ok(())
    }

    fn write_bits(&mut self, bits: u16, len: u8) -> Result<()> {
        self.reserve(len.into())?;
        self.stream
            .write_bits(BitSequence::new(bits, len), BitOrder::LsbFirst)?;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(SINK_CAPACITY / 2) {
            self.reserve(chunk.len() * 8)?;
            self.stream.write_buffer(chunk)?;
        }
        Ok(())
    }

    fn align(&mut self) -> Result<()> {
        self.reserve(7)?;
        self.stream.align_writer()
    }

    fn finish(mut self) -> Result<W> {
        self.align()?;
        self.spill()?;
        Ok(self.inner)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Streaming DEFLATE encoder.
///
/// Input is cut into blocks of at most 64 KiB. Each block is encoded with
/// whichever of the stored, fixed or dynamic representations is smallest,
/// subject to the compression level.
pub struct DeflateWriter<W: Write> {
    sink: BitSink<W>,
    level: Compression,
    matcher: Option<Matcher>,
    // Up to WINDOW_SIZE bytes of already encoded input, then pending input
    // starting at `start`.
    buffer: Vec<u8>,
    start: usize,
}

impl<W: Write> DeflateWriter<W> {
    pub fn new(inner: W, level: Compression) -> Self {
        debug!("deflate level {}", level.level());
        Self {
            sink: BitSink::new(inner),
            level,
            matcher: level.matcher(),
            buffer: Vec::new(),
            start: 0,
        }
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        while self.buffer.len() - self.start > BLOCK_INPUT {
            self.emit_block(self.start + BLOCK_INPUT, false)?;
        }
        Ok(())
    }

    /// Encode the remaining input as the final block and return the writer.
    pub fn finish(mut self) -> Result<W> {
        self.emit_block(self.buffer.len(), true)?;
        let mut inner = self.sink.finish()?;
        inner.flush()?;
        Ok(inner)
    }

    fn emit_block(&mut self, end: usize, is_final: bool) -> Result<()> {
        let data = &self.buffer[..end];
        write_block(
            &mut self.sink,
            data,
            self.start,
            self.matcher.as_ref(),
            self.level.allows_dynamic(),
            is_final,
        )?;

        self.start = end;
        if self.start > WINDOW_SIZE {
            self.buffer.drain(..self.start - WINDOW_SIZE);
            self.start = WINDOW_SIZE;
        }
        Ok(())
    }
}

impl<W: Write> Write for DeflateWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.spill()?;
        self.sink.inner.flush()
    }
}

fn write_block<W: Write>(
    sink: &mut BitSink<W>,
    data: &[u8],
    start: usize,
    matcher: Option<&Matcher>,
    allow_dynamic: bool,
    is_final: bool,
) -> Result<()> {
    let block = &data[start..];
    let matcher = match matcher {
        Some(matcher) => matcher,
        None => return write_stored(sink, block, is_final),
    };

    let tokens = matcher.tokens(data, start);
    let (litlen_freqs, dist_freqs) = symbol_frequencies(&tokens);

    let fixed_litlen = huffman_coding::fixed_litlen_lengths();
    let fixed_dist = huffman_coding::fixed_distance_lengths();
    let fixed_cost = 3 + body_cost(&tokens, &fixed_litlen, &fixed_dist);
    let stored_cost = 3 + 7 + 32 + 8 * block.len();

    let dynamic = if allow_dynamic {
        let litlen = huffman_coding::lengths_from_frequencies(&litlen_freqs, MAX_BITS as u8);
        let mut dist = huffman_coding::lengths_from_frequencies(&dist_freqs, MAX_BITS as u8);
        if dist.iter().all(|&len| len == 0) {
            dist[0] = 1;
        }
        let header = TreeHeader::new(&litlen, &dist);
        let cost = 3 + header.cost() + body_cost(&tokens, &litlen, &dist);
        Some((cost, header, litlen, dist))
    } else {
        None
    };

    debug!(
        "block of {} bytes, {} tokens: stored {} bits, fixed {} bits, dynamic {:?} bits",
        block.len(),
        tokens.len(),
        stored_cost,
        fixed_cost,
        dynamic.as_ref().map(|(cost, ..)| *cost)
    );

    match dynamic {
        Some((cost, header, litlen, dist)) if cost < fixed_cost && cost < stored_cost => {
            sink.write_bits(is_final as u16, 1)?;
            sink.write_bits(CompressionType::DynamicTree as u16, 2)?;
            sink.reserve(header.cost())?;
            header.write(&mut sink.stream)?;
            write_tokens(sink, &tokens, &litlen, &dist)
        }
        _ if stored_cost <= fixed_cost => write_stored(sink, block, is_final),
        _ => {
            sink.write_bits(is_final as u16, 1)?;
            sink.write_bits(CompressionType::FixedTree as u16, 2)?;
            write_tokens(sink, &tokens, &fixed_litlen, &fixed_dist)
        }
    }
}

fn write_stored<W: Write>(sink: &mut BitSink<W>, block: &[u8], is_final: bool) -> Result<()> {
    debug_assert!(block.len() <= BLOCK_INPUT);
    let len = block.len() as u16;
    sink.write_bits(is_final as u16, 1)?;
    sink.write_bits(CompressionType::Uncompressed as u16, 2)?;
    sink.align()?;
    sink.write_bits(len, 16)?;
    sink.write_bits(!len, 16)?;
    sink.write_bytes(block)
}

fn write_tokens<W: Write>(
    sink: &mut BitSink<W>,
    tokens: &[Token],
    litlen_lengths: &[u8],
    dist_lengths: &[u8],
) -> Result<()> {
    let litlen = HuffmanCoding::<LitLenToken>::from_lengths(litlen_lengths)?;
    let dist = HuffmanCoding::<DistanceToken>::from_lengths(dist_lengths)?;
    let lsb = BitOrder::LsbFirst;

    for token in tokens {
        sink.reserve(MAX_TOKEN_BITS)?;
        let stream = &mut sink.stream;
        match *token {
            Token::Literal(byte) => litlen.write_symbol(stream, byte.into())?,
            Token::Match { length, distance } => {
                let (symbol, code) = lz77::length_symbol(length);
                litlen.write_symbol(stream, symbol)?;
                stream.write_bits(code.extra(length), lsb)?;

                let (symbol, code) = lz77::distance_symbol(distance);
                dist.write_symbol(stream, symbol)?;
                stream.write_bits(code.extra(distance), lsb)?;
            }
        }
    }

    sink.reserve(MAX_BITS)?;
    litlen.write_symbol(&mut sink.stream, END_OF_BLOCK)
}

fn symbol_frequencies(tokens: &[Token]) -> (Vec<u32>, Vec<u32>) {
    let mut litlen = vec![0u32; LITLEN_SYMBOLS];
    let mut dist = vec![0u32; DISTANCE_SYMBOLS];
    for token in tokens {
        match *token {
            Token::Literal(byte) => litlen[byte as usize] += 1,
            Token::Match { length, distance } => {
                litlen[lz77::length_symbol(length).0 as usize] += 1;
                dist[lz77::distance_symbol(distance).0 as usize] += 1;
            }
        }
    }
    litlen[END_OF_BLOCK as usize] += 1;
    (litlen, dist)
}

/// Bits needed for the tokens and end-of-block symbol under the given lengths.
fn body_cost(tokens: &[Token], litlen_lengths: &[u8], dist_lengths: &[u8]) -> usize {
    let mut bits = litlen_lengths[END_OF_BLOCK as usize] as usize;
    for token in tokens {
        bits += match *token {
            Token::Literal(byte) => litlen_lengths[byte as usize] as usize,
            Token::Match { length, distance } => {
                let (symbol, code) = lz77::length_symbol(length);
                let (dist_symbol, dist_code) = lz77::distance_symbol(distance);
                litlen_lengths[symbol as usize] as usize
                    + code.extra_bits as usize
                    + dist_lengths[dist_symbol as usize] as usize
                    + dist_code.extra_bits as usize
            }
        };
    }
    bits
}

/// Encode `data` as a raw DEFLATE stream at the default level.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    deflate_with(data, Compression::default())
}

pub fn deflate_with(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut writer = DeflateWriter::new(Vec::with_capacity(data.len() / 2 + 16), level);
    writer.write_data(data)?;
    writer.finish()
}

////////////////////////////////////////////////////////////////////////////////
