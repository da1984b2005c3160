#![forbid(unsafe_code)]

use crate::error::{Error, Result};

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BitSequence {
    bits: u16,
    len: u8,
}

/// Longest sequence a [`BitSequence`] can hold.
pub const MAX_SEQUENCE_BITS: u8 = 16;

impl BitSequence {
    /// Keep the low `len` bits of `bits`.
    ///
    /// # Panics
    ///
    /// If `len` is over [`MAX_SEQUENCE_BITS`]; use [`BitSequence::try_new`] for
    /// lengths that are not known up front.
    pub fn new(bits: u16, len: u8) -> Self {
        match Self::try_new(bits, len) {
            Ok(seq) => seq,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_new(mut bits: u16, len: u8) -> Result<Self> {
        if len > MAX_SEQUENCE_BITS {
            return Err(Error::SequenceTooLong(len));
        }
        if len < MAX_SEQUENCE_BITS {
            bits &= !(!0u16 << len);
        }
        Ok(Self { bits, len })
    }

    pub fn empty() -> Self {
        Self { bits: 0, len: 0 }
    }

    pub fn bits(&self) -> u16 {
        self.bits
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `other` below the bits of `self`, as when a code grows by one bit.
    pub fn concat(self, other: Self) -> Self {
        assert!(other.len() + self.len <= 16);
        Self {
            bits: (self.bits << other.len()) | other.bits,
            len: self.len + other.len,
        }
    }

    /// Return the bit at position `n` counted in the given order.
    fn bit(&self, n: u8, order: BitOrder) -> bool {
        let shift = match order {
            BitOrder::LsbFirst => n,
            BitOrder::MsbFirst => self.len - 1 - n,
        };
        (self.bits >> shift) & 1 == 1
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The order in which the bits of a value are laid into the stream.
///
/// DEFLATE packs bits starting at the least significant bit of every byte.
/// Data fields (extra bits, stored lengths, raw bytes) go in with their own
/// least significant bit first, while Huffman codes go in starting from their
/// most significant bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitOrder {
    LsbFirst,
    MsbFirst,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Cursor {
    byte: usize,
    bit: u8,
}

impl Cursor {
    fn advance(&mut self, capacity: usize) {
        self.bit += 1;
        if self.bit == 8 {
            self.bit = 0;
            self.byte = (self.byte + 1) % capacity;
        }
    }

    fn advance_byte(&mut self, capacity: usize) {
        self.byte = (self.byte + 1) % capacity;
    }

    fn mask(&self) -> u8 {
        1 << self.bit
    }
}

////////////////////////////////////////////////////////////////////////////////

/// A fixed-capacity circular queue of bits.
///
/// Bits are written at `tail` and read at `head`; both wrap around the end of
/// the buffer. Reading clears the consumed bits so that the space can be
/// reused by later writes.
#[derive(Debug)]
pub struct BitStream {
    buffer: Vec<u8>,
    len: usize,
    head: Cursor,
    tail: Cursor,
    bits_read: u64,
}

impl BitStream {
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            buffer: vec![0; capacity_bytes],
            len: 0,
            head: Cursor::default(),
            tail: Cursor::default(),
            bits_read: 0,
        }
    }

    /// Create a full stream holding exactly `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() * 8;
        Self {
            buffer: bytes,
            len,
            head: Cursor::default(),
            tail: Cursor::default(),
            bits_read: 0,
        }
    }

    /// Capacity in bits.
    pub fn capacity(&self) -> usize {
        self.buffer.len() * 8
    }

    /// Number of bits written but not yet read.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bits that can still be written.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Total number of bits consumed since creation.
    pub fn bits_read(&self) -> u64 {
        self.bits_read
    }

    pub fn is_read_aligned(&self) -> bool {
        self.head.bit == 0
    }

    pub fn write_bits(&mut self, seq: BitSequence, order: BitOrder) -> Result<usize> {
        let count = seq.len() as usize;
        if count > self.free() {
            return Err(Error::CapacityExceeded {
                requested: count,
                available: self.free(),
            });
        }

        let capacity = self.buffer.len();
        for n in 0..seq.len() {
            let byte = &mut self.buffer[self.tail.byte];
            if seq.bit(n, order) {
                *byte |= self.tail.mask();
            } else {
                *byte &= !self.tail.mask();
            }
            self.tail.advance(capacity);
        }
        self.len += count;

        Ok(count)
    }

    pub fn read_bits(&mut self, len: u8, order: BitOrder) -> Result<BitSequence> {
        if len > MAX_SEQUENCE_BITS {
            return Err(Error::SequenceTooLong(len));
        }
        if len as usize > self.len {
            return Err(Error::TruncatedInput {
                needed: len as usize,
                available: self.len,
            });
        }

        let capacity = self.buffer.len();
        let mut value = 0u16;
        for n in 0..len {
            let byte = &mut self.buffer[self.head.byte];
            let bit = (*byte & self.head.mask() != 0) as u16;
            *byte &= !self.head.mask();
            self.head.advance(capacity);

            value = match order {
                BitOrder::LsbFirst => value | (bit << n),
                BitOrder::MsbFirst => (value << 1) | bit,
            };
        }
        self.len -= len as usize;
        self.bits_read += len as u64;

        BitSequence::try_new(value, len)
    }

    pub fn write_buffer(&mut self, bytes: &[u8]) -> Result<usize> {
        let count = bytes.len() * 8;
        if count > self.free() {
            return Err(Error::CapacityExceeded {
                requested: count,
                available: self.free(),
            });
        }

        if self.tail.bit == 0 {
            let capacity = self.buffer.len();
            for &byte in bytes {
                self.buffer[self.tail.byte] = byte;
                self.tail.advance_byte(capacity);
            }
            self.len += count;
        } else {
            for &byte in bytes {
                self.write_bits(BitSequence::new(byte.into(), 8), BitOrder::LsbFirst)?;
            }
        }

        Ok(bytes.len())
    }

    pub fn read_buffer(&mut self, count: usize) -> Result<Vec<u8>> {
        if count * 8 > self.len {
            return Err(Error::TruncatedInput {
                needed: count * 8,
                available: self.len,
            });
        }

        let mut bytes = Vec::with_capacity(count);
        if self.head.bit == 0 {
            let capacity = self.buffer.len();
            for _ in 0..count {
                let byte = &mut self.buffer[self.head.byte];
                bytes.push(*byte);
                *byte = 0;
                self.head.advance_byte(capacity);
            }
            self.len -= count * 8;
            self.bits_read += count as u64 * 8;
        } else {
            for _ in 0..count {
                bytes.push(self.read_bits(8, BitOrder::LsbFirst)?.bits() as u8);
            }
        }

        Ok(bytes)
    }

    /// Discard the unread bits left in the current byte.
    pub fn align_reader(&mut self) -> Result<()> {
        if self.head.bit != 0 {
            let rest = 8 - self.head.bit;
            self.read_bits(rest, BitOrder::LsbFirst)?;
        }
        Ok(())
    }

    /// Pad the current byte with zero bits.
    pub fn align_writer(&mut self) -> Result<()> {
        if self.tail.bit != 0 {
            let rest = 8 - self.tail.bit;
            self.write_bits(BitSequence::new(0, rest), BitOrder::LsbFirst)?;
        }
        Ok(())
    }

    /// Move every complete byte held by the stream into `out`.
    pub fn drain_into(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let count = self.len / 8;
        out.extend(self.read_buffer(count)?);
        Ok(count)
    }
}

////////////////////////////////////////////////////////////////////////////////
