#![forbid(unsafe_code)]

use crc::{Crc, Digest};

////////////////////////////////////////////////////////////////////////////////

// The crc crate builds its 256-entry lookup tables in const context, so both
// tables exist once per process before first use.
static CRC_32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
static CRC_16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_USB);

/// A checksum that can be folded over data in several pieces.
pub trait Checksum {
    fn update(&mut self, bytes: &[u8]);

    /// The checksum of everything passed to `update` so far.
    fn finalize(&self) -> u32;
}

////////////////////////////////////////////////////////////////////////////////

/// CRC-32 with the reflected polynomial 0xEDB88320, as used by gzip.
#[derive(Clone)]
pub struct Crc32 {
    digest: Digest<'static, u32>,
}

impl Crc32 {
    pub fn new() -> Self {
        Self {
            digest: CRC_32.digest(),
        }
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Crc32 {
    fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.digest.clone().finalize()
    }
}

pub fn crc32(bytes: &[u8]) -> u32 {
    CRC_32.checksum(bytes)
}

////////////////////////////////////////////////////////////////////////////////

/// CRC-16 with the reflected polynomial 0xA001, initial value and final xor 0xFFFF.
#[derive(Clone)]
pub struct Crc16 {
    digest: Digest<'static, u16>,
}

impl Crc16 {
    pub fn new() -> Self {
        Self {
            digest: CRC_16.digest(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    pub fn finalize(&self) -> u16 {
        self.digest.clone().finalize()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

pub fn crc16(bytes: &[u8]) -> u16 {
    CRC_16.checksum(bytes)
}

////////////////////////////////////////////////////////////////////////////////

/// Largest prime smaller than 65536.
const ADLER_MOD: u32 = 65521;

/// Bytes that can be summed before `b` may overflow a u32.
const ADLER_NMAX: usize = 5552;

/// Adler-32, the zlib trailer checksum.
#[derive(Clone, Copy, Debug)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Adler32 {
    fn update(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(ADLER_NMAX) {
            for &byte in chunk {
                self.a += byte as u32;
                self.b += self.a;
            }
            self.a %= ADLER_MOD;
            self.b %= ADLER_MOD;
        }
    }

    fn finalize(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

pub fn adler32(bytes: &[u8]) -> u32 {
    let mut adler = Adler32::new();
    adler.update(bytes);
    adler.finalize()
}

////////////////////////////////////////////////////////////////////////////////
