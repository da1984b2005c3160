#![forbid(unsafe_code)]

use std::io::{self, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::*;

use crate::checksum::{Adler32, Checksum};
use crate::deflate::{self, Compression, DeflateWriter};
use crate::error::{Error, Result};

////////////////////////////////////////////////////////////////////////////////

const CM_DEFLATE: u8 = 8;
const MAX_CINFO: u8 = 7;

const FDICT_OFFSET: u8 = 5;
const FLEVEL_OFFSET: u8 = 6;

const TRAILER_LEN: usize = 4;

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionLevel {
    Fastest,
    Fast,
    Default,
    Maximum,
}

impl From<u8> for CompressionLevel {
    fn from(flevel: u8) -> Self {
        match flevel & 0b11 {
            0 => Self::Fastest,
            1 => Self::Fast,
            2 => Self::Default,
            _ => Self::Maximum,
        }
    }
}

impl From<Compression> for CompressionLevel {
    fn from(level: Compression) -> Self {
        match level.level() {
            0..=1 => Self::Fastest,
            2..=5 => Self::Fast,
            6 => Self::Default,
            _ => Self::Maximum,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, PartialEq, Eq)]
pub struct ZlibHeader {
    pub window_size: usize,
    pub level: CompressionLevel,
}

impl ZlibHeader {
    pub fn new(level: Compression) -> Self {
        Self {
            window_size: 1 << (MAX_CINFO + 8),
            level: level.into(),
        }
    }

    pub fn parse<R: io::Read>(reader: &mut R) -> Result<Self> {
        let cmf = reader.read_u8()?;
        let flg = reader.read_u8()?;
        debug!("CMF:\t{:#04x}", cmf);
        debug!("FLG:\t{:#04x}", flg);

        if cmf & 0x0f != CM_DEFLATE {
            return Err(Error::malformed(format!(
                "unknown compression method {}",
                cmf & 0x0f
            )));
        }
        let cinfo = cmf >> 4;
        if cinfo > MAX_CINFO {
            return Err(Error::unsupported(format!(
                "window size 2^{} exceeds 32 KiB",
                cinfo + 8
            )));
        }
        if (u16::from(cmf) * 256 + u16::from(flg)) % 31 != 0 {
            return Err(Error::malformed("CMF/FLG check bits do not match"));
        }
        if flg & (1 << FDICT_OFFSET) != 0 {
            let dict_id = reader.read_u32::<BigEndian>()?;
            return Err(Error::unsupported(format!(
                "preset dictionary {:#010x}",
                dict_id
            )));
        }

        Ok(Self {
            window_size: 1 << (cinfo + 8),
            level: (flg >> FLEVEL_OFFSET).into(),
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        let cinfo = (self.window_size.trailing_zeros() as u8).saturating_sub(8);
        let cmf = (cinfo << 4) | CM_DEFLATE;
        let mut flg = (self.level as u8) << FLEVEL_OFFSET;
        let rem = (u16::from(cmf) * 256 + u16::from(flg)) % 31;
        if rem != 0 {
            flg += (31 - rem) as u8;
        }
        [cmf, flg]
    }
}

////////////////////////////////////////////////////////////////////////////////

pub struct ZlibWriter<W: Write> {
    deflater: DeflateWriter<W>,
    adler: Adler32,
}

impl<W: Write> ZlibWriter<W> {
    pub fn new(mut inner: W, level: Compression) -> Result<Self> {
        inner.write_all(&ZlibHeader::new(level).to_bytes())?;
        Ok(Self {
            deflater: DeflateWriter::new(inner, level),
            adler: Adler32::new(),
        })
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.adler.update(data);
        self.deflater.write_data(data)
    }

    pub fn finish(self) -> Result<W> {
        let mut inner = self.deflater.finish()?;
        let checksum = self.adler.finalize();
        debug!("ADLER32:\t{:#010x}", checksum);
        inner.write_u32::<BigEndian>(checksum)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for ZlibWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.deflater.flush()
    }
}

////////////////////////////////////////////////////////////////////////////////

pub fn zlib_compress(data: &[u8]) -> Result<Vec<u8>> {
    zlib_compress_with(data, Compression::default())
}

pub fn zlib_compress_with(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut writer = ZlibWriter::new(Vec::with_capacity(data.len() / 2 + 16), level)?;
    writer.write_data(data)?;
    writer.finish()
}

/// Decompress a zlib stream and verify its Adler-32 trailer.
///
/// Bytes after the trailer are not part of the stream; they are logged and
/// ignored.
pub fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>> {
    info!("parsing zlib header");
    let mut input = data;
    let header = ZlibHeader::parse(&mut input)?;
    debug!("{:?}", header);

    info!("parsing deflate format");
    let (output, consumed) = deflate::inflate_prefix(input, data.len() * 2)?;

    let mut trailer = &input[consumed..];
    if trailer.len() < TRAILER_LEN {
        return Err(Error::TruncatedInput {
            needed: TRAILER_LEN * 8,
            available: trailer.len() * 8,
        });
    }
    let expected = trailer.read_u32::<BigEndian>()?;
    let mut adler = Adler32::new();
    adler.update(&output);
    let computed = adler.finalize();
    if expected != computed {
        return Err(Error::ChecksumMismatch {
            algorithm: "Adler-32",
            expected,
            computed,
        });
    }
    if !trailer.is_empty() {
        warn!("ignoring {} bytes after the zlib trailer", trailer.len());
    }

    Ok(output)
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn decompress_known_streams() -> Result<()> {
        let wikipedia = [
            120, 156, 11, 207, 204, 206, 44, 72, 77, 201, 76, 4, 0, 17, 230, 3, 152,
        ];
        assert_eq!(zlib_decompress(&wikipedia)?, b"Wikipedia");

        let hello = [
            120, 156, 243, 72, 205, 201, 201, 87, 40, 207, 47, 202, 73, 1, 0, 24, 171, 4, 61,
        ];
        assert_eq!(zlib_decompress(&hello)?, b"Hello world");
        Ok(())
    }

    #[test]
    fn header_bytes() {
        assert_eq!(ZlibHeader::new(Compression::default()).to_bytes(), [0x78, 0x9c]);
        assert_eq!(ZlibHeader::new(Compression::fast()).to_bytes(), [0x78, 0x01]);
        assert_eq!(ZlibHeader::new(Compression::best()).to_bytes(), [0x78, 0xda]);
        assert_eq!(ZlibHeader::new(Compression::new(3)).to_bytes(), [0x78, 0x5e]);
    }

    #[test]
    fn parse_header() -> Result<()> {
        let header = ZlibHeader::parse(&mut &[0x78u8, 0xda][..])?;
        assert_eq!(header.window_size, 32768);
        assert_eq!(header.level, CompressionLevel::Maximum);

        let header = ZlibHeader::parse(&mut &[0x08u8, 0x1d][..])?;
        assert_eq!(header.window_size, 256);
        Ok(())
    }

    #[test]
    fn rejects_bad_headers() {
        let kind = |bytes: &[u8]| zlib_decompress(bytes).unwrap_err().kind();

        assert_eq!(kind(&[0x78, 0x9d, 0x03, 0x00]), ErrorKind::MalformedHeader);
        assert_eq!(kind(&[0x79, 0x9c, 0x03, 0x00]), ErrorKind::MalformedHeader);
        assert_eq!(kind(&[0x88, 0x98, 0x03, 0x00]), ErrorKind::UnsupportedFeature);
        assert_eq!(
            kind(&[0x78, 0xbb, 0, 0, 0, 1, 0x03, 0x00]),
            ErrorKind::UnsupportedFeature
        );
        assert_eq!(kind(&[0x78]), ErrorKind::TruncatedInput);
    }

    #[test]
    fn checksum_mismatch() -> Result<()> {
        let mut data = zlib_compress(b"checksummed payload")?;
        let last = data.len() - 1;
        data[last] ^= 0x01;
        assert_eq!(
            zlib_decompress(&data).unwrap_err().kind(),
            ErrorKind::ChecksumMismatch
        );

        data.truncate(last);
        assert!(matches!(
            zlib_decompress(&data).unwrap_err(),
            Error::TruncatedInput {
                needed: 32,
                available: 24
            }
        ));
        Ok(())
    }

    #[test]
    fn trailing_bytes_are_ignored() -> Result<()> {
        let mut data = zlib_compress(b"payload")?;
        data.extend_from_slice(b"\0\0garbage");
        assert_eq!(zlib_decompress(&data)?, b"payload");
        Ok(())
    }

    #[test]
    fn round_trip() -> Result<()> {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8 ^ (i / 1000) as u8).collect();
        for level in [0, 2, 6, 9] {
            let compressed = zlib_compress_with(&data, Compression::new(level))?;
            assert_eq!(&compressed[..1], &[0x78]);
            assert_eq!(zlib_decompress(&compressed)?, data);
        }
        assert_eq!(zlib_decompress(&zlib_compress(b"")?)?, b"");
        Ok(())
    }
}
