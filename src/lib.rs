#![forbid(unsafe_code)]

use std::io::Write;

use log::*;

pub mod bit_stream;
pub mod checksum;
pub mod deflate;
pub mod error;
pub mod gzip;
pub mod huffman_coding;
pub mod lz77;
pub mod window;
pub mod zlib;

pub use bit_stream::{BitOrder, BitSequence, BitStream};
pub use checksum::{adler32, crc16, crc32, Adler32, Checksum, Crc16, Crc32};
pub use deflate::{deflate, deflate_with, inflate, Compression, DeflateReader, DeflateWriter};
pub use error::{Error, ErrorKind, Result};
pub use gzip::{
    gzip_compress, gzip_decompress, gzip_read, gzip_write, GzipReader, GzipWriter, MemberHeader,
};
pub use zlib::{zlib_compress, zlib_compress_with, zlib_decompress, ZlibHeader, ZlibWriter};

////////////////////////////////////////////////////////////////////////////////

/// Container wrapped around the DEFLATE stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Raw,
    Zlib,
    Gzip,
}

impl std::str::FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raw" | "deflate" => Ok(Self::Raw),
            "zlib" => Ok(Self::Zlib),
            "gzip" | "gz" => Ok(Self::Gzip),
            other => Err(Error::unsupported(format!("unknown format {:?}", other))),
        }
    }
}

pub fn compress<W: Write>(data: &[u8], format: Format, level: Compression, mut output: W) -> Result<()> {
    info!("compressing {} bytes as {:?}, level {}", data.len(), format, level.level());
    let compressed = match format {
        Format::Raw => deflate_with(data, level)?,
        Format::Zlib => zlib_compress_with(data, level)?,
        Format::Gzip => gzip_compress(data, &MemberHeader::default(), level)?,
    };
    output.write_all(&compressed)?;
    Ok(())
}

pub fn decompress<W: Write>(data: &[u8], format: Format, mut output: W) -> Result<()> {
    info!("decompressing {} bytes as {:?}", data.len(), format);
    let decompressed = match format {
        Format::Raw => inflate(data, data.len() * 2)?,
        Format::Zlib => zlib_decompress(data)?,
        Format::Gzip => gzip_decompress(data)?,
    };
    output.write_all(&decompressed)?;
    Ok(())
}
