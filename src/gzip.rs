#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::*;

use crate::bit_stream::BitStream;
use crate::checksum::{crc32, Checksum, Crc32};
use crate::deflate::{self, Compression, DeflateWriter};
use crate::error::{Error, Result};

////////////////////////////////////////////////////////////////////////////////

const ID1: u8 = 0x1f;
const ID2: u8 = 0x8b;

const CM_DEFLATE: u8 = 8;

const FTEXT_OFFSET: u8 = 0;
const FHCRC_OFFSET: u8 = 1;
const FEXTRA_OFFSET: u8 = 2;
const FNAME_OFFSET: u8 = 3;
const FCOMMENT_OFFSET: u8 = 4;
const RESERVED_FLAGS: u8 = 0b1110_0000;

const XFL_BEST: u8 = 2;
const XFL_FASTEST: u8 = 4;
const OS_UNKNOWN: u8 = 255;

const FOOTER_LEN: usize = 8;
/// Cap on the output preallocated for one member.
const SIZE_HINT_LIMIT: usize = 1 << 16;

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberHeader {
    pub compression_method: CompressionMethod,
    pub modification_time: u32,
    pub extra: Option<Vec<u8>>,
    pub name: Option<Vec<u8>>,
    pub comment: Option<Vec<u8>>,
    pub extra_flags: u8,
    pub os: u8,
    pub has_crc: bool,
    pub is_text: bool,
}

impl Default for MemberHeader {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflate,
            modification_time: 0,
            extra: None,
            name: None,
            comment: None,
            extra_flags: 0,
            os: OS_UNKNOWN,
            has_crc: false,
            is_text: false,
        }
    }
}

impl MemberHeader {
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.as_bytes().to_vec());
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.as_bytes().to_vec());
        self
    }

    pub fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_modification_time(mut self, mtime: u32) -> Self {
        self.modification_time = mtime;
        self
    }

    pub fn with_os(mut self, os: u8) -> Self {
        self.os = os;
        self
    }

    pub fn with_text(mut self, is_text: bool) -> Self {
        self.is_text = is_text;
        self
    }

    pub fn with_header_crc(mut self, has_crc: bool) -> Self {
        self.has_crc = has_crc;
        self
    }

    pub fn flags(&self) -> MemberFlags {
        let mut flags = MemberFlags(0);
        flags.set_is_text(self.is_text);
        flags.set_has_crc(self.has_crc);
        flags.set_has_extra(self.extra.is_some());
        flags.set_has_name(self.name.is_some());
        flags.set_has_comment(self.comment.is_some());
        flags
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![ID1, ID2, self.compression_method.into(), self.flags().0];
        bytes.write_u32::<LittleEndian>(self.modification_time)?;
        bytes.extend_from_slice(&[self.extra_flags, self.os]);

        if let Some(extra) = &self.extra {
            let len = u16::try_from(extra.len())
                .map_err(|_| Error::malformed("extra field longer than 65535 bytes"))?;
            bytes.write_u16::<LittleEndian>(len)?;
            bytes.extend_from_slice(extra);
        }

        for field in [&self.name, &self.comment].into_iter().flatten() {
            if field.contains(&0) {
                return Err(Error::malformed("name or comment contains a NUL byte"));
            }
            bytes.extend_from_slice(field);
            bytes.push(0);
        }

        if self.has_crc {
            let crc = header_crc16(&bytes);
            bytes.write_u16::<LittleEndian>(crc)?;
        }

        Ok(bytes)
    }

    /// Parse a member header, consuming it from `input`.
    pub fn parse(input: &mut &[u8]) -> Result<Self> {
        let start = *input;
        let header = input;

        let id_1 = header.read_u8()?;
        let id_2 = header.read_u8()?;
        if id_1 != ID1 || id_2 != ID2 {
            return Err(Error::malformed(format!(
                "wrong id values {:#04x} {:#04x}",
                id_1, id_2
            )));
        }

        let mut pheader = MemberHeader {
            compression_method: header.read_u8()?.into(),
            ..Default::default()
        };
        debug!("CM:\t{:?}", pheader.compression_method);
        if pheader.compression_method != CompressionMethod::Deflate {
            return Err(Error::malformed(format!(
                "unsupported compression method {:?}",
                pheader.compression_method
            )));
        }

        let pflags = MemberFlags(header.read_u8()?);
        debug!("FLG:\t{:#010b}", pflags.0);
        if pflags.0 & RESERVED_FLAGS != 0 {
            return Err(Error::malformed("reserved flag bits are set"));
        }

        pheader.modification_time = header.read_u32::<LittleEndian>()?;
        pheader.extra_flags = header.read_u8()?;
        pheader.os = header.read_u8()?;
        debug!("MTIME:\t{}", pheader.modification_time);
        debug!("XFL:\t{}", pheader.extra_flags);
        debug!("OS:\t{}", pheader.os);

        if pflags.has_extra() {
            let len: usize = header.read_u16::<LittleEndian>()?.into();
            let mut extra = vec![0; len];
            header.read_exact(&mut extra)?;
            debug!("EXTRA:\t{} bytes", extra.len());
            pheader.extra = Some(extra);
        }

        if pflags.has_name() {
            pheader.name = Some(read_zero_terminated(header)?);
            debug!("NAME:\t{:?}", pheader.name.as_deref().map(String::from_utf8_lossy));
        }

        if pflags.has_comment() {
            pheader.comment = Some(read_zero_terminated(header)?);
            debug!(
                "COMMENT:\t{:?}",
                pheader.comment.as_deref().map(String::from_utf8_lossy)
            );
        }

        pheader.is_text = pflags.is_text();

        if pflags.has_crc() {
            let covered = &start[..start.len() - header.len()];
            let crc = header.read_u16::<LittleEndian>()?;
            debug!("CRC:\t{:#06x}", crc);

            pheader.has_crc = true;
            let computed = header_crc16(covered);
            if crc != computed {
                return Err(Error::ChecksumMismatch {
                    algorithm: "header CRC-16",
                    expected: crc.into(),
                    computed: computed.into(),
                });
            }
        }

        Ok(pheader)
    }
}

/// The gzip header check value: the low 16 bits of the CRC-32 of the header.
fn header_crc16(bytes: &[u8]) -> u16 {
    (crc32(bytes) & 0xffff) as u16
}

fn read_zero_terminated(header: &mut &[u8]) -> Result<Vec<u8>> {
    let mut field = vec![];
    header.read_until(0, &mut field)?;
    if field.pop() != Some(0) {
        return Err(Error::UnexpectedEof);
    }
    Ok(field)
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionMethod {
    Deflate,
    Unknown(u8),
}

impl From<u8> for CompressionMethod {
    fn from(value: u8) -> Self {
        match value {
            CM_DEFLATE => Self::Deflate,
            x => Self::Unknown(x),
        }
    }
}

impl From<CompressionMethod> for u8 {
    fn from(method: CompressionMethod) -> u8 {
        match method {
            CompressionMethod::Deflate => CM_DEFLATE,
            CompressionMethod::Unknown(x) => x,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct MemberFlags(u8);

impl MemberFlags {
    fn bit(&self, n: u8) -> bool {
        (self.0 >> n) & 1 != 0
    }

    fn set_bit(&mut self, n: u8, value: bool) {
        if value {
            self.0 |= 1 << n;
        } else {
            self.0 &= !(1 << n);
        }
    }

    pub fn is_text(&self) -> bool {
        self.bit(FTEXT_OFFSET)
    }

    pub fn set_is_text(&mut self, value: bool) {
        self.set_bit(FTEXT_OFFSET, value)
    }

    pub fn has_crc(&self) -> bool {
        self.bit(FHCRC_OFFSET)
    }

    pub fn set_has_crc(&mut self, value: bool) {
        self.set_bit(FHCRC_OFFSET, value)
    }

    pub fn has_extra(&self) -> bool {
        self.bit(FEXTRA_OFFSET)
    }

    pub fn set_has_extra(&mut self, value: bool) {
        self.set_bit(FEXTRA_OFFSET, value)
    }

    pub fn has_name(&self) -> bool {
        self.bit(FNAME_OFFSET)
    }

    pub fn set_has_name(&mut self, value: bool) {
        self.set_bit(FNAME_OFFSET, value)
    }

    pub fn has_comment(&self) -> bool {
        self.bit(FCOMMENT_OFFSET)
    }

    pub fn set_has_comment(&mut self, value: bool) {
        self.set_bit(FCOMMENT_OFFSET, value)
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
pub struct MemberFooter {
    pub data_crc32: u32,
    pub data_size: u32,
}

impl MemberFooter {
    fn parse(mut input: &[u8]) -> Result<Self> {
        if input.len() < FOOTER_LEN {
            return Err(Error::TruncatedInput {
                needed: FOOTER_LEN * 8,
                available: input.len() * 8,
            });
        }
        Ok(Self {
            data_crc32: input.read_u32::<LittleEndian>()?,
            data_size: input.read_u32::<LittleEndian>()?,
        })
    }

    fn verify(&self, output: &[u8]) -> Result<()> {
        let mut crc = Crc32::new();
        crc.update(output);
        let computed = crc.finalize();
        if computed != self.data_crc32 {
            return Err(Error::ChecksumMismatch {
                algorithm: "CRC-32",
                expected: self.data_crc32,
                computed,
            });
        }

        let actual = output.len() as u32;
        if actual != self.data_size {
            return Err(Error::SizeMismatch {
                expected: self.data_size,
                actual,
            });
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Reads the members of an in-memory gzip file one after another.
///
/// The input is loaded into a single bitstream once; headers and footers are
/// parsed from the original slice at the stream's read offset.
pub struct GzipReader<'a> {
    input: &'a [u8],
    stream: BitStream,
}

impl<'a> GzipReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            stream: BitStream::from_bytes(input.to_vec()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    /// Byte offset of the next unread input byte.
    pub fn offset(&self) -> usize {
        (self.stream.bits_read() / 8) as usize
    }

    fn remaining(&self) -> &'a [u8] {
        &self.input[self.offset()..]
    }

    fn skip(&mut self, count: usize) -> Result<()> {
        self.stream.read_buffer(count)?;
        Ok(())
    }

    pub fn read_member(&mut self) -> Result<(MemberHeader, Vec<u8>)> {
        info!("parsing gzip header");
        let mut rest = self.remaining();
        let header = MemberHeader::parse(&mut rest)?;
        self.skip(self.remaining().len() - rest.len())?;

        info!("parsing deflate format");
        let size_hint = rest.len().saturating_mul(2).min(SIZE_HINT_LIMIT);
        let output = deflate::inflate_stream(&mut self.stream, size_hint)?;

        let footer = MemberFooter::parse(self.remaining())?;
        self.skip(FOOTER_LEN)?;
        debug!("FOOTER:\t{:?}", footer);
        footer.verify(&output)?;

        Ok((header, output))
    }
}

////////////////////////////////////////////////////////////////////////////////

pub struct GzipWriter<W: Write> {
    deflater: DeflateWriter<W>,
    crc: Crc32,
    size: u32,
}

impl<W: Write> GzipWriter<W> {
    pub fn new(mut inner: W, header: &MemberHeader, level: Compression) -> Result<Self> {
        let mut header = header.clone();
        header.extra_flags = match level.level() {
            9 => XFL_BEST,
            1 => XFL_FASTEST,
            _ => 0,
        };
        inner.write_all(&header.to_bytes()?)?;

        Ok(Self {
            deflater: DeflateWriter::new(inner, level),
            crc: Crc32::new(),
            size: 0,
        })
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.crc.update(data);
        self.size = self.size.wrapping_add(data.len() as u32);
        self.deflater.write_data(data)
    }

    pub fn finish(self) -> Result<W> {
        let mut inner = self.deflater.finish()?;
        let footer = MemberFooter {
            data_crc32: self.crc.finalize(),
            data_size: self.size,
        };
        debug!("FOOTER:\t{:?}", footer);
        inner.write_u32::<LittleEndian>(footer.data_crc32)?;
        inner.write_u32::<LittleEndian>(footer.data_size)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for GzipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_data(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.deflater.flush()
    }
}

////////////////////////////////////////////////////////////////////////////////

pub fn gzip_compress(data: &[u8], header: &MemberHeader, level: Compression) -> Result<Vec<u8>> {
    let mut writer = GzipWriter::new(Vec::with_capacity(data.len() / 2 + 32), header, level)?;
    writer.write_data(data)?;
    writer.finish()
}

/// Decompress every member of a gzip file and concatenate their contents.
pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = GzipReader::new(data);
    let mut output = Vec::new();
    loop {
        let (_header, member) = reader.read_member()?;
        output.extend_from_slice(&member);
        if reader.is_empty() {
            return Ok(output);
        }
        info!("next member at offset {}", reader.offset());
    }
}

pub fn gzip_read<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let data = std::fs::read(path)?;
    gzip_decompress(&data)
}

/// Write `data` to `path` as a single-member gzip file named after the path.
pub fn gzip_write<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut header = MemberHeader::default().with_modification_time(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs() as u32),
    );
    if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
        header = header.with_name(stem);
    }

    let file = BufWriter::new(File::create(path)?);
    let mut writer = GzipWriter::new(file, &header, Compression::default())?;
    writer.write_data(data)?;
    writer
        .finish()?
        .into_inner()
        .map_err(|err| Error::Io(err.into_error()))?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    // "hello\n" stored as hello.txt, OS byte 3 (Unix).
    const HELLO_GZ: [u8; 36] = [
        0x1f, 0x8b, 0x08, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x68, 0x65, 0x6c, 0x6c, 0x6f,
        0x2e, 0x74, 0x78, 0x74, 0x00, 0xcb, 0x48, 0xcd, 0xc9, 0xc9, 0xe7, 0x02, 0x00, 0x20, 0x30,
        0x3a, 0x36, 0x06, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn decompress_reference_member() -> Result<()> {
        let mut reader = GzipReader::new(&HELLO_GZ);
        let (header, output) = reader.read_member()?;
        assert_eq!(output, b"hello\n");
        assert_eq!(header.name.as_deref(), Some(&b"hello.txt"[..]));
        assert_eq!(header.os, 3);
        assert!(reader.is_empty());
        Ok(())
    }

    #[test]
    fn header_round_trip() -> Result<()> {
        let header = MemberHeader::default()
            .with_name("notes.txt")
            .with_comment("written by tests")
            .with_extra(vec![b'A', b'P', 2, 0, 1, 2])
            .with_modification_time(1_600_000_000)
            .with_os(3)
            .with_text(true)
            .with_header_crc(true);

        let bytes = header.to_bytes()?;
        let mut input = &bytes[..];
        let parsed = MemberHeader::parse(&mut input)?;
        assert!(input.is_empty());
        assert_eq!(parsed, header);
        Ok(())
    }

    #[test]
    fn header_crc_mismatch() -> Result<()> {
        let mut bytes = MemberHeader::default()
            .with_name("x")
            .with_header_crc(true)
            .to_bytes()?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = MemberHeader::parse(&mut &bytes[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        Ok(())
    }

    #[test]
    fn rejects_bad_headers() {
        let kind = |bytes: &[u8]| gzip_decompress(bytes).unwrap_err().kind();

        let mut bad_magic = HELLO_GZ;
        bad_magic[1] = 0x8c;
        assert_eq!(kind(&bad_magic), ErrorKind::MalformedHeader);

        let mut bad_method = HELLO_GZ;
        bad_method[2] = 7;
        assert_eq!(kind(&bad_method), ErrorKind::MalformedHeader);

        let mut reserved = HELLO_GZ;
        reserved[3] |= 0x80;
        assert_eq!(kind(&reserved), ErrorKind::MalformedHeader);

        assert_eq!(kind(&HELLO_GZ[..14]), ErrorKind::TruncatedInput);
        assert_eq!(kind(&[]), ErrorKind::TruncatedInput);
    }

    #[test]
    fn footer_checks() {
        let mut bad_crc = HELLO_GZ;
        bad_crc[28] ^= 0x01;
        assert_eq!(
            gzip_decompress(&bad_crc).unwrap_err().kind(),
            ErrorKind::ChecksumMismatch
        );

        let mut bad_size = HELLO_GZ;
        bad_size[32] = 7;
        assert_eq!(
            gzip_decompress(&bad_size).unwrap_err().kind(),
            ErrorKind::SizeMismatch
        );

        assert!(matches!(
            gzip_decompress(&HELLO_GZ[..33]).unwrap_err(),
            Error::TruncatedInput {
                needed: 64,
                available: 40
            }
        ));
    }

    #[test]
    fn reference_member_with_optional_fields() -> Result<()> {
        // FEXTRA, FNAME and FHCRC set, header CRC from zlib.crc32.
        let data = [
            0x1f, 0x8b, 0x08, 0x0e, 0x00, 0xf1, 0x53, 0x65, 0x00, 0x03, 0x08, 0x00, 0x52, 0x46,
            0x04, 0x00, 0x01, 0x02, 0x03, 0x04, 0x78, 0x2e, 0x74, 0x78, 0x74, 0x00, 0x40, 0xed,
            0x4b, 0xad, 0x28, 0x29, 0x4a, 0x54, 0x48, 0xcb, 0x4c, 0xcd, 0x49, 0x29, 0xe6, 0x02,
            0x00, 0xbc, 0x6c, 0x61, 0x7c, 0x0d, 0x00, 0x00, 0x00,
        ];

        let mut reader = GzipReader::new(&data);
        let (header, output) = reader.read_member()?;
        assert_eq!(output, b"extra fields\n");
        assert!(reader.is_empty());
        assert_eq!(reader.offset(), data.len());

        assert_eq!(header.modification_time, 1_700_000_000);
        assert_eq!(header.os, 3);
        assert_eq!(
            header.extra.as_deref(),
            Some(&[b'R', b'F', 4, 0, 1, 2, 3, 4][..])
        );
        assert_eq!(header.name.as_deref(), Some(&b"x.txt"[..]));
        assert!(header.has_crc);
        assert_eq!(header.comment, None);

        // The same fields serialise back to the same bytes.
        assert_eq!(header.to_bytes()?, &data[..28]);

        let mut bad_crc = data;
        bad_crc[26] ^= 0x01;
        assert_eq!(
            gzip_decompress(&bad_crc).unwrap_err().kind(),
            ErrorKind::ChecksumMismatch
        );
        Ok(())
    }

    #[test]
    fn many_small_members() -> Result<()> {
        let member = gzip_compress(b"x", &MemberHeader::default(), Compression::default())?;
        let data = member.repeat(5000);

        let mut reader = GzipReader::new(&data);
        for i in 1..=3 {
            let (_, output) = reader.read_member()?;
            assert_eq!(output, b"x");
            assert_eq!(reader.offset(), i * member.len());
        }
        assert_eq!(gzip_decompress(&data)?, vec![b'x'; 5000]);
        Ok(())
    }

    #[test]
    fn multiple_members() -> Result<()> {
        let mut data = gzip_compress(b"first ", &MemberHeader::default(), Compression::fast())?;
        data.extend(gzip_compress(
            b"second",
            &MemberHeader::default().with_name("b"),
            Compression::none(),
        )?);
        data.extend_from_slice(&HELLO_GZ);
        assert_eq!(gzip_decompress(&data)?, b"first secondhello\n");
        Ok(())
    }

    #[test]
    fn extra_flags_follow_level() -> Result<()> {
        let best = gzip_compress(b"abc", &MemberHeader::default(), Compression::best())?;
        assert_eq!(best[8], XFL_BEST);
        let fast = gzip_compress(b"abc", &MemberHeader::default(), Compression::fast())?;
        assert_eq!(fast[8], XFL_FASTEST);
        assert_eq!(fast[9], OS_UNKNOWN);
        Ok(())
    }

    #[test]
    fn file_round_trip() -> Result<()> {
        let path = std::env::temp_dir().join(format!("ripflate-gzip-{}.txt.gz", std::process::id()));
        let data: Vec<u8> = b"line of text\n".iter().copied().cycle().take(10_000).collect();

        gzip_write(&path, &data)?;
        let read_back = gzip_read(&path);
        let raw = std::fs::read(&path)?;
        std::fs::remove_file(&path)?;

        assert_eq!(read_back?, data);
        let header = MemberHeader::parse(&mut &raw[..])?;
        assert_eq!(
            header.name.as_deref(),
            Some(format!("ripflate-gzip-{}.txt", std::process::id()).as_bytes())
        );
        Ok(())
    }
}
