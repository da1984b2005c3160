#![forbid(unsafe_code)]

use crate::error::{Error, Result};

////////////////////////////////////////////////////////////////////////////////

/// Decoded output. Everything written so far is the back-reference window.
#[derive(Debug, Default)]
pub struct OutputWindow {
    buffer: Vec<u8>,
}

impl OutputWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Write a sequence of `len` bytes written `dist` bytes ago.
    ///
    /// Bytes are copied one at a time so that a copy overlapping its own
    /// output repeats the pattern.
    pub fn write_previous(&mut self, dist: usize, len: usize) -> Result<()> {
        if dist == 0 || dist > self.buffer.len() {
            return Err(Error::InvalidBackReference {
                distance: dist,
                available: self.buffer.len(),
            });
        }

        self.buffer.reserve(len);
        let mut from = self.buffer.len() - dist;
        for _ in 0..len {
            let byte = self.buffer[from];
            self.buffer.push(byte);
            from += 1;
        }
        Ok(())
    }

    pub fn byte_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn write() {
        let mut window = OutputWindow::default();
        window.extend(&[1, 2, 3, 4]);
        assert_eq!(window.byte_count(), 4);

        window.push(5);
        assert_eq!(window.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn write_previous() -> Result<()> {
        let mut window = OutputWindow::with_capacity(512);
        for i in 0..=255 {
            window.push(i);
        }

        window.write_previous(192, 128)?;
        assert_eq!(window.byte_count(), 384);
        assert_eq!(window.as_slice()[256], 64);
        assert_eq!(window.as_slice()[383], 191);

        let err = window.write_previous(10000, 20).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidBackReference);
        assert_eq!(window.byte_count(), 384);

        assert!(window.write_previous(0, 1).is_err());

        window.write_previous(384, 1)?;
        assert_eq!(window.as_slice()[384], 0);
        Ok(())
    }

    #[test]
    fn overlapping_copy_repeats() -> Result<()> {
        let mut window = OutputWindow::default();
        window.extend(b"ab");
        window.write_previous(2, 7)?;
        assert_eq!(window.into_inner(), b"ababababa".to_vec());

        let mut window = OutputWindow::default();
        window.push(b'z');
        window.write_previous(1, 4)?;
        assert_eq!(window.as_slice(), b"zzzzz");
        Ok(())
    }
}
