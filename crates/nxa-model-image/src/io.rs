use std::io::{self, Read, Write};

use crate::error::{ImageError, Result};

/// Model images are decoded from fixed-length sections, so a short read is a
/// format error (the stream ended inside a section), not a transport error.
fn eof_to_truncated(err: io::Error) -> ImageError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ImageError::Truncated
    } else {
        ImageError::Io(err)
    }
}

pub trait WriteLeExt: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_u16_le(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_f32_le(&mut self, v: f32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    fn write_string_u32(&mut self, s: &str) -> Result<()> {
        let len: u32 = s
            .len()
            .try_into()
            .map_err(|_| ImageError::Corrupt("string length does not fit in u32"))?;
        self.write_u32_le(len)?;
        self.write_bytes(s.as_bytes())?;
        Ok(())
    }
}

impl<T: Write + ?Sized> WriteLeExt for T {}

pub trait ReadLeExt: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf).map_err(eof_to_truncated)?;
        Ok(buf[0])
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf).map_err(eof_to_truncated)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).map_err(eof_to_truncated)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf).map_err(eof_to_truncated)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_f32_le(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf).map_err(eof_to_truncated)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_bytes_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf).map_err(eof_to_truncated)
    }

    fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| ImageError::OutOfMemory { len })?;
        buf.resize(len, 0);
        self.read_exact(&mut buf).map_err(eof_to_truncated)?;
        Ok(buf)
    }

    /// Length-prefixed UTF-8 string. `max_len` bounds the decoded byte length
    /// so a corrupted prefix cannot force a pathological allocation.
    fn read_string_u32(&mut self, max_len: usize) -> Result<String> {
        let len = self.read_u32_le()? as usize;
        if len > max_len {
            return Err(ImageError::Corrupt("string too long"));
        }
        let bytes = self.read_exact_vec(len)?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl<T: Read + ?Sized> ReadLeExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_exact_vec_allocation_failure_returns_error() {
        let mut cursor = Cursor::new(Vec::new());
        let err = cursor.read_exact_vec(usize::MAX).unwrap_err();
        assert!(matches!(err, ImageError::OutOfMemory { .. }));
    }

    #[test]
    fn short_reads_surface_as_truncated() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        let err = cursor.read_u64_le().unwrap_err();
        assert!(matches!(err, ImageError::Truncated));
    }

    #[test]
    fn string_round_trips_and_is_bounded() {
        let mut buf = Vec::new();
        buf.write_string_u32("state_in").unwrap();

        let mut cursor = Cursor::new(buf.clone());
        assert_eq!(cursor.read_string_u32(1024).unwrap(), "state_in");

        let mut cursor = Cursor::new(buf);
        let err = cursor.read_string_u32(4).unwrap_err();
        assert!(matches!(err, ImageError::Corrupt("string too long")));
    }
}
