//! Serialize values into the publish stream wire format.
use bytes::{BufMut, Bytes};

use crate::error::{Error, Result};

pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for bool {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self as i8);
        Ok(())
    }
}

impl ToByte for u8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u8(*self);
        Ok(())
    }
}

impl ToByte for i32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(*self);
        Ok(())
    }
}

impl ToByte for i64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i64(*self);
        Ok(())
    }
}

/// Strings carry a 16-bit length prefix.
impl ToByte for str {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        if self.len() > i16::MAX as usize {
            return Err(Error::Encoding(format!(
                "string of {} bytes exceeds {} byte limit",
                self.len(),
                i16::MAX
            )));
        }
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToByte for String {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

/// Byte blobs carry a 32-bit length prefix.
impl ToByte for [u8] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        if self.len() > i32::MAX as usize {
            return Err(Error::Encoding(format!(
                "blob of {} bytes exceeds {} byte limit",
                self.len(),
                i32::MAX
            )));
        }
        buffer.put_i32(self.len() as i32);
        buffer.put(self);
        Ok(())
    }
}

impl ToByte for Bytes {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.as_ref().encode(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_bool() {
        let mut buf = Vec::new();
        true.encode(&mut buf).unwrap();
        false.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 0]);
    }

    #[test]
    fn test_encode_i32() {
        let mut buf = Vec::new();
        (0x12345678i32).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_encode_i64() {
        let mut buf = Vec::new();
        (0x123456789ABCDEF0i64).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
    }

    #[test]
    fn test_encode_str() {
        let mut buf = Vec::new();
        "hi".encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_str_too_long() {
        let long = "x".repeat(i16::MAX as usize + 1);
        let mut buf = Vec::new();
        assert!(matches!(long.encode(&mut buf), Err(Error::Encoding(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_bytes() {
        let mut buf = Vec::new();
        Bytes::from(vec![1, 2, 3]).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_encode_empty_bytes() {
        let mut buf = Vec::new();
        Bytes::new().encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);
    }
}
