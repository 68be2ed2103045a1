//! Binary encoding for persisted cache entries.
//!
//! Fields are written back to back: integers big-endian, strings and byte
//! strings prefixed with a `u32` length, object ids as 20 raw bytes.
//! Decoding is strict; trailing or missing bytes are errors.

use revu_git::Oid;

use crate::error::{Error, Result};

const OID_LEN: usize = 20;

/// A type that can be stored in a [`PersistentCache`](super::PersistentCache).
pub trait CacheCodec: Sized {
    /// Append the encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);

    /// Decode one value from `reader`.
    ///
    /// # Errors
    /// Returns `CacheCodec` if the input is truncated or malformed.
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;
}

/// Cursor over an encoded buffer.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::CacheCodec(format!(
                    "truncated input: need {n} bytes at offset {}",
                    self.pos
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// # Errors
    /// Returns error on truncated input.
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// # Errors
    /// Returns error on truncated input.
    pub fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    /// # Errors
    /// Returns error on truncated input.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// # Errors
    /// Returns error on truncated or non-UTF-8 input.
    pub fn string(&mut self) -> Result<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|e| Error::CacheCodec(e.to_string()))
    }

    /// # Errors
    /// Returns error on truncated input.
    pub fn oid(&mut self) -> Result<Oid> {
        let raw = self.take(OID_LEN)?;
        Oid::from_bytes(raw).map_err(|e| Error::CacheCodec(e.to_string()))
    }

    /// Fail unless every byte was consumed.
    ///
    /// # Errors
    /// Returns error if bytes remain.
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::CacheCodec(format!(
                "{} trailing bytes",
                self.buf.len() - self.pos
            )))
        }
    }
}

pub fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_bytes(out: &mut Vec<u8>, v: &[u8]) {
    put_u32(out, u32::try_from(v.len()).unwrap_or(u32::MAX));
    out.extend_from_slice(v);
}

pub fn put_str(out: &mut Vec<u8>, v: &str) {
    put_bytes(out, v.as_bytes());
}

pub fn put_oid(out: &mut Vec<u8>, v: Oid) {
    out.extend_from_slice(v.as_bytes());
}

impl CacheCodec for bool {
    fn encode(&self, out: &mut Vec<u8>) {
        put_u8(out, u8::from(*self));
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::CacheCodec(format!("invalid bool tag {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_truncated_input() {
        let mut out = Vec::new();
        put_str(&mut out, "recursive");
        out.truncate(out.len() - 1);
        let mut reader = Reader::new(&out);
        assert!(reader.string().is_err());
    }

    #[test]
    fn test_trailing_bytes() {
        let mut out = Vec::new();
        true.encode(&mut out);
        out.push(0);
        let mut reader = Reader::new(&out);
        assert!(bool::decode(&mut reader).unwrap());
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_invalid_bool() {
        let mut reader = Reader::new(&[2]);
        assert!(bool::decode(&mut reader).is_err());
    }

    proptest! {
        #[test]
        fn prop_fields_decode_in_order(
            s in ".*",
            raw in prop::array::uniform20(any::<u8>()),
            n: u32,
        ) {
            let oid = Oid::from_bytes(&raw).unwrap();
            let mut out = Vec::new();
            put_str(&mut out, &s);
            put_oid(&mut out, oid);
            put_u32(&mut out, n);

            let mut reader = Reader::new(&out);
            prop_assert_eq!(reader.string().unwrap(), s);
            prop_assert_eq!(reader.oid().unwrap(), oid);
            prop_assert_eq!(reader.u32().unwrap(), n);
            prop_assert!(reader.finish().is_ok());
        }

        #[test]
        fn prop_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let mut reader = Reader::new(&bytes);
            let _ = reader.string();
            let _ = reader.oid();
            let _ = bool::decode(&mut reader);
        }
    }
}
