//! Variable-length primitives: var-int, var-str, var-int list.
//!
//! A var-int is one byte for values below 0xFD; otherwise a tag byte
//! (0xFD, 0xFE, 0xFF) followed by a big-endian u16, u32 or u64.
//!
//! Decoding goes through [`Reader`], a bounds-checked cursor. Every read that
//! would run past the end returns `MalformedInput` instead of panicking.

use bytes::BufMut;

use crate::{ProtocolError, Result};

const TAG_U16: u8 = 0xFD;
const TAG_U32: u8 = 0xFE;
const TAG_U64: u8 = 0xFF;

/// Append a var-int to `out`.
pub fn put_var_int(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xFC => out.put_u8(value as u8),
        0xFD..=0xFFFF => {
            out.put_u8(TAG_U16);
            out.put_u16(value as u16);
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.put_u8(TAG_U32);
            out.put_u32(value as u32);
        }
        _ => {
            out.put_u8(TAG_U64);
            out.put_u64(value);
        }
    }
}

/// Encode a var-int.
pub fn encode_var_int(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    put_var_int(&mut out, value);
    out
}

/// Decode a var-int, returning the value and the bytes consumed.
pub fn decode_var_int(data: &[u8]) -> Result<(u64, usize)> {
    let mut r = Reader::new(data);
    let value = r.var_int()?;
    Ok((value, r.position()))
}

/// Append a var-str (var-int length + raw bytes).
pub fn put_var_str(out: &mut Vec<u8>, s: &str) {
    put_var_bytes(out, s.as_bytes());
}

/// Append length-prefixed bytes.
pub fn put_var_bytes(out: &mut Vec<u8>, data: &[u8]) {
    put_var_int(out, data.len() as u64);
    out.extend_from_slice(data);
}

pub fn encode_var_str(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 9);
    put_var_str(&mut out, s);
    out
}

pub fn decode_var_str(data: &[u8]) -> Result<(String, usize)> {
    let mut r = Reader::new(data);
    let s = r.var_str()?;
    Ok((s, r.position()))
}

/// Append a var-int list (var-int count + that many var-ints).
pub fn put_int_list(out: &mut Vec<u8>, values: &[u64]) {
    put_var_int(out, values.len() as u64);
    for v in values {
        put_var_int(out, *v);
    }
}

pub fn encode_int_list(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    put_int_list(&mut out, values);
    out
}

pub fn decode_int_list(data: &[u8]) -> Result<(Vec<u64>, usize)> {
    let mut r = Reader::new(data);
    let list = r.int_list()?;
    Ok((list, r.position()))
}

/// Bounds-checked read cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Everything read so far.
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.pos]
    }

    /// Take exactly `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ProtocolError::MalformedInput(format!(
                "need {n} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Take the rest of the input.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn var_int(&mut self) -> Result<u64> {
        match self.u8()? {
            TAG_U16 => Ok(self.u16()? as u64),
            TAG_U32 => Ok(self.u32()? as u64),
            TAG_U64 => self.u64(),
            small => Ok(small as u64),
        }
    }

    /// Var-int length followed by that many bytes.
    pub fn var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.var_int()?;
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::MalformedInput(format!("length {len} out of range")))?;
        self.bytes(len)
    }

    pub fn var_str(&mut self) -> Result<String> {
        let raw = self.var_bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| ProtocolError::MalformedInput(format!("var-str not utf-8: {e}")))
    }

    pub fn int_list(&mut self) -> Result<Vec<u64>> {
        let count = self.var_int()?;
        // Every entry takes at least one byte.
        if count > self.remaining() as u64 {
            return Err(ProtocolError::MalformedInput(format!(
                "list of {count} entries, only {} bytes left",
                self.remaining()
            )));
        }
        (0..count).map(|_| self.var_int()).collect()
    }

    /// Check that `count` records of `size` bytes fit in what is left.
    pub fn ensure_records(&self, count: u64, size: usize) -> Result<usize> {
        let needed = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(size))
            .filter(|n| *n <= self.remaining());
        match needed {
            Some(_) => Ok(count as usize),
            None => Err(ProtocolError::MalformedInput(format!(
                "{count} records of {size} bytes, only {} bytes left",
                self.remaining()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_var_int_boundaries() {
        assert_eq!(encode_var_int(0), vec![0x00]);
        assert_eq!(encode_var_int(0xFC), vec![0xFC]);
        assert_eq!(encode_var_int(0xFD), vec![0xFD, 0x00, 0xFD]);
        assert_eq!(encode_var_int(0xFFFF), vec![0xFD, 0xFF, 0xFF]);
        assert_eq!(encode_var_int(0x1_0000), vec![0xFE, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(encode_var_int(0x1_0000_0000).len(), 9);
        assert_eq!(encode_var_int(0x1_0000_0000)[0], 0xFF);
    }

    #[test]
    fn test_var_int_trailing_bytes_ignored() {
        let (v, used) = decode_var_int(&[0xFD, 0x01, 0x00, 0xAA, 0xBB]).unwrap();
        assert_eq!(v, 0x100);
        assert_eq!(used, 3);
    }

    #[test]
    fn test_var_int_truncated() {
        for data in [&[][..], &[0xFD, 0x01][..], &[0xFE, 0, 0, 0][..], &[0xFF; 8][..]] {
            assert!(matches!(
                decode_var_int(data),
                Err(ProtocolError::MalformedInput(_))
            ));
        }
    }

    #[test]
    fn test_var_str_short_data_is_error() {
        // Declares 10 bytes, has 3.
        let err = decode_var_str(&[10, b'a', b'b', b'c']).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedInput(_)));
    }

    #[test]
    fn test_var_str_rejects_invalid_utf8() {
        assert!(decode_var_str(&[2, 0xC3, 0x28]).is_err());
    }

    #[test]
    fn test_int_list_absurd_count_rejected() {
        // Count of 2^32 with no entries must fail without allocating.
        let data = [0xFE, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(decode_int_list(&data).is_err());
    }

    #[test]
    fn test_ensure_records_overflow() {
        let r = Reader::new(&[0u8; 10]);
        assert!(r.ensure_records(u64::MAX, 38).is_err());
        assert_eq!(r.ensure_records(1, 10).unwrap(), 1);
        assert!(r.ensure_records(1, 11).is_err());
    }

    #[test]
    fn test_reader_consumed_and_rest() {
        let data = [1u8, 2, 3, 4, 5];
        let mut r = Reader::new(&data);
        r.bytes(2).unwrap();
        assert_eq!(r.consumed(), &[1, 2]);
        assert_eq!(r.rest(), &[3, 4, 5]);
        assert_eq!(r.remaining(), 0);
    }

    proptest! {
        #[test]
        fn prop_var_int_roundtrip(v in any::<u64>()) {
            let enc = encode_var_int(v);
            let (dec, used) = decode_var_int(&enc).unwrap();
            prop_assert_eq!(dec, v);
            prop_assert_eq!(used, enc.len());
        }

        #[test]
        fn prop_var_str_roundtrip(s in ".{0,300}") {
            let enc = encode_var_str(&s);
            let (dec, used) = decode_var_str(&enc).unwrap();
            prop_assert_eq!(dec, s);
            prop_assert_eq!(used, enc.len());
        }

        #[test]
        fn prop_int_list_roundtrip(values in proptest::collection::vec(any::<u64>(), 0..64)) {
            let enc = encode_int_list(&values);
            let (dec, used) = decode_int_list(&enc).unwrap();
            prop_assert_eq!(dec, values);
            prop_assert_eq!(used, enc.len());
        }
    }
}
