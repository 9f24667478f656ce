use super::{BencodeError, BencodeResult, BencodeValue, MAX_STRING_LEN};
use std::collections::BTreeMap;

/// Decodes bencode values from an in-memory byte slice, tracking a running
/// offset so errors can point at the exact byte that failed to parse.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek(&self) -> BencodeResult<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof { offset: self.pos })
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn syntax(&self, message: impl Into<String>) -> BencodeError {
        BencodeError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    /// Reads ASCII bytes until (and consuming) `delimiter`.
    fn read_until(&mut self, delimiter: u8) -> BencodeResult<&'a [u8]> {
        let start = self.pos;
        loop {
            let b = self.peek()?;
            if b == delimiter {
                let slice = &self.buf[start..self.pos];
                self.advance(1);
                return Ok(slice);
            }
            self.advance(1);
        }
    }

    pub fn decode_value(&mut self) -> BencodeResult<BencodeValue> {
        match self.peek()? {
            b'0'..=b'9' => self.decode_string().map(BencodeValue::String),
            b'i' => self.decode_integer().map(BencodeValue::Integer),
            b'l' => self.decode_list().map(BencodeValue::List),
            b'd' => self.decode_dict().map(BencodeValue::Dict),
            other => Err(self.syntax(format!("unexpected character '{}'", other as char))),
        }
    }

    fn decode_string(&mut self) -> BencodeResult<Vec<u8>> {
        let digits = self.read_until(b':')?;
        if digits.is_empty() {
            return Err(self.syntax("empty string length"));
        }
        if digits[0] == b'0' && digits.len() > 1 {
            return Err(self.syntax("string length has a leading zero"));
        }
        let len_str = std::str::from_utf8(digits)
            .map_err(|_| self.syntax("non-ASCII string length"))?;
        let len: usize = len_str
            .parse()
            .map_err(|_| self.syntax("invalid string length"))?;
        if len > MAX_STRING_LEN {
            return Err(BencodeError::StringTooLong {
                len,
                max: MAX_STRING_LEN,
            });
        }
        if self.remaining() < len {
            return Err(BencodeError::UnexpectedEof { offset: self.pos });
        }
        let bytes = self.buf[self.pos..self.pos + len].to_vec();
        self.advance(len);
        Ok(bytes)
    }

    fn decode_integer(&mut self) -> BencodeResult<i64> {
        self.advance(1); // 'i'
        let digits = self.read_until(b'e')?;
        let s = std::str::from_utf8(digits).map_err(|_| self.syntax("non-ASCII integer"))?;
        if s.is_empty() {
            return Err(self.syntax("empty integer"));
        }
        if s == "-0" {
            return Err(self.syntax("negative zero is not a valid integer"));
        }
        let unsigned = s.strip_prefix('-').unwrap_or(s);
        if unsigned.is_empty() || (unsigned.len() > 1 && unsigned.starts_with('0')) {
            return Err(self.syntax("integer has a leading zero"));
        }
        s.parse::<i64>()
            .map_err(|_| self.syntax("integer does not fit in i64"))
    }

    fn decode_list(&mut self) -> BencodeResult<Vec<BencodeValue>> {
        self.advance(1); // 'l'
        let mut items = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(items);
            }
            items.push(self.decode_value()?);
        }
    }

    fn decode_dict(&mut self) -> BencodeResult<BTreeMap<Vec<u8>, BencodeValue>> {
        self.advance(1); // 'd'
        let mut dict = BTreeMap::new();
        let mut previous_key: Option<Vec<u8>> = None;
        loop {
            if self.peek()? == b'e' {
                self.advance(1);
                return Ok(dict);
            }
            let key_offset = self.pos;
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::DictKeyNotString { offset: key_offset });
            }
            let key = self.decode_string()?;
            if let Some(prev) = &previous_key {
                if key <= *prev {
                    return Err(BencodeError::DictKeyOrder {
                        offset: key_offset,
                        previous: prev.clone(),
                        found: key,
                    });
                }
            }
            let value = self.decode_value()?;
            previous_key = Some(key.clone());
            dict.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn decodes_integer() {
        assert_eq!(decode(b"i42e").unwrap(), BencodeValue::Integer(42));
        assert_eq!(decode(b"i-1e").unwrap(), BencodeValue::Integer(-1));
        assert_eq!(decode(b"i0e").unwrap(), BencodeValue::Integer(0));
    }

    #[test]
    fn rejects_leading_zero() {
        assert!(decode(b"i01e").is_err());
        assert!(decode(b"i-0e").is_err());
    }

    #[test]
    fn decodes_string() {
        assert_eq!(
            decode(b"5:hello").unwrap(),
            BencodeValue::String(b"hello".to_vec())
        );
    }

    #[test]
    fn decodes_list_and_dict() {
        assert_eq!(
            decode(b"li42ei-1ee").unwrap(),
            BencodeValue::List(vec![BencodeValue::Integer(42), BencodeValue::Integer(-1)])
        );
        let d = decode(b"d3:bar4:spam3:fooi42ee").unwrap();
        assert_eq!(d.dict_get_str("bar").unwrap(), "spam");
        assert_eq!(d.dict_get_int("foo").unwrap(), 42);
    }

    #[test]
    fn rejects_unordered_keys() {
        assert!(decode(b"d3:foo3:bar3:bazi1ee").is_err());
    }

    #[test]
    fn rejects_non_string_key() {
        assert!(decode(b"di1e3:bare").is_err());
    }

    #[test]
    fn reports_offset_on_truncated_integer() {
        let err = decode(b"i12").unwrap_err();
        match err {
            BencodeError::UnexpectedEof { offset } => assert_eq!(offset, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert!(decode(b"i1ei2e").is_err());
    }

    #[test]
    fn round_trips_canonical_document() {
        let original: &[u8] = b"d3:bar4:spam3:fooi42e4:listli1ei2eee";
        let value = decode(original).unwrap();
        let encoded = super::super::encode_to_vec(&value).unwrap();
        assert_eq!(encoded, original);
    }
}
