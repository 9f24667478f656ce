use super::{BencodeResult, BencodeValue};
use std::io::Write;

/// Encodes a [`BencodeValue`] to any `Write` sink. Dictionary keys are
/// always emitted in ascending lexical order (guaranteed by `BTreeMap`'s
/// iteration order).
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(items) => {
            writer.write_all(b"l")?;
            for item in items {
                encode(writer, item)?;
            }
            writer.write_all(b"e")?;
            Ok(())
        }
        BencodeValue::Dict(dict) => {
            writer.write_all(b"d")?;
            for (key, val) in dict {
                encode_string(writer, key)?;
                encode(writer, val)?;
            }
            writer.write_all(b"e")?;
            Ok(())
        }
    }
}

pub fn encode_to_vec(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, value)?;
    Ok(buf)
}

fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{i}e")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn encodes_bool_like_integers() {
        assert_eq!(
            encode_to_vec(&BencodeValue::Integer(1)).unwrap(),
            b"i1e".to_vec()
        );
        assert_eq!(
            encode_to_vec(&BencodeValue::Integer(0)).unwrap(),
            b"i0e".to_vec()
        );
    }

    #[test]
    fn dict_keys_are_sorted() {
        let value = decode(b"d3:zoo1:z3:bar1:b3:foo1:fe").unwrap();
        let bytes = encode_to_vec(&value).unwrap();
        assert_eq!(bytes, b"d3:bar1:b3:foo1:f3:zoo1:ze".to_vec());
    }
}
