use std::collections::BTreeMap;

/// A decoded bencode value. Dictionaries use a `BTreeMap` so iteration is
/// always in ascending key order, which is what the encoder requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn dict_get(&self, key: &str) -> Option<&BencodeValue> {
        self.as_dict()?.get(key.as_bytes())
    }

    pub fn dict_get_str(&self, key: &str) -> Option<String> {
        self.dict_get(key)
            .and_then(BencodeValue::as_str_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn dict_get_int(&self, key: &str) -> Option<i64> {
        self.dict_get(key).and_then(BencodeValue::as_integer)
    }

    pub fn string(s: impl Into<Vec<u8>>) -> Self {
        BencodeValue::String(s.into())
    }

    pub fn dict(pairs: impl IntoIterator<Item = (Vec<u8>, BencodeValue)>) -> Self {
        BencodeValue::Dict(pairs.into_iter().collect())
    }
}
