//! .torrent parsing: info-hash computation, announce tiers, file list.
mod hash;
mod info;

pub use hash::InfoHash;
pub use info::{truncate_name, FileEntry, Info};

use crate::bencode::{self, BencodeValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode error: {0}")]
    Bencode(#[from] bencode::BencodeError),

    #[error("invalid torrent format: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid piece data")]
    InvalidPieceData,

    #[error("torrent has zero piece length")]
    ZeroPieceLength,

    #[error("torrent has zero pieces")]
    ZeroPieces,

    #[error("duplicate filename: {0}")]
    DuplicateFilename(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}

/// A parsed .torrent file.
#[derive(Debug, Clone)]
pub struct MetaInfo {
    pub info: Info,
    /// BEP-12 tiers; falls back to a single-entry tier built from `announce`.
    pub announce_list: Vec<Vec<String>>,
    /// BEP-19 webseed URLs (parsed, not used by the core).
    pub url_list: Vec<String>,
}

impl MetaInfo {
    /// Parses a .torrent file from its raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, MetainfoError> {
        let root = bencode::decode(data)?;
        let dict = root
            .as_dict()
            .ok_or_else(|| MetainfoError::InvalidFormat("root is not a dictionary".into()))?;

        let info_value = dict
            .get(b"info".as_slice())
            .ok_or(MetainfoError::MissingField("info"))?;
        // Sliced from the original bytes, not re-encoded: the hash must
        // cover exactly what the file contained, independent of whether
        // our own encoder is canonical.
        let (start, end) = locate_info_span(data)?;
        let raw_info_bytes = &data[start..end];
        let info = info::parse_info(raw_info_bytes, info_value)?;

        let announce_list = parse_announce_list(&root);
        let url_list = parse_url_list(&root);

        Ok(MetaInfo {
            info,
            announce_list,
            url_list,
        })
    }

    pub fn total_length(&self) -> i64 {
        self.info.length
    }
}

/// Walks the top-level dict's raw bytes to find the exact `(start, end)`
/// byte range of the `info` value, without re-encoding anything.
fn locate_info_span(data: &[u8]) -> Result<(usize, usize), MetainfoError> {
    if data.first() != Some(&b'd') {
        return Err(MetainfoError::InvalidFormat("root is not a dictionary".into()));
    }
    let mut pos = 1;
    while data.get(pos) != Some(&b'e') {
        let (key, key_len) = bencode::decode_prefix(&data[pos..])?;
        let key_bytes = key
            .as_str_bytes()
            .ok_or_else(|| MetainfoError::InvalidFormat("dict key is not a string".into()))?
            .to_vec();
        pos += key_len;

        let (_value, value_len) = bencode::decode_prefix(&data[pos..])?;
        if key_bytes == b"info" {
            return Ok((pos, pos + value_len));
        }
        pos += value_len;
    }
    Err(MetainfoError::MissingField("info"))
}

fn parse_announce_list(root: &BencodeValue) -> Vec<Vec<String>> {
    if let Some(tiers) = root.dict_get("announce-list").and_then(BencodeValue::as_list) {
        let mut result = Vec::new();
        for tier in tiers {
            if let Some(entries) = tier.as_list() {
                let filtered: Vec<String> = entries
                    .iter()
                    .filter_map(BencodeValue::as_str_bytes)
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .filter(|url| is_supported_tracker_scheme(url))
                    .collect();
                if !filtered.is_empty() {
                    result.push(filtered);
                }
            }
        }
        if !result.is_empty() {
            return result;
        }
    }

    if let Some(announce) = root.dict_get_str("announce") {
        if is_supported_tracker_scheme(&announce) {
            return vec![vec![announce]];
        }
    }
    Vec::new()
}

fn parse_url_list(root: &BencodeValue) -> Vec<String> {
    match root.dict_get("url-list") {
        Some(BencodeValue::List(items)) => items
            .iter()
            .filter_map(BencodeValue::as_str_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .filter(|url| is_supported_webseed_scheme(url))
            .collect(),
        Some(BencodeValue::String(_)) => root
            .dict_get_str("url-list")
            .filter(|url| is_supported_webseed_scheme(url))
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

fn is_supported_tracker_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("udp://")
}

fn is_supported_webseed_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_fixture(announce_list: &str, piece_length: i64) -> Vec<u8> {
        let info = format!(
            "d6:lengthi10e4:name5:fixed12:piece lengthi{piece_length}e6:pieces20:00000000000000000000e"
        );
        format!(
            "d8:announce20:https://example.com/13:announce-list{announce_list}4:info{info}e"
        )
        .into_bytes()
    }

    #[test]
    fn rejects_dotdot_path() {
        let data = b"d4:infod5:filesld6:lengthi1e4:pathl2:..eee4:name1:x12:piece lengthi1e6:pieces20:00000000000000000000ee";
        let err = MetaInfo::parse(data);
        assert!(err.is_err());
    }

    #[test]
    fn announce_list_filters_unsupported_schemes() {
        let data = build_fixture("ll20:https://example.com/ee", 10);
        let mi = MetaInfo::parse(&data).unwrap();
        assert_eq!(mi.announce_list, vec![vec!["https://example.com/".to_string()]]);
    }

    #[test]
    fn info_span_is_the_literal_info_dict_bytes() {
        let info = b"d6:lengthi10e4:name5:fixed12:piece lengthi10e6:pieces20:00000000000000000000e";
        let data = [
            b"d8:announce20:https://example.com/4:info".as_slice(),
            info.as_slice(),
            b"e".as_slice(),
        ]
        .concat();
        let (start, end) = locate_info_span(&data).unwrap();
        assert_eq!(&data[start..end], info.as_slice());
    }
}
