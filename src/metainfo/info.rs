//! Parsing of the `info` dictionary: piece metadata and the file list.
use super::hash::InfoHash;
use super::MetainfoError;
use crate::bencode::BencodeValue;
use std::path::Path;

/// One entry of the normalized, ordered file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub length: i64,
    pub padding: bool,
}

/// Parsed `info` dictionary: piece layout plus the normalized file list.
#[derive(Debug, Clone)]
pub struct Info {
    pub name: String,
    pub piece_length: i64,
    pub pieces: Vec<[u8; 20]>,
    pub private: bool,
    pub files: Vec<FileEntry>,
    pub length: i64,
    pub hash: InfoHash,
}

pub fn parse_info(raw_info_bytes: &[u8], info: &BencodeValue) -> Result<Info, MetainfoError> {
    let dict = info
        .as_dict()
        .ok_or_else(|| MetainfoError::InvalidFormat("info is not a dictionary".into()))?;

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or(MetainfoError::ZeroPieceLength)?;
    if piece_length <= 0 {
        return Err(MetainfoError::ZeroPieceLength);
    }

    let pieces_bytes = dict
        .get(b"pieces".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| MetainfoError::MissingField("pieces"))?;
    if pieces_bytes.is_empty() || pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::InvalidPieceData);
    }
    let pieces: Vec<[u8; 20]> = pieces_bytes
        .chunks_exact(20)
        .map(|c| {
            let mut h = [0u8; 20];
            h.copy_from_slice(c);
            h
        })
        .collect();
    if pieces.is_empty() {
        return Err(MetainfoError::ZeroPieces);
    }

    let private = matches!(
        dict.get(b"private".as_slice()).and_then(BencodeValue::as_integer),
        Some(1)
    );

    let legacy_name = dict
        .get(b"name".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let utf8_name = dict.get(b"name.utf-8".as_slice()).and_then(BencodeValue::as_str_bytes);
    let mut name = match utf8_name {
        Some(b) => String::from_utf8_lossy(b).into_owned(),
        None => legacy_name,
    };

    let single_file_length = dict
        .get(b"length".as_slice())
        .and_then(BencodeValue::as_integer);

    let files_list = dict.get(b"files".as_slice()).and_then(BencodeValue::as_list);

    let (raw_entries, total_length) = match files_list {
        Some(list) => parse_multi_file_entries(list)?,
        None => {
            let length = single_file_length.ok_or(MetainfoError::MissingField("length"))?;
            (
                vec![RawFileEntry {
                    path: vec![],
                    length,
                    is_padding: false,
                }],
                length,
            )
        }
    };

    let delta = piece_length * pieces.len() as i64 - total_length;
    if !(0..piece_length).contains(&delta) {
        return Err(MetainfoError::InvalidPieceData);
    }

    if name.is_empty() {
        name = InfoHash::from_bencoded_info(raw_info_bytes).to_hex();
    }

    let files = build_file_list(&name, raw_entries, files_list.is_some())?;

    Ok(Info {
        name,
        piece_length,
        pieces,
        private,
        files,
        length: total_length,
        hash: InfoHash::from_bencoded_info(raw_info_bytes),
    })
}

struct RawFileEntry {
    path: Vec<String>,
    length: i64,
    is_padding: bool,
}

fn parse_multi_file_entries(
    list: &[BencodeValue],
) -> Result<(Vec<RawFileEntry>, i64), MetainfoError> {
    let mut entries = Vec::with_capacity(list.len());
    let mut total = 0i64;
    for item in list {
        let dict = item
            .as_dict()
            .ok_or_else(|| MetainfoError::InvalidFormat("file entry is not a dict".into()))?;
        let length = dict
            .get(b"length".as_slice())
            .and_then(BencodeValue::as_integer)
            .ok_or(MetainfoError::MissingField("length"))?;

        let legacy_path = dict.get(b"path".as_slice()).and_then(BencodeValue::as_list);
        let utf8_path = dict.get(b"path.utf-8".as_slice()).and_then(BencodeValue::as_list);
        let path_list = utf8_path.or(legacy_path).ok_or(MetainfoError::MissingField("path"))?;

        let mut path = Vec::with_capacity(path_list.len());
        for segment in path_list {
            let bytes = segment
                .as_str_bytes()
                .ok_or_else(|| MetainfoError::InvalidFormat("path segment not a string".into()))?;
            let s = String::from_utf8_lossy(bytes).into_owned();
            if s.trim() == ".." {
                return Err(MetainfoError::InvalidFilename(s));
            }
            path.push(s);
        }

        let attr = dict
            .get(b"attr".as_slice())
            .and_then(BencodeValue::as_str_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let is_padding = attr.contains('p')
            || path
                .last()
                .is_some_and(|p| p.starts_with("_____padding_file"));

        total += length;
        entries.push(RawFileEntry {
            path,
            length,
            is_padding,
        });
    }
    Ok((entries, total))
}

fn build_file_list(
    name: &str,
    entries: Vec<RawFileEntry>,
    is_multi_file: bool,
) -> Result<Vec<FileEntry>, MetainfoError> {
    use std::collections::HashSet;
    let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());
    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        let joined = if is_multi_file {
            let mut path = Path::new(&truncate_name(name)).to_path_buf();
            for segment in &entry.path {
                path.push(truncate_name(segment));
            }
            path.to_string_lossy().into_owned()
        } else {
            truncate_name(name)
        };

        if !seen.insert(joined.clone()) {
            return Err(MetainfoError::DuplicateFilename(joined));
        }

        out.push(FileEntry {
            path: joined,
            length: entry.length,
            padding: entry.is_padding,
        });
    }
    Ok(out)
}

/// Truncates a path segment to at most `max` bytes, preserving the
/// extension and never splitting a UTF-8 rune, replacing `/` with `_`.
pub fn truncate_name(s: &str) -> String {
    truncate_name_n(s, 255)
}

fn truncate_name_n(s: &str, max: usize) -> String {
    let trimmed = trim_to_byte_len(s, max);
    replace_separator(&trimmed)
}

fn trim_to_byte_len(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }

    let ext_start = s.rfind('.').filter(|&i| i > 0);
    let ext = ext_start.map(|i| &s[i..]).unwrap_or("");

    if ext.len() > max {
        return s[..floor_char_boundary(s, max)].to_string();
    }

    let stem_budget = max - ext.len();
    let stem_end = floor_char_boundary(s, stem_budget.min(ext_start.unwrap_or(s.len())));
    format!("{}{}", &s[..stem_end], ext)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn replace_separator(s: &str) -> String {
    s.chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_examples() {
        assert_eq!(truncate_name_n("foo.bar", 6), "fo.bar");
        assert_eq!(truncate_name_n("foo.bar", 4), ".bar");
        assert_eq!(truncate_name_n("foo.bar", 3), "foo");
        assert_eq!(truncate_name_n("ğğğğ", 7), "ğğğ");
    }

    #[test]
    fn replaces_path_separator() {
        assert_eq!(replace_separator("a/b"), "a_b");
    }
}
