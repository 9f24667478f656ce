//! CIDR blocklist: IPv4 range set with O(log n) membership tests.
mod range_index;

use range_index::RangeIndex;
use std::io::{BufRead, BufReader, Read};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::RwLock;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no valid CIDR rules found in input")]
    NoValidRules,
}

/// A reloadable set of blocked IPv4 CIDR ranges. Readers take a shared
/// lock; a reload replaces the live range index atomically under a writer
/// lock.
pub struct Blocklist {
    inner: RwLock<BlocklistInner>,
}

struct BlocklistInner {
    index: RangeIndex,
    count: usize,
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}

impl Blocklist {
    pub fn new() -> Self {
        Blocklist {
            inner: RwLock::new(BlocklistInner {
                index: RangeIndex::empty(),
                count: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `ip` falls in a blocked range. IPv6 addresses
    /// always return `false`.
    pub fn blocked(&self, ip: IpAddr) -> bool {
        let v4 = match ip {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => return false,
        };
        let value = u32::from(v4);
        self.inner.read().unwrap().index.contains(value)
    }

    /// Loads (or reloads) the blocklist from a line-oriented CIDR file.
    #[instrument(skip(self, reader), level = "debug")]
    pub fn load<R: Read>(&self, reader: R) -> Result<usize, BlocklistError> {
        let (ranges, count) = parse_ranges(reader)?;
        let mut guard = self.inner.write().unwrap();
        guard.index = RangeIndex::build(ranges);
        guard.count = count;
        Ok(count)
    }

    /// Alias for `load`, named for the "reload" operation in the spec.
    pub fn reload<R: Read>(&self, reader: R) -> Result<usize, BlocklistError> {
        self.load(reader)
    }
}

fn parse_ranges<R: Read>(reader: R) -> Result<(Vec<(u32, u32)>, usize), BlocklistError> {
    let mut ranges = Vec::new();
    let mut has_error = false;
    let buf = BufReader::new(reader);
    for line in buf.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_cidr(trimmed) {
            Some((first, last)) => ranges.push((first, last)),
            None => has_error = true,
        }
    }

    if ranges.is_empty() && has_error {
        return Err(BlocklistError::NoValidRules);
    }

    let count = ranges.len();
    Ok((ranges, count))
}

fn parse_cidr(s: &str) -> Option<(u32, u32)> {
    let (addr_part, prefix_part) = s.split_once('/')?;
    let addr: Ipv4Addr = addr_part.parse().ok()?;
    let prefix_len: u32 = prefix_part.parse().ok()?;
    if prefix_len > 32 {
        return None;
    }
    let base = u32::from(addr);
    let host_bits = 32 - prefix_len;
    let mask = if host_bits == 32 {
        0
    } else {
        u32::MAX << host_bits
    };
    let first = base & mask;
    let last = first | !mask;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn blocks_within_loaded_range() {
        let bl = Blocklist::new();
        let n = bl.load(Cursor::new("10.0.0.0/8\n")).unwrap();
        assert_eq!(n, 1);
        assert!(bl.blocked("10.0.0.5".parse().unwrap()));
        assert!(!bl.blocked("11.0.0.5".parse().unwrap()));
    }

    #[test]
    fn ipv6_is_never_blocked() {
        let bl = Blocklist::new();
        bl.load(Cursor::new("::/0\n")).unwrap_err();
        assert!(!bl.blocked("::1".parse().unwrap()));
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let bl = Blocklist::new();
        let n = bl
            .load(Cursor::new("# comment\n\n192.168.0.0/16\n"))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn all_invalid_lines_fails_the_load() {
        let bl = Blocklist::new();
        assert!(bl.load(Cursor::new("not-a-cidr\n")).is_err());
    }

    #[test]
    fn reload_replaces_the_tree_atomically() {
        let bl = Blocklist::new();
        bl.load(Cursor::new("10.0.0.0/8\n")).unwrap();
        assert!(bl.blocked("10.1.2.3".parse().unwrap()));
        bl.reload(Cursor::new("192.168.0.0/16\n")).unwrap();
        assert!(!bl.blocked("10.1.2.3".parse().unwrap()));
        assert!(bl.blocked("192.168.1.1".parse().unwrap()));
    }
}
