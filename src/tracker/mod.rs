//! Tracker abstraction: announce request/response types, the compact peer
//! wire format, and the HTTP/UDP client implementations behind a tiered
//! failover list (see [`tier`]).
pub mod http;
pub mod manager;
pub mod tier;
pub mod udp;

pub use manager::TrackerManager;
pub use tier::Tier;

use crate::metainfo::InfoHash;
use crate::peer::PeerAddress;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use thiserror::Error;

/// The `event` parameter of an announce. Numeric values match the UDP
/// tracker wire encoding (BEP 15): `none=0, completed=1, started=2,
/// stopped=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    None = 0,
    Completed = 1,
    Started = 2,
    Stopped = 3,
}

impl Event {
    pub fn as_http_str(self) -> Option<&'static str> {
        match self {
            Event::None => None,
            Event::Completed => Some("completed"),
            Event::Started => Some("started"),
            Event::Stopped => Some("stopped"),
        }
    }

    pub fn as_udp_code(self) -> u32 {
        self as u32
    }
}

/// A snapshot of torrent state needed to build an announce request.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    pub event: Event,
    pub key: u32,
    pub num_want: i32,
}

#[derive(Debug, Clone, Default)]
pub struct AnnounceResponse {
    pub interval: Duration,
    pub min_interval: Option<Duration>,
    pub leechers: i64,
    pub seeders: i64,
    pub peers: Vec<PeerAddress>,
    /// Count of peer entries the tracker sent that could not be parsed
    /// (misaligned compact entries, non-IPv4 dict-model peers, etc.),
    /// surfaced instead of silently dropped.
    pub dropped_peers: u32,
    pub warning_message: Option<String>,
    pub tracker_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker reported failure: {reason}")]
    FailureReason {
        reason: String,
        retry_in: Option<Duration>,
    },

    #[error("tracker returned non-200 status {status}")]
    Status {
        status: u16,
        headers: String,
        body_prefix: Vec<u8>,
    },

    #[error("could not decode tracker response")]
    Decode,

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("resolver error: {0}")]
    Resolver(#[from] crate::resolver::ResolverError),

    #[error("UDP transport error: {0}")]
    Udp(#[from] udp::TransportError),

    #[error("response too large: {0} bytes")]
    ResponseTooLarge(u64),

    #[error("unsupported tracker URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid tracker URL: {0}")]
    InvalidUrl(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Encodes peers as 6-byte IPv4+port groups (BEP 23).
pub fn encode_compact_peers(peers: &[PeerAddress]) -> Vec<u8> {
    let mut out = Vec::with_capacity(peers.len() * 6);
    for peer in peers {
        out.extend_from_slice(&peer.0.ip().octets());
        out.extend_from_slice(&peer.0.port().to_be_bytes());
    }
    out
}

#[derive(Debug, Error)]
#[error("invalid compact peer list length {0}")]
pub struct CompactDecodeError(usize);

/// Decodes a compact (BEP 23) peer list: groups of 6 bytes, IPv4 + BE port.
pub fn decode_compact_peers(data: &[u8]) -> Result<Vec<PeerAddress>, CompactDecodeError> {
    if data.len() % 6 != 0 {
        return Err(CompactDecodeError(data.len()));
    }
    Ok(data
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            PeerAddress(SocketAddrV4::new(ip, port))
        })
        .collect())
}

/// A single tracker endpoint (HTTP(S) or UDP), or a BEP-12 tier of
/// equivalent mirrors. A tier is itself addressable as a `Tracker` so a
/// torrent's announce-list entries are uniform regardless of how many
/// mirrors a given tier has.
pub enum Tracker {
    Http(http::HttpTracker),
    Udp(udp::UdpTrackerClient),
    Tier(Tier),
}

impl Tracker {
    pub fn url(&self) -> &str {
        match self {
            Tracker::Http(t) => t.url(),
            Tracker::Udp(t) => t.url(),
            Tracker::Tier(t) => t.url(),
        }
    }

    pub async fn announce(&self, req: &AnnounceRequest) -> TrackerResult<AnnounceResponse> {
        match self {
            Tracker::Http(t) => t.announce(req).await,
            Tracker::Udp(t) => t.announce(req).await,
            Tracker::Tier(t) => t.announce(req).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_peers_round_trip() {
        let peers = vec![
            PeerAddress(SocketAddrV4::new(Ipv4Addr::new(1, 2, 3, 4), 6881)),
            PeerAddress(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 51413)),
        ];
        let encoded = encode_compact_peers(&peers);
        assert_eq!(encoded.len(), 12);
        let decoded = decode_compact_peers(&encoded).unwrap();
        assert_eq!(decoded, peers);
    }

    #[test]
    fn rejects_misaligned_compact_data() {
        assert!(decode_compact_peers(&[0u8; 7]).is_err());
    }

    #[test]
    fn event_udp_codes_match_wire_values() {
        assert_eq!(Event::None.as_udp_code(), 0);
        assert_eq!(Event::Completed.as_udp_code(), 1);
        assert_eq!(Event::Started.as_udp_code(), 2);
        assert_eq!(Event::Stopped.as_udp_code(), 3);
    }
}
