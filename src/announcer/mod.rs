//! Per-tracker announce scheduling: the periodic announcer drives the
//! announce cadence for one torrent/tracker pair, and the stop announcer
//! fans out a best-effort `stopped` event when a torrent shuts down.
pub mod periodic;
pub mod stop;

pub use periodic::{AnnounceErrorKind, AnnounceStatus, PeriodicAnnouncer, Stats};
pub use stop::StopAnnouncer;

use crate::metainfo::InfoHash;
use crate::tracker::{AnnounceRequest, AnnounceResponse, Event, Tracker, TrackerResult};
use std::sync::Arc;

/// A fresh snapshot of torrent counters taken at announce time. The torrent
/// supplies a closure returning one of these so the announcer never reads
/// torrent state directly.
#[derive(Debug, Clone)]
pub struct TorrentSnapshot {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub left: i64,
    pub key: u32,
}

pub type GetTorrent = Arc<dyn Fn() -> TorrentSnapshot + Send + Sync>;

async fn announce_once(
    tracker: &Tracker,
    event: Event,
    num_want: i32,
    snapshot: TorrentSnapshot,
) -> TrackerResult<AnnounceResponse> {
    let req = AnnounceRequest {
        info_hash: snapshot.info_hash,
        peer_id: snapshot.peer_id,
        port: snapshot.port,
        uploaded: snapshot.uploaded,
        downloaded: snapshot.downloaded,
        left: snapshot.left,
        event,
        key: snapshot.key,
        num_want,
    };
    tracker.announce(&req).await
}
