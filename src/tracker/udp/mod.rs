//! UDP tracker client (BEP 15) built on the shared [`Transport`].
mod protocol;
mod transport;

pub use protocol::Action;
pub use transport::{Transport, TransportError};

use super::{AnnounceRequest, AnnounceResponse, TrackerError, TrackerResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct UdpTrackerClient {
    raw_url: String,
    dest: String,
    transport: Arc<Transport>,
}

impl UdpTrackerClient {
    /// `raw_url` must be a `udp://host:port/...` tracker URL; `dest` is its
    /// `host:port` authority, already extracted by the caller.
    pub fn new(raw_url: String, dest: String, transport: Arc<Transport>) -> Self {
        UdpTrackerClient {
            raw_url,
            dest,
            transport,
        }
    }

    pub fn url(&self) -> &str {
        &self.raw_url
    }

    #[instrument(skip(self, req), fields(url = %self.raw_url))]
    pub async fn announce(&self, req: &AnnounceRequest) -> TrackerResult<AnnounceResponse> {
        let ip_field = 0u32; // 0 requests the tracker use the packet's source address
        let body = protocol::build_announce_body(
            req.info_hash.as_bytes(),
            &req.peer_id,
            req.downloaded,
            req.left,
            req.uploaded,
            req.event.as_udp_code(),
            ip_field,
            req.key,
            req.num_want,
            req.port,
        );

        let (_action, response_body) = self
            .transport
            .request(&self.dest, Action::Announce, &body)
            .await
            .map_err(TrackerError::Udp)?;

        let (header, peers_raw) =
            protocol::parse_announce_body(&response_body).map_err(|_| TrackerError::Decode)?;
        let peers = super::decode_compact_peers(&peers_raw).map_err(|_| TrackerError::Decode)?;

        Ok(AnnounceResponse {
            interval: Duration::from_secs(header.interval.max(0) as u64),
            min_interval: None,
            leechers: header.leechers as i64,
            seeders: header.seeders as i64,
            peers,
            dropped_peers: 0,
            warning_message: None,
            tracker_id: None,
        })
    }
}
