//! HTTP(S) tracker client: hand-built (non-form-encoded) announce query
//! string and bencoded response parsing.
use super::{AnnounceRequest, AnnounceResponse, TrackerError, TrackerResult};
use crate::peer::PeerAddress;
use bytes::BytesMut;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct HttpTracker {
    raw_url: String,
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
    max_response_length: u64,
    tracker_id: Mutex<Option<String>>,
}

impl HttpTracker {
    pub fn new(
        raw_url: String,
        client: reqwest::Client,
        timeout: Duration,
        user_agent: String,
        max_response_length: u64,
    ) -> Self {
        HttpTracker {
            raw_url,
            client,
            timeout,
            user_agent,
            max_response_length,
            tracker_id: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.raw_url
    }

    #[instrument(skip(self, req), fields(url = %self.raw_url))]
    pub async fn announce(&self, req: &AnnounceRequest) -> TrackerResult<AnnounceResponse> {
        let url = self.build_announce_url(req);
        debug!(%url, "sending http announce");

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = resp.status();
        let headers = format!("{:?}", resp.headers());

        let body = self.read_bounded_body(resp).await?;
        debug!(body_len = body.len(), %status, "received http announce response");

        let raw: Result<RawAnnounceResponse, _> = serde_bencode::from_bytes(&body);
        let raw = match raw {
            Ok(raw) => raw,
            Err(_) if !status.is_success() => {
                return Err(TrackerError::Status {
                    status: status.as_u16(),
                    headers,
                    body_prefix: body.into_iter().take(256).collect(),
                })
            }
            Err(_) => return Err(TrackerError::Decode),
        };

        if let Some(reason) = raw.failure_reason {
            return Err(TrackerError::FailureReason {
                reason,
                retry_in: raw.retry_in.map(|m| Duration::from_secs((m.max(0) as u64) * 60)),
            });
        }

        if let Some(id) = &raw.tracker_id {
            *self.tracker_id.lock().unwrap() = Some(id.clone());
        }

        let (mut peers, dropped_peers) = decode_peers(raw.peers)?;
        if let Some(ext_ip) = raw.external_ip.as_deref() {
            if ext_ip.len() == 4 {
                let ext = Ipv4Addr::new(ext_ip[0], ext_ip[1], ext_ip[2], ext_ip[3]);
                peers.retain(|p| *p.0.ip() != ext);
            }
        }

        Ok(AnnounceResponse {
            interval: Duration::from_secs(raw.interval.unwrap_or(0).max(0) as u64),
            min_interval: raw.min_interval.map(|s| Duration::from_secs(s.max(0) as u64)),
            leechers: raw.incomplete.unwrap_or(0),
            seeders: raw.complete.unwrap_or(0),
            peers,
            dropped_peers,
            warning_message: raw.warning_message,
            tracker_id: raw.tracker_id,
        })
    }

    fn build_announce_url(&self, req: &AnnounceRequest) -> String {
        let mut s = self.raw_url.clone();
        s.push(if self.raw_url.contains('?') { '&' } else { '?' });
        s.push_str("info_hash=");
        s.push_str(&percent_escape_raw(req.info_hash.as_bytes()));
        s.push_str("&peer_id=");
        s.push_str(&percent_escape_raw(&req.peer_id));
        s.push_str("&port=");
        s.push_str(&req.port.to_string());
        s.push_str("&uploaded=");
        s.push_str(&req.uploaded.to_string());
        s.push_str("&downloaded=");
        s.push_str(&req.downloaded.to_string());
        s.push_str("&left=");
        let left = if req.left < 0 { i64::MAX } else { req.left };
        s.push_str(&left.to_string());
        s.push_str("&compact=1");
        s.push_str("&no_peer_id=1");
        s.push_str("&num_want=");
        s.push_str(&req.num_want.to_string());
        if let Some(ev) = req.event.as_http_str() {
            s.push_str("&event=");
            s.push_str(ev);
        }
        if let Some(id) = self.tracker_id.lock().unwrap().as_ref() {
            s.push_str("&trackerid=");
            s.push_str(id);
        }
        s.push_str("&key=");
        s.push_str(&hex::encode(&req.peer_id[16..20]));
        s
    }

    async fn read_bounded_body(&self, resp: reqwest::Response) -> TrackerResult<Vec<u8>> {
        let body = resp.bytes().await?;
        let mut buf = BytesMut::from(&body[..]);
        if buf.len() as u64 > self.max_response_length {
            buf.truncate(self.max_response_length as usize);
        }
        Ok(buf.to_vec())
    }
}

fn percent_escape_raw(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        s.push('%');
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decodes the `peers` field, returning parsed addresses alongside a count
/// of entries that could not be parsed (non-IPv4 dict-model peers) rather
/// than silently discarding them.
fn decode_peers(field: Option<PeersField>) -> TrackerResult<(Vec<PeerAddress>, u32)> {
    match field {
        None => Ok((Vec::new(), 0)),
        Some(PeersField::Compact(bytes)) => super::decode_compact_peers(&bytes)
            .map(|peers| (peers, 0))
            .map_err(|_| TrackerError::Decode),
        Some(PeersField::Dict(list)) => {
            let mut peers = Vec::with_capacity(list.len());
            let mut dropped = 0u32;
            for p in list {
                match p.ip.parse::<Ipv4Addr>() {
                    Ok(ip) => peers.push(PeerAddress(SocketAddrV4::new(ip, p.port))),
                    Err(_) => dropped += 1,
                }
            }
            Ok((peers, dropped))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAnnounceResponse {
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(rename = "retry in")]
    retry_in: Option<i64>,
    #[serde(rename = "warning message")]
    warning_message: Option<String>,
    interval: Option<i64>,
    #[serde(rename = "min interval")]
    min_interval: Option<i64>,
    #[serde(rename = "tracker id")]
    tracker_id: Option<String>,
    complete: Option<i64>,
    incomplete: Option<i64>,
    peers: Option<PeersField>,
    #[serde(rename = "external ip", with = "serde_bytes", default)]
    external_ip: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PeersField {
    Compact(#[serde(with = "serde_bytes")] Vec<u8>),
    Dict(Vec<PeerDict>),
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::InfoHash;
    use crate::tracker::Event;

    fn tracker() -> HttpTracker {
        HttpTracker::new(
            "http://tracker.example/announce".to_string(),
            reqwest::Client::new(),
            Duration::from_secs(15),
            "zbt/test".to_string(),
            1 << 20,
        )
    }

    fn req() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash([0xAB; 20]),
            peer_id: [0x01; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event: Event::Started,
            key: 0,
            num_want: 50,
        }
    }

    #[test]
    fn builds_the_announce_url_with_exact_param_order() {
        let t = tracker();
        let url = t.build_announce_url(&req());
        let expected = format!(
            "http://tracker.example/announce?info_hash={}&peer_id={}&port=6881&uploaded=0&downloaded=0&left=100&compact=1&no_peer_id=1&num_want=50&event=started&key=01010101",
            "%ab".repeat(20),
            "%01".repeat(20),
        );
        assert_eq!(url, expected);
    }

    #[test]
    fn negative_left_becomes_int64_max() {
        let t = tracker();
        let mut r = req();
        r.left = -1;
        let url = t.build_announce_url(&r);
        assert!(url.contains(&format!("&left={}&", i64::MAX)));
    }

    #[test]
    fn event_none_omits_the_event_param() {
        let t = tracker();
        let mut r = req();
        r.event = Event::None;
        let url = t.build_announce_url(&r);
        assert!(!url.contains("event="));
    }

    #[test]
    fn dict_model_peers_with_bad_ip_are_counted_dropped_not_silently_lost() {
        let field = PeersField::Dict(vec![
            PeerDict {
                ip: "1.2.3.4".to_string(),
                port: 6881,
            },
            PeerDict {
                ip: "not-an-ip".to_string(),
                port: 1,
            },
        ]);
        let (peers, dropped) = decode_peers(Some(field)).unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(dropped, 1);
    }
}
