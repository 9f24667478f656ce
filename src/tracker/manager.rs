//! Builds and caches tracker clients behind one shared HTTP connection pool
//! and one shared UDP transport, the way a session hands every torrent's
//! tracker URLs to a single manager instead of dialing per-torrent.
use super::udp::{Transport, TransportError};
use super::{http::HttpTracker, udp::UdpTrackerClient, Tracker, TrackerError};
use crate::backoff::Backoff;
use crate::blocklist::Blocklist;
use crate::config::Config;
use crate::resolver;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

pub struct TrackerManager {
    http_client: reqwest::Client,
    udp_transport: Arc<Transport>,
}

impl TrackerManager {
    pub async fn new(
        config: &Config,
        blocklist: Option<Arc<Blocklist>>,
    ) -> Result<Self, TransportError> {
        let dns_timeout = config.dns_resolve_timeout;
        let dns_resolver = Arc::new(BlocklistAwareResolver {
            blocklist: blocklist.clone(),
            timeout: dns_timeout,
        });
        let http_client = reqwest::Client::builder()
            .dns_resolver(dns_resolver)
            .build()
            .expect("reqwest client with a custom resolver should always build");
        let backoff = Backoff::new(
            config.udp_initial_backoff,
            config.udp_backoff_factor,
            config.udp_backoff_cap,
            config.udp_backoff_jitter,
        );
        let udp_transport =
            Transport::bind(blocklist, dns_timeout, backoff, config.udp_request_timeout).await?;
        Ok(TrackerManager {
            http_client,
            udp_transport,
        })
    }

    pub fn close(&self) {
        self.udp_transport.close();
    }

    /// Builds (but does not cache) a tracker client for `raw_url`. The
    /// returned client shares this manager's HTTP connection pool or UDP
    /// socket, so repeated calls are cheap.
    pub fn get(
        &self,
        raw_url: &str,
        http_timeout: Duration,
        http_user_agent: String,
        http_max_response_length: u64,
    ) -> Result<Tracker, TrackerError> {
        let parsed =
            url::Url::parse(raw_url).map_err(|e| TrackerError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {
                let client = self.http_client.clone();
                Ok(Tracker::Http(HttpTracker::new(
                    raw_url.to_string(),
                    client,
                    http_timeout,
                    http_user_agent,
                    http_max_response_length,
                )))
            }
            "udp" => {
                let host = parsed
                    .host_str()
                    .ok_or_else(|| TrackerError::InvalidUrl(raw_url.to_string()))?;
                let port = parsed.port().unwrap_or(80);
                let dest = format!("{host}:{port}");
                Ok(Tracker::Udp(UdpTrackerClient::new(
                    raw_url.to_string(),
                    dest,
                    self.udp_transport.clone(),
                )))
            }
            other => Err(TrackerError::UnsupportedScheme(other.to_string())),
        }
    }
}

struct BlocklistAwareResolver {
    blocklist: Option<Arc<Blocklist>>,
    timeout: Duration,
}

impl reqwest::dns::Resolve for BlocklistAwareResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let blocklist = self.blocklist.clone();
        let timeout = self.timeout;
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = resolver::resolve_host(&host, timeout, blocklist.as_deref())
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            let iter: reqwest::dns::Addrs =
                Box::new(addrs.into_iter().map(|ip| SocketAddr::new(IpAddr::V4(ip), 0)));
            Ok(iter)
        })
    }
}
