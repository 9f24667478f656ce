//! Engine-wide configuration. Loaded from a TOML file or defaults; the
//! resumer/storage/RPC surfaces are out of scope, so only the fields the
//! tracker pipeline and session registry need are modeled here.
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn default_version_tag() -> String {
    VERSION.replace('.', "")
}

pub fn default_http_user_agent() -> String {
    format!("zbt/{VERSION}")
}

pub fn default_public_peer_id_prefix() -> String {
    format!("-ZB{}-", default_version_tag())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port_begin: u16,
    pub port_end: u16,

    pub private_peer_id_prefix: String,
    pub public_peer_id_prefix: String,

    pub blocklist_path: Option<String>,

    pub max_torrent_size: u64,

    #[serde(with = "duration_secs")]
    pub dns_resolve_timeout: Duration,

    pub tracker_num_want: i32,
    #[serde(with = "duration_secs")]
    pub tracker_stop_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub tracker_min_announce_interval: Duration,
    #[serde(with = "duration_secs")]
    pub tracker_http_timeout: Duration,
    pub tracker_http_max_response_size: u64,
    pub tracker_http_private_user_agent: String,
    pub http_user_agent: String,

    #[serde(with = "duration_secs")]
    pub udp_connection_lifetime: Duration,
    #[serde(with = "duration_secs")]
    pub udp_request_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub udp_initial_backoff: Duration,
    pub udp_backoff_factor: u32,
    #[serde(with = "duration_secs")]
    pub udp_backoff_cap: Duration,
    pub udp_backoff_jitter: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port_begin: 20000,
            port_end: 30000,

            private_peer_id_prefix: default_public_peer_id_prefix(),
            public_peer_id_prefix: default_public_peer_id_prefix(),

            blocklist_path: None,

            max_torrent_size: 10 << 20,

            dns_resolve_timeout: Duration::from_secs(5),

            tracker_num_want: 200,
            tracker_stop_timeout: Duration::from_secs(5),
            tracker_min_announce_interval: Duration::from_secs(180),
            tracker_http_timeout: Duration::from_secs(15),
            tracker_http_max_response_size: 100 << 20,
            tracker_http_private_user_agent: format!("zbittorrent {VERSION}"),
            http_user_agent: default_http_user_agent(),

            udp_connection_lifetime: Duration::from_secs(60),
            udp_request_timeout: Duration::from_secs(15),
            udp_initial_backoff: Duration::from_secs(5),
            udp_backoff_factor: 2,
            udp_backoff_cap: Duration::from_secs(30 * 60),
            udp_backoff_jitter: 0.5,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn port_range(&self) -> std::ops::Range<u16> {
        self.port_begin..self.port_end
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_pinned_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.udp_initial_backoff, Duration::from_secs(5));
        assert_eq!(cfg.udp_backoff_factor, 2);
        assert_eq!(cfg.udp_backoff_cap, Duration::from_secs(1800));
        assert_eq!(cfg.udp_connection_lifetime, Duration::from_secs(60));
        assert_eq!(cfg.tracker_stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn loads_partial_overrides_from_toml() {
        let cfg = Config::from_toml_str("port_begin = 6000\nport_end = 6100\n").unwrap();
        assert_eq!(cfg.port_begin, 6000);
        assert_eq!(cfg.port_end, 6100);
        assert_eq!(cfg.tracker_num_want, 200);
    }
}
