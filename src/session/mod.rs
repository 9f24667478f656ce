//! Session: the top-level registry owning a torrent's shared resources —
//! one `TrackerManager`, a reloadable blocklist, the pool of listening
//! ports, and the map of running torrents.
use crate::backoff::Backoff;
use crate::blocklist::Blocklist;
use crate::config::Config;
use crate::metainfo::{MetainfoError, MetaInfo};
use crate::peer::PeerAddress;
use crate::peer_id;
use crate::torrent::{Torrent, TorrentOptions};
use crate::tracker::udp::TransportError;
use crate::tracker::{Tier, Tracker, TrackerManager};
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AddTorrentError {
    #[error("torrent exceeds the configured size limit of {0} bytes")]
    TooLarge(u64),

    #[error("could not read torrent data: {0}")]
    Read(#[from] std::io::Error),

    #[error("invalid torrent file: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("torrent already added")]
    AlreadyAdded,

    #[error("no listening ports available")]
    NoPortsAvailable,
}

pub struct Session {
    config: Config,
    tracker_manager: TrackerManager,
    blocklist: Arc<Blocklist>,
    torrents: RwLock<HashMap<String, Torrent>>,
    by_info_hash: RwLock<HashMap<[u8; 20], String>>,
    ports: Mutex<PortPool>,
}

struct PortPool {
    ids_by_port: HashMap<u16, String>,
    available: Vec<u16>,
}

impl PortPool {
    fn new(range: std::ops::Range<u16>) -> Self {
        PortPool {
            ids_by_port: HashMap::new(),
            available: range.rev().collect(),
        }
    }

    fn acquire(&mut self, id: &str) -> Option<u16> {
        let port = self.available.pop()?;
        self.ids_by_port.insert(port, id.to_string());
        Some(port)
    }

    fn release(&mut self, port: u16) {
        if self.ids_by_port.remove(&port).is_some() {
            self.available.push(port);
        }
    }
}

impl Session {
    pub async fn new(config: Config) -> Result<Self, TransportError> {
        let blocklist = Arc::new(Blocklist::new());
        if let Some(path) = &config.blocklist_path {
            match std::fs::File::open(path) {
                Ok(file) => {
                    if let Err(e) = blocklist.load(file) {
                        warn!(error = %e, path, "failed to load blocklist, starting unblocked");
                    }
                }
                Err(e) => warn!(error = %e, path, "cannot open blocklist file, starting unblocked"),
            }
        }

        let tracker_manager = TrackerManager::new(&config, Some(blocklist.clone())).await?;
        let ports = Mutex::new(PortPool::new(config.port_range()));

        Ok(Session {
            config,
            tracker_manager,
            blocklist,
            torrents: RwLock::new(HashMap::new()),
            by_info_hash: RwLock::new(HashMap::new()),
            ports,
        })
    }

    /// Reloads the blocklist from a fresh CIDR list in place, so the
    /// tracker manager's already-captured `Arc<Blocklist>` observes the
    /// update without re-wiring any client.
    pub fn reload_blocklist<R: Read>(&self, reader: R) -> Result<usize, crate::blocklist::BlocklistError> {
        self.blocklist.reload(reader)
    }

    #[instrument(skip(self, data))]
    pub async fn add_torrent(
        &self,
        data: &[u8],
        new_peers: mpsc::Sender<Vec<PeerAddress>>,
    ) -> Result<Torrent, AddTorrentError> {
        if data.len() as u64 > self.config.max_torrent_size {
            return Err(AddTorrentError::TooLarge(self.config.max_torrent_size));
        }

        let metainfo = MetaInfo::parse(data)?;
        let info_hash = metainfo.info.hash;

        {
            let existing = self.by_info_hash.read().unwrap();
            if existing.contains_key(info_hash.as_bytes()) {
                return Err(AddTorrentError::AlreadyAdded);
            }
        }

        let id = Uuid::now_v1(&[0, 0, 0, 0, 0, 0]).simple().to_string();
        let trackers = self.build_trackers(&metainfo);
        let port = self
            .ports
            .lock()
            .unwrap()
            .acquire(&id)
            .ok_or(AddTorrentError::NoPortsAvailable)?;
        let peer_id_prefix = if metainfo.info.private {
            &self.config.private_peer_id_prefix
        } else {
            &self.config.public_peer_id_prefix
        };
        let peer_id = peer_id::generate(peer_id_prefix);

        let options = TorrentOptions {
            host: self.config.host.clone(),
            tracker_num_want: self.config.tracker_num_want,
            tracker_min_announce_interval: self.config.tracker_min_announce_interval,
            tracker_stop_timeout: self.config.tracker_stop_timeout,
            backoff: Backoff::new(
                self.config.udp_initial_backoff,
                self.config.udp_backoff_factor,
                self.config.udp_backoff_cap,
                self.config.udp_backoff_jitter,
            ),
        };

        let torrent = Torrent::spawn(
            id.clone(),
            info_hash,
            metainfo.info.clone(),
            metainfo.info.name.clone(),
            trackers,
            peer_id,
            port,
            new_peers,
            options,
        );

        self.torrents.write().unwrap().insert(id.clone(), torrent.clone());
        self.by_info_hash
            .write()
            .unwrap()
            .insert(*info_hash.as_bytes(), id);

        torrent.start().await;
        Ok(torrent)
    }

    fn build_trackers(&self, metainfo: &MetaInfo) -> Vec<Arc<Tracker>> {
        let user_agent = if metainfo.info.private {
            self.config.tracker_http_private_user_agent.clone()
        } else {
            self.config.http_user_agent.clone()
        };

        let mut result = Vec::with_capacity(metainfo.announce_list.len());
        for tier_urls in &metainfo.announce_list {
            let mut tier_trackers = Vec::with_capacity(tier_urls.len());
            for url in tier_urls {
                match self.tracker_manager.get(
                    url,
                    self.config.tracker_http_timeout,
                    user_agent.clone(),
                    self.config.tracker_http_max_response_size,
                ) {
                    Ok(tracker) => tier_trackers.push(tracker),
                    Err(e) => warn!(url, error = %e, "skipping unusable tracker"),
                }
            }
            if !tier_trackers.is_empty() {
                result.push(Arc::new(Tracker::Tier(Tier::new(tier_trackers))));
            }
        }
        result
    }

    pub fn get(&self, id: &str) -> Option<Torrent> {
        self.torrents.read().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Torrent> {
        self.torrents.read().unwrap().values().cloned().collect()
    }

    pub async fn remove_torrent(&self, id: &str) -> bool {
        let torrent = self.torrents.write().unwrap().remove(id);
        match torrent {
            Some(t) => {
                t.close().await;
                self.ports.lock().unwrap().release(t.port);
                self.by_info_hash
                    .write()
                    .unwrap()
                    .retain(|_, v| v != id);
                true
            }
            None => false,
        }
    }

    pub fn close(&self) {
        self.tracker_manager.close();
    }
}
