//! A single torrent's lifecycle: accepting incoming peer connections,
//! driving one periodic announcer per tracker tier, and fanning out a
//! stopped event when the torrent is closed.
use crate::acceptor::Acceptor;
use crate::announcer::{
    AnnounceErrorKind, AnnounceStatus, GetTorrent, PeriodicAnnouncer, Stats, StopAnnouncer,
    TorrentSnapshot,
};
use crate::backoff::Backoff;
use crate::metainfo::{Info, InfoHash};
use crate::peer::PeerAddress;
use crate::tracker::Tracker;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

/// Launch-time parameters a torrent needs but does not own; supplied by the
/// session so a torrent never reaches back into global config.
#[derive(Clone)]
pub struct TorrentOptions {
    pub host: String,
    pub tracker_num_want: i32,
    pub tracker_min_announce_interval: Duration,
    pub tracker_stop_timeout: Duration,
    pub backoff: Backoff,
}

/// A per-tracker snapshot surfaced to callers inspecting torrent health.
#[derive(Debug, Clone)]
pub struct TrackerStat {
    pub url: String,
    pub status: AnnounceStatus,
    pub seeders: i64,
    pub leechers: i64,
    pub warning: Option<String>,
    pub error: Option<AnnounceErrorKind>,
}

enum Command {
    Start,
    Stop,
    AnnounceNow,
    AddTrackers(Vec<Arc<Tracker>>),
    TrackerStats(oneshot::Sender<Vec<TrackerStat>>),
    IncomingConn(TcpStream, SocketAddr),
    Completed,
    Close,
}

/// A handle to a running torrent actor. Cloning it is cheap; the actor
/// itself is torn down when the last handle is dropped and [`close`] has
/// been called.
///
/// [`close`]: Torrent::close
#[derive(Clone)]
pub struct Torrent {
    pub id: String,
    pub info_hash: InfoHash,
    pub name: String,
    pub port: u16,
    control: mpsc::Sender<Command>,
    done: Arc<tokio::sync::Notify>,
}

impl Torrent {
    #[instrument(skip_all, fields(id = %id, info_hash = %info_hash.to_hex()))]
    pub fn spawn(
        id: String,
        info_hash: InfoHash,
        info: Info,
        name: String,
        trackers: Vec<Arc<Tracker>>,
        peer_id: [u8; 20],
        port: u16,
        new_peers: mpsc::Sender<Vec<PeerAddress>>,
        options: TorrentOptions,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(32);
        let done = Arc::new(tokio::sync::Notify::new());
        let done_signal = done.clone();

        let actor = Actor {
            id: id.clone(),
            added_at: SystemTime::now(),
            info_hash,
            info,
            name: name.clone(),
            trackers,
            peer_id,
            port,
            key: rand::random(),
            uploaded: Arc::new(AtomicI64::new(0)),
            downloaded: Arc::new(AtomicI64::new(0)),
            left: Arc::new(AtomicI64::new(0)),
            new_peers,
            announcers: Vec::new(),
            completed_senders: Vec::new(),
            acceptor: None,
            options,
            control: control_tx.clone(),
        };

        tokio::spawn(async move {
            actor.run(control_rx).await;
            done_signal.notify_waiters();
        });

        Torrent {
            id,
            info_hash,
            name,
            port,
            control: control_tx,
            done,
        }
    }

    pub async fn start(&self) {
        let _ = self.control.send(Command::Start).await;
    }

    pub async fn stop(&self) {
        let _ = self.control.send(Command::Stop).await;
    }

    pub async fn announce_now(&self) {
        let _ = self.control.send(Command::AnnounceNow).await;
    }

    pub async fn add_trackers(&self, trackers: Vec<Arc<Tracker>>) {
        let _ = self.control.send(Command::AddTrackers(trackers)).await;
    }

    pub async fn tracker_stats(&self) -> Vec<TrackerStat> {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Command::TrackerStats(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn incoming_conn(&self, conn: TcpStream, from: SocketAddr) {
        let _ = self.control.send(Command::IncomingConn(conn, from)).await;
    }

    pub async fn mark_completed(&self) {
        let _ = self.control.send(Command::Completed).await;
    }

    pub async fn close(&self) {
        let _ = self.control.send(Command::Close).await;
        self.done.notified().await;
    }
}

struct Actor {
    id: String,
    added_at: SystemTime,
    info_hash: InfoHash,
    info: Info,
    name: String,
    trackers: Vec<Arc<Tracker>>,
    peer_id: [u8; 20],
    port: u16,
    key: u32,
    uploaded: Arc<AtomicI64>,
    downloaded: Arc<AtomicI64>,
    left: Arc<AtomicI64>,
    new_peers: mpsc::Sender<Vec<PeerAddress>>,
    announcers: Vec<PeriodicAnnouncer>,
    completed_senders: Vec<oneshot::Sender<()>>,
    acceptor: Option<Acceptor>,
    options: TorrentOptions,
    control: mpsc::Sender<Command>,
}

impl Actor {
    async fn run(mut self, mut control: mpsc::Receiver<Command>) {
        while let Some(cmd) = control.recv().await {
            match cmd {
                Command::Start => self.start().await,
                Command::Stop => self.stop().await,
                Command::AnnounceNow => {
                    for a in &self.announcers {
                        a.announce_now().await;
                    }
                }
                Command::AddTrackers(trackers) => self.add_trackers(trackers).await,
                Command::TrackerStats(reply) => {
                    let _ = reply.send(self.tracker_stats().await);
                }
                Command::IncomingConn(conn, from) => {
                    // Handshake and the wire protocol beyond it belong to a
                    // downstream collaborator; we only log acceptance here.
                    info!(%from, "accepted incoming peer connection");
                    drop(conn);
                }
                Command::Completed => {
                    self.left.store(0, Ordering::SeqCst);
                    for tx in self.completed_senders.drain(..) {
                        let _ = tx.send(());
                    }
                }
                Command::Close => {
                    self.stop().await;
                    return;
                }
            }
        }
    }

    fn get_torrent_closure(&self) -> GetTorrent {
        let info_hash = self.info_hash;
        let peer_id = self.peer_id;
        let port = self.port;
        let key = self.key;
        let uploaded = self.uploaded.clone();
        let downloaded = self.downloaded.clone();
        let left = self.left.clone();
        Arc::new(move || TorrentSnapshot {
            info_hash,
            peer_id,
            port,
            uploaded: uploaded.load(Ordering::SeqCst),
            downloaded: downloaded.load(Ordering::SeqCst),
            left: left.load(Ordering::SeqCst),
            key,
        })
    }

    async fn start(&mut self) {
        info!(name = %self.name, added_at = ?self.added_at, "starting torrent");
        self.left.store(self.info.length, Ordering::SeqCst);

        if self.acceptor.is_none() {
            let ip: IpAddr = self
                .options
                .host
                .parse()
                .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
            let (incoming_tx, mut incoming_rx) = mpsc::channel::<TcpStream>(16);
            match Acceptor::bind(SocketAddr::new(ip, self.port), incoming_tx).await {
                Ok(acceptor) => {
                    self.acceptor = Some(acceptor);
                    let control = self.control.clone();
                    tokio::spawn(async move {
                        while let Some(conn) = incoming_rx.recv().await {
                            let from = conn
                                .peer_addr()
                                .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0));
                            if control.send(Command::IncomingConn(conn, from)).await.is_err() {
                                return;
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, port = self.port, "cannot listen for incoming peers"),
            }
        }

        if self.announcers.is_empty() {
            let trackers = self.trackers.clone();
            for tracker in trackers {
                self.start_announcer(tracker);
            }
        }
    }

    fn start_announcer(&mut self, tracker: Arc<Tracker>) {
        let (completed_tx, completed_rx) = oneshot::channel();
        self.completed_senders.push(completed_tx);
        let announcer = PeriodicAnnouncer::spawn(
            tracker,
            self.options.tracker_num_want,
            self.options.tracker_min_announce_interval,
            self.options.backoff.clone(),
            self.get_torrent_closure(),
            completed_rx,
            self.new_peers.clone(),
        );
        self.announcers.push(announcer);
    }

    async fn add_trackers(&mut self, trackers: Vec<Arc<Tracker>>) {
        let starting = !self.announcers.is_empty() || self.acceptor.is_some();
        for tracker in trackers {
            self.trackers.push(tracker.clone());
            if starting {
                self.start_announcer(tracker);
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.close().await;
        }

        let announcers = std::mem::take(&mut self.announcers);
        let handles: Vec<_> = announcers
            .into_iter()
            .map(|a| tokio::spawn(async move { a.close().await }))
            .collect();
        for h in handles {
            let _ = h.await;
        }
        self.completed_senders.clear();

        let snapshot = (self.get_torrent_closure())();
        let stop_announcer = StopAnnouncer::new(self.trackers.clone(), self.options.tracker_stop_timeout);
        stop_announcer.run(snapshot).await;
    }

    async fn tracker_stats(&self) -> Vec<TrackerStat> {
        let mut out = Vec::with_capacity(self.announcers.len());
        for (tracker, announcer) in self.trackers.iter().zip(self.announcers.iter()) {
            let stats: Stats = match announcer.stats().await {
                Some(s) => s,
                None => continue,
            };
            out.push(TrackerStat {
                url: tracker.url().to_string(),
                status: stats.status,
                seeders: stats.seeders,
                leechers: stats.leechers,
                warning: stats.warning,
                error: stats.error,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_stat_carries_url_and_status() {
        let stat = TrackerStat {
            url: "udp://tracker.example:80".to_string(),
            status: AnnounceStatus::NotContactedYet,
            seeders: 0,
            leechers: 0,
            warning: None,
            error: None,
        };
        assert_eq!(stat.url, "udp://tracker.example:80");
        assert_eq!(stat.status, AnnounceStatus::NotContactedYet);
    }
}
