//! Drives the announce cadence for one torrent/tracker pair.
use super::{announce_once, GetTorrent};
use crate::backoff::Backoff;
use crate::resolver::ResolverError;
use crate::tracker::udp::TransportError;
use crate::tracker::{AnnounceResponse, Event, Tracker, TrackerError};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceStatus {
    NotContactedYet,
    Contacting,
    Working,
    NotWorking,
}

/// Error buckets for observability, classified from typed fields rather
/// than string-matching OS/library error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceErrorKind {
    Dns,
    Blocked,
    NotIpv4,
    InvalidPort,
    ConnectionRefused,
    ConnectionReset,
    Tls,
    NoRouteToHost,
    Timeout,
    HttpStatus { status: u16, message: Option<String> },
    TrackerFailure(String),
    Decode,
    Unknown,
}

impl AnnounceErrorKind {
    pub fn message(&self) -> String {
        match self {
            AnnounceErrorKind::Dns => "could not resolve tracker host".to_string(),
            AnnounceErrorKind::Blocked => "tracker IP is blocked".to_string(),
            AnnounceErrorKind::NotIpv4 => "tracker has no IPv4 address".to_string(),
            AnnounceErrorKind::InvalidPort => "invalid port number in tracker address".to_string(),
            AnnounceErrorKind::ConnectionRefused => "tracker refused the connection".to_string(),
            AnnounceErrorKind::ConnectionReset => "tracker closed the connection".to_string(),
            AnnounceErrorKind::Tls => "TLS handshake with tracker failed".to_string(),
            AnnounceErrorKind::NoRouteToHost => "no route to tracker host".to_string(),
            AnnounceErrorKind::Timeout => "tracker request timed out".to_string(),
            AnnounceErrorKind::HttpStatus { status, message } => match message {
                Some(m) => format!("tracker returned HTTP status {status}: {m}"),
                None => format!("tracker returned HTTP status {status}"),
            },
            AnnounceErrorKind::TrackerFailure(reason) => format!("announce error: {reason}"),
            AnnounceErrorKind::Decode => "invalid response from tracker".to_string(),
            AnnounceErrorKind::Unknown => "unknown error contacting tracker".to_string(),
        }
    }
}

/// Classifies a [`TrackerError`] into a stable bucket, keying off typed
/// fields (`io::ErrorKind`, `reqwest::Error::is_connect`/`is_timeout`, our
/// own error variants) instead of matching on formatted error strings.
pub fn classify(err: &TrackerError) -> AnnounceErrorKind {
    match err {
        TrackerError::Resolver(r) => classify_resolver(r),
        TrackerError::Udp(u) => classify_udp(u),
        TrackerError::Http(h) => classify_http(h),
        TrackerError::Status {
            status,
            headers,
            body_prefix,
        } => {
            let message = if headers.to_lowercase().contains("text/plain") {
                let mut text = String::from_utf8_lossy(body_prefix).into_owned();
                if text.len() > 100 {
                    text.truncate(97);
                    text.push_str("...");
                }
                Some(text)
            } else {
                None
            };
            AnnounceErrorKind::HttpStatus {
                status: *status,
                message,
            }
        }
        TrackerError::FailureReason { reason, .. } => {
            AnnounceErrorKind::TrackerFailure(reason.clone())
        }
        TrackerError::Decode => AnnounceErrorKind::Decode,
        TrackerError::ResponseTooLarge(_)
        | TrackerError::UnsupportedScheme(_)
        | TrackerError::InvalidUrl(_) => AnnounceErrorKind::Unknown,
    }
}

fn classify_resolver(err: &ResolverError) -> AnnounceErrorKind {
    match err {
        ResolverError::Blocked => AnnounceErrorKind::Blocked,
        ResolverError::NotIpv4Address => AnnounceErrorKind::NotIpv4,
        ResolverError::InvalidPort | ResolverError::InvalidHostPort(_) => {
            AnnounceErrorKind::InvalidPort
        }
        ResolverError::Timeout(_) => AnnounceErrorKind::Timeout,
        ResolverError::Lookup(io_err) => classify_io_kind(io_err.kind()),
    }
}

fn classify_udp(err: &TransportError) -> AnnounceErrorKind {
    match err {
        TransportError::Resolver(r) => classify_resolver(r),
        TransportError::Io(io_err) => classify_io_kind(io_err.kind()),
        TransportError::TrackerError(msg) => AnnounceErrorKind::TrackerFailure(msg.clone()),
        TransportError::Timeout => AnnounceErrorKind::Timeout,
        TransportError::Malformed(_) => AnnounceErrorKind::Decode,
        TransportError::Closing | TransportError::TransactionIdCollision => {
            AnnounceErrorKind::Unknown
        }
    }
}

fn classify_io_kind(kind: std::io::ErrorKind) -> AnnounceErrorKind {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::ConnectionRefused => AnnounceErrorKind::ConnectionRefused,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
            AnnounceErrorKind::ConnectionReset
        }
        ErrorKind::TimedOut => AnnounceErrorKind::Timeout,
        ErrorKind::NotFound => AnnounceErrorKind::Dns,
        _ => AnnounceErrorKind::Unknown,
    }
}

// TODO: once rustls is a direct dependency, downcast the source chain to
// rustls::Error to classify TLS handshake failures precisely instead of
// folding them into Unknown.
fn classify_http(err: &reqwest::Error) -> AnnounceErrorKind {
    if err.is_timeout() {
        return AnnounceErrorKind::Timeout;
    }
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
            return classify_io_kind(io_err.kind());
        }
        source = e.source();
    }
    if err.is_connect() {
        return AnnounceErrorKind::ConnectionRefused;
    }
    if let Some(status) = err.status() {
        return AnnounceErrorKind::HttpStatus {
            status: status.as_u16(),
            message: None,
        };
    }
    AnnounceErrorKind::Unknown
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub status: AnnounceStatus,
    pub error: Option<AnnounceErrorKind>,
    pub warning: Option<String>,
    pub seeders: i64,
    pub leechers: i64,
    pub last_announce: Option<Instant>,
    pub next_announce: Option<Instant>,
}

enum Control {
    NeedMorePeers(bool),
    Completed,
    AnnounceNow,
    Stats(oneshot::Sender<Stats>),
    Close,
}

/// A handle to a running periodic announcer. Dropping it does not stop the
/// task; call [`PeriodicAnnouncer::close`] for a clean shutdown.
pub struct PeriodicAnnouncer {
    control: mpsc::Sender<Control>,
    done: Arc<tokio::sync::Notify>,
}

impl PeriodicAnnouncer {
    pub fn spawn(
        tracker: Arc<Tracker>,
        num_want: i32,
        min_interval: Duration,
        backoff: Backoff,
        get_torrent: GetTorrent,
        completed: oneshot::Receiver<()>,
        new_peers: mpsc::Sender<Vec<crate::peer::PeerAddress>>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(8);
        let done = Arc::new(tokio::sync::Notify::new());
        let done_signal = done.clone();

        // BEP 3: if the completion signal already fired before this
        // announcer started, it is swallowed here rather than producing a
        // completed announce; any later firing is forwarded exactly once.
        let forward_tx = control_tx.clone();
        tokio::spawn(async move {
            let mut completed = completed;
            if completed.try_recv().is_ok() {
                return;
            }
            if completed.await.is_ok() {
                let _ = forward_tx.send(Control::Completed).await;
            }
        });

        tokio::spawn(async move {
            Worker {
                tracker,
                num_want,
                min_interval,
                interval: Duration::from_secs(30 * 60),
                get_torrent,
                new_peers,
                status: AnnounceStatus::NotContactedYet,
                seeders: 0,
                leechers: 0,
                warning: None,
                last_error: None,
                backoff,
                backoff_attempt: 0,
                last_announce: None,
                next_announce: None,
                need_more_peers: false,
                generation: Arc::new(AtomicU64::new(0)),
            }
            .run(control_rx)
            .await;
            done_signal.notify_waiters();
        });

        PeriodicAnnouncer {
            control: control_tx,
            done,
        }
    }

    pub async fn need_more_peers(&self, val: bool) {
        let _ = self.control.send(Control::NeedMorePeers(val)).await;
    }

    pub async fn announce_now(&self) {
        let _ = self.control.send(Control::AnnounceNow).await;
    }

    pub async fn stats(&self) -> Option<Stats> {
        let (tx, rx) = oneshot::channel();
        self.control.send(Control::Stats(tx)).await.ok()?;
        rx.await.ok()
    }

    pub async fn close(&self) {
        let _ = self.control.send(Control::Close).await;
        self.done.notified().await;
    }
}

struct Worker {
    tracker: Arc<Tracker>,
    num_want: i32,
    min_interval: Duration,
    interval: Duration,
    get_torrent: GetTorrent,
    new_peers: mpsc::Sender<Vec<crate::peer::PeerAddress>>,
    status: AnnounceStatus,
    seeders: i64,
    leechers: i64,
    warning: Option<String>,
    last_error: Option<AnnounceErrorKind>,
    backoff: Backoff,
    backoff_attempt: u32,
    last_announce: Option<Instant>,
    next_announce: Option<Instant>,
    need_more_peers: bool,
    generation: Arc<AtomicU64>,
}

enum Outcome {
    Response(AnnounceResponse),
    Error(TrackerError),
}

impl Worker {
    #[instrument(skip_all, fields(url = self.tracker.url()))]
    async fn run(mut self, mut control: mpsc::Receiver<Control>) {
        let (result_tx, mut result_rx) = mpsc::channel(4);
        self.fire_announce(Event::Started, self.num_want, &result_tx);

        let far_future = Instant::now() + Duration::from_secs(365 * 24 * 3600);
        let sleep = tokio::time::sleep_until(far_future);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    if self.status != AnnounceStatus::Contacting {
                        self.fire_announce(Event::None, self.num_want, &result_tx);
                    }
                }
                Some(outcome) = result_rx.recv() => {
                    self.handle_outcome(outcome);
                    if let Some(next) = self.next_announce {
                        sleep.as_mut().reset(next);
                    }
                }
                Some(msg) = control.recv() => {
                    match msg {
                        Control::NeedMorePeers(val) => {
                            self.need_more_peers = val;
                            if self.status == AnnounceStatus::Working {
                                let target = (self.last_announce.unwrap_or_else(Instant::now)
                                    + self.effective_interval())
                                    .max(Instant::now());
                                self.next_announce = Some(target);
                                sleep.as_mut().reset(target);
                            }
                        }
                        Control::AnnounceNow => {
                            if self.status != AnnounceStatus::Contacting {
                                self.fire_announce(Event::None, self.num_want, &result_tx);
                            }
                        }
                        Control::Completed => {
                            self.generation.fetch_add(1, Ordering::SeqCst);
                            self.fire_announce(Event::Completed, 0, &result_tx);
                        }
                        Control::Stats(reply) => {
                            let _ = reply.send(self.stats());
                        }
                        Control::Close => return,
                    }
                }
                else => return,
            }
        }
    }

    fn effective_interval(&self) -> Duration {
        if self.need_more_peers {
            self.min_interval
        } else {
            self.interval
        }
    }

    fn fire_announce(&mut self, event: Event, num_want: i32, result_tx: &mpsc::Sender<Outcome>) {
        self.status = AnnounceStatus::Contacting;
        self.last_announce = Some(Instant::now());
        let tracker = self.tracker.clone();
        let snapshot = (self.get_torrent)();
        let generation = self.generation.load(Ordering::SeqCst);
        let my_generation = self.generation.clone();
        let tx = result_tx.clone();
        tokio::spawn(async move {
            let result = announce_once(&tracker, event, num_want, snapshot).await;
            if my_generation.load(Ordering::SeqCst) != generation {
                debug!("discarding stale announce result after a newer announce superseded it");
                return;
            }
            let outcome = match result {
                Ok(resp) => Outcome::Response(resp),
                Err(e) => Outcome::Error(e),
            };
            let _ = tx.send(outcome).await;
        });
    }

    fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Response(resp) => {
                self.status = AnnounceStatus::Working;
                self.seeders = resp.seeders;
                self.leechers = resp.leechers;
                self.warning = resp.warning_message.clone();
                self.interval = resp.interval;
                if let Some(min) = resp.min_interval {
                    self.min_interval = min;
                }
                self.last_error = None;
                self.backoff_attempt = 0;
                self.next_announce = Some(Instant::now() + self.effective_interval());
                if !resp.peers.is_empty() {
                    let tx = self.new_peers.clone();
                    let peers = resp.peers;
                    tokio::spawn(async move {
                        let _ = tx.send(peers).await;
                    });
                }
            }
            Outcome::Error(err) => {
                self.status = AnnounceStatus::NotWorking;
                let retry_in = match &err {
                    TrackerError::FailureReason { retry_in, .. } => *retry_in,
                    _ => None,
                };
                self.last_error = Some(classify(&err));
                let delay = retry_in.unwrap_or_else(|| {
                    let d = self.backoff.delay(self.backoff_attempt);
                    self.backoff_attempt += 1;
                    d
                });
                self.next_announce = Some(Instant::now() + delay);
                warn!(error = ?self.last_error, "announce failed");
            }
        }
    }

    fn stats(&self) -> Stats {
        Stats {
            status: self.status,
            error: self.last_error.clone(),
            warning: self.warning.clone(),
            seeders: self.seeders,
            leechers: self.leechers,
            last_announce: self.last_announce,
            next_announce: self.next_announce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolverError;

    #[test]
    fn classifies_resolver_errors() {
        assert_eq!(
            classify_resolver(&ResolverError::Blocked),
            AnnounceErrorKind::Blocked
        );
        assert_eq!(
            classify_resolver(&ResolverError::NotIpv4Address),
            AnnounceErrorKind::NotIpv4
        );
        assert_eq!(
            classify_resolver(&ResolverError::InvalidPort),
            AnnounceErrorKind::InvalidPort
        );
    }

    #[test]
    fn classifies_io_kinds() {
        assert_eq!(
            classify_io_kind(std::io::ErrorKind::ConnectionRefused),
            AnnounceErrorKind::ConnectionRefused
        );
        assert_eq!(
            classify_io_kind(std::io::ErrorKind::TimedOut),
            AnnounceErrorKind::Timeout
        );
    }

    #[test]
    fn classifies_tracker_failure_reason() {
        let err = TrackerError::FailureReason {
            reason: "Invalid info_hash parameter".to_string(),
            retry_in: None,
        };
        match classify(&err) {
            AnnounceErrorKind::TrackerFailure(reason) => {
                assert_eq!(reason, "Invalid info_hash parameter");
            }
            other => panic!("expected TrackerFailure, got {other:?}"),
        }
    }
}
