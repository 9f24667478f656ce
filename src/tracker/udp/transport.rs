//! Single shared UDP socket: one transport per session, serving every UDP
//! tracker through a connection-ID cache and a transaction map.
use super::protocol::{
    self, Action, RequestHeader, CONNECTION_ID_MAGIC, CONNECTION_ID_MISMATCH,
    CONNECTION_LIFETIME_SECS,
};
use crate::backoff::Backoff;
use crate::blocklist::Blocklist;
use crate::resolver::{self, ResolverError};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const MAX_ANNOUNCE_RESPONSE: usize = 20 + 6 * 1000;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closing")]
    Closing,

    #[error("resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker error response: {0}")]
    TrackerError(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transaction ID collision after retry")]
    TransactionIdCollision,

    #[error("request timed out")]
    Timeout,
}

struct CachedConnection {
    id: u64,
    addr: SocketAddrV4,
    connected_at: Instant,
}

impl CachedConnection {
    fn is_expired(&self) -> bool {
        self.connected_at.elapsed() >= Duration::from_secs(CONNECTION_LIFETIME_SECS)
    }
}

/// Transactions are scoped by `(remote_addr, transaction_id)` rather than
/// transaction ID alone, so a stale response from one tracker can never be
/// dispatched to a transaction opened against a different one.
type TransactionKey = (SocketAddrV4, u32);

struct TransportState {
    connections: HashMap<String, CachedConnection>,
    transactions: HashMap<TransactionKey, oneshot::Sender<(Action, Vec<u8>)>>,
}

pub struct Transport {
    socket: Arc<UdpSocket>,
    state: Mutex<TransportState>,
    blocklist: Option<Arc<Blocklist>>,
    dns_timeout: Duration,
    backoff: Backoff,
    request_timeout: Duration,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Transport {
    pub async fn bind(
        blocklist: Option<Arc<Blocklist>>,
        dns_timeout: Duration,
        backoff: Backoff,
        request_timeout: Duration,
    ) -> Result<Arc<Self>, TransportError> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let transport = Arc::new(Transport {
            socket: socket.clone(),
            state: Mutex::new(TransportState {
                connections: HashMap::new(),
                transactions: HashMap::new(),
            }),
            blocklist,
            dns_timeout,
            backoff,
            request_timeout,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(Transport::read_loop(transport.clone(), socket));
        Ok(transport)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    async fn read_loop(transport: Arc<Transport>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_ANNOUNCE_RESPONSE];
        loop {
            tokio::select! {
                _ = transport.cancel.cancelled() => return,
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, std::net::SocketAddr::V4(addr))) => transport.dispatch(&buf[..n], addr).await,
                        Ok((_n, std::net::SocketAddr::V6(_))) => {}
                        Err(e) => {
                            warn!(error = %e, "udp transport read error");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, datagram: &[u8], from: SocketAddrV4) {
        let mut cursor = std::io::Cursor::new(datagram);
        let header = match protocol::ResponseHeader::read_from(&mut cursor) {
            Ok(h) => h,
            Err(_) => return,
        };
        let body = datagram[protocol::ResponseHeader::LEN..].to_vec();

        let key = (from, header.transaction_id);
        let sender = {
            let mut state = self.state.lock().await;
            state.transactions.remove(&key)
        };
        match sender {
            Some(tx) => {
                let _ = tx.send((header.action, body));
            }
            None => debug!(transaction_id = header.transaction_id, %from, "unexpected transaction id"),
        }
    }

    /// Ensures a cached, non-expired connection ID for `dest`, performing
    /// the connect handshake if needed.
    #[instrument(skip(self), fields(dest))]
    async fn connection_id(&self, dest: &str) -> Result<(u64, SocketAddrV4), TransportError> {
        {
            let state = self.state.lock().await;
            if let Some(conn) = state.connections.get(dest) {
                if !conn.is_expired() {
                    return Ok((conn.id, conn.addr));
                }
            }
        }

        let (ip, port) = resolver::resolve(dest, self.dns_timeout, self.blocklist.as_deref())
            .await
            .map_err(TransportError::Resolver)?;
        let addr = SocketAddrV4::new(ip, port);

        let mut req = Vec::with_capacity(16);
        let transaction_id = self.register_transaction(addr).await?;
        RequestHeader {
            connection_id: CONNECTION_ID_MAGIC,
            action: Action::Connect,
            transaction_id,
        }
        .write_to(&mut req)
        .unwrap();

        let (action, body) = self.send_with_retry(addr, transaction_id, &req).await?;
        if action == Action::Error {
            return Err(self.classify_error(&body));
        }
        let conn_id = protocol::parse_connection_response(&body)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let mut state = self.state.lock().await;
        state.connections.insert(
            dest.to_string(),
            CachedConnection {
                id: conn_id,
                addr,
                connected_at: Instant::now(),
            },
        );
        Ok((conn_id, addr))
    }

    /// Sends `action_body` (the bytes following the 16-byte header) to
    /// `dest`, obtaining a connection ID first if needed, and returns the
    /// response action and body.
    #[instrument(skip(self, action_body), fields(dest))]
    pub async fn request(
        &self,
        dest: &str,
        action: Action,
        action_body: &[u8],
    ) -> Result<(Action, Vec<u8>), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closing);
        }

        let (conn_id, addr) = self.connection_id(dest).await?;

        let transaction_id = self.register_transaction(addr).await?;
        let mut packet = Vec::with_capacity(16 + action_body.len());
        RequestHeader {
            connection_id: conn_id,
            action,
            transaction_id,
        }
        .write_to(&mut packet)
        .unwrap();
        packet.extend_from_slice(action_body);

        let (resp_action, body) = self.send_with_retry(addr, transaction_id, &packet).await?;
        if resp_action == Action::Error {
            if body == CONNECTION_ID_MISMATCH {
                let mut state = self.state.lock().await;
                state.connections.remove(dest);
            }
            return Err(self.classify_error(&body));
        }
        Ok((resp_action, body))
    }

    fn classify_error(&self, body: &[u8]) -> TransportError {
        TransportError::TrackerError(String::from_utf8_lossy(body).trim_end_matches('\0').to_string())
    }

    async fn register_transaction(&self, addr: SocketAddrV4) -> Result<u32, TransportError> {
        let mut state = self.state.lock().await;
        for _ in 0..8 {
            let id: u32 = rand::rng().random();
            let key = (addr, id);
            if !state.transactions.contains_key(&key) {
                let (placeholder, _rx) = oneshot::channel();
                state.transactions.insert(key, placeholder);
                return Ok(id);
            }
        }
        Err(TransportError::TransactionIdCollision)
    }

    async fn send_with_retry(
        &self,
        addr: SocketAddrV4,
        transaction_id: u32,
        packet: &[u8],
    ) -> Result<(Action, Vec<u8>), TransportError> {
        let key = (addr, transaction_id);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.transactions.insert(key, tx);
        }

        let socket = self.socket.clone();
        let packet = packet.to_vec();
        let cancel = self.cancel.clone();
        let backoff = self.backoff.clone();
        let send_task = tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                if socket.send_to(&packet, addr).await.is_err() {
                    return;
                }
                let delay = backoff.delay(attempt);
                attempt += 1;
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }
            }
        });

        let result = tokio::select! {
            res = rx => res.map_err(|_| TransportError::Closing),
            _ = self.cancel.cancelled() => Err(TransportError::Closing),
            _ = tokio::time::sleep(self.request_timeout) => Err(TransportError::Timeout),
        };
        send_task.abort();

        {
            let mut state = self.state.lock().await;
            state.transactions.remove(&key);
        }

        result
    }
}

