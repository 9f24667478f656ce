//! Accepts incoming TCP connections on a torrent's listening port and
//! forwards them for handshake, until closed.
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, instrument};

pub struct Acceptor {
    cancel: CancellationToken,
    done: Arc<tokio::sync::Notify>,
}

impl Acceptor {
    #[instrument(skip(new_conns))]
    pub async fn bind(
        addr: SocketAddr,
        new_conns: mpsc::Sender<TcpStream>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let cancel = CancellationToken::new();
        let done = Arc::new(tokio::sync::Notify::new());

        let run_cancel = cancel.clone();
        let run_done = done.clone();
        tokio::spawn(async move {
            Acceptor::run(listener, new_conns, run_cancel).await;
            run_done.notify_waiters();
        });

        Ok(Acceptor { cancel, done })
    }

    async fn run(listener: TcpListener, new_conns: mpsc::Sender<TcpStream>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = listener.accept() => {
                    match result {
                        Ok((conn, _)) => {
                            tokio::select! {
                                res = new_conns.send(conn) => if res.is_err() { return; },
                                _ = cancel.cancelled() => return,
                            }
                        }
                        Err(e) => {
                            if !cancel.is_cancelled() {
                                error!(error = %e, "accept error");
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    pub async fn close(&self) {
        self.cancel.cancel();
        self.done.notified().await;
    }
}
