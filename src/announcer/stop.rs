//! Best-effort, bounded-time fan-out of a stopped announce to every tracker
//! in a torrent's tier list. Runs outside the torrent's main loop.
use super::{announce_once, TorrentSnapshot};
use crate::tracker::{Event, Tracker};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct StopAnnouncer {
    trackers: Vec<Arc<Tracker>>,
    timeout: Duration,
}

impl StopAnnouncer {
    pub fn new(trackers: Vec<Arc<Tracker>>, timeout: Duration) -> Self {
        StopAnnouncer { trackers, timeout }
    }

    /// Sends `EventStopped` to every tracker in parallel and returns once
    /// all of them have answered or the deadline elapses, whichever comes
    /// first. Individual tracker errors are ignored.
    #[instrument(skip(self, snapshot), fields(trackers = self.trackers.len()))]
    pub async fn run(&self, snapshot: TorrentSnapshot) {
        let deadline = self.timeout;
        let fanout = futures_join_all(self.trackers.iter().map(|tracker| {
            let tracker = tracker.clone();
            let snapshot = snapshot.clone();
            async move {
                let _ = announce_once(&tracker, Event::Stopped, 0, snapshot).await;
            }
        }));

        let _ = tokio::time::timeout(deadline, fanout).await;
    }
}

/// Minimal stand-in for `futures::future::join_all` so the tracker stack
/// does not need an extra crate for a single call site.
async fn futures_join_all<I>(iter: I)
where
    I: IntoIterator,
    I::Item: std::future::Future<Output = ()> + Send + 'static,
{
    let handles: Vec<_> = iter.into_iter().map(tokio::spawn).collect();
    for handle in handles {
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_holds_every_tracker_in_the_tier() {
        let stop = StopAnnouncer::new(Vec::new(), Duration::from_secs(5));
        assert!(stop.trackers.is_empty());
    }
}
