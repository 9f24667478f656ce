//! BEP-12 announce tier: round-robin failover across equivalent trackers.
use super::{AnnounceRequest, AnnounceResponse, Tracker, TrackerResult};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::instrument;

/// A set of trackers considered equivalent mirrors. Announces go to the
/// currently-selected tracker; a failure advances the selection by one,
/// wrapping around.
pub struct Tier {
    trackers: Vec<Tracker>,
    index: AtomicUsize,
}

impl Tier {
    /// Shuffles `trackers` once so repeated sessions spread load across
    /// mirrors, then wraps them for rotation.
    pub fn new(mut trackers: Vec<Tracker>) -> Self {
        trackers.shuffle(&mut rand::rng());
        Tier {
            trackers,
            index: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    fn load_index(&self) -> usize {
        let index = self.index.load(Ordering::SeqCst);
        if index >= self.trackers.len() {
            0
        } else {
            index
        }
    }

    pub fn url(&self) -> &str {
        self.trackers[self.load_index()].url()
    }

    #[instrument(skip(self, req), fields(url = self.url()))]
    pub async fn announce(&self, req: &AnnounceRequest) -> TrackerResult<AnnounceResponse> {
        let index = self.load_index();
        let result = Box::pin(self.trackers[index].announce(req)).await;
        if result.is_err() {
            let next = (index + 1) % self.trackers.len();
            let _ = self
                .index
                .compare_exchange(index, next, Ordering::SeqCst, Ordering::SeqCst);
        }
        result
    }
}
