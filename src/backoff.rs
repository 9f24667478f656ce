//! Exponential backoff shared by the UDP tracker transport and the periodic
//! announcer: 5s initial, factor 2, capped at 30 minutes, 0.5 randomization
//! factor.
use rand::Rng;
use std::time::Duration;

#[derive(Clone)]
pub struct Backoff {
    initial: Duration,
    factor: u32,
    cap: Duration,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            initial: Duration::from_secs(5),
            factor: 2,
            cap: Duration::from_secs(30 * 60),
            jitter: 0.5,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, factor: u32, cap: Duration, jitter: f64) -> Self {
        Backoff {
            initial,
            factor,
            cap,
            jitter,
        }
    }

    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * (self.factor as f64).powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter_factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base * jitter_factor).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_and_caps() {
        let b = Backoff::default();
        assert_eq!(b.base_delay(0), Duration::from_secs(5));
        assert_eq!(b.base_delay(1), Duration::from_secs(10));
        assert_eq!(b.base_delay(2), Duration::from_secs(20));
        assert_eq!(b.base_delay(20), Duration::from_secs(30 * 60));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let b = Backoff::default();
        for attempt in 0..5 {
            let base = b.base_delay(attempt).as_secs_f64();
            for _ in 0..20 {
                let d = b.delay(attempt).as_secs_f64();
                assert!(d >= base * 0.5 - 0.001);
                assert!(d <= base * 1.5 + 0.001);
            }
        }
    }
}
