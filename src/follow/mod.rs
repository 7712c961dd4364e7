//! Live tailing: named subscriptions with a one-deep delivery slot.
//!
//! Publishing never waits on a follower. A follower whose slot is still
//! occupied misses the sample; a follower with a rate only takes a sample
//! once `rate_ms` has passed since the last one it was given.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

const VALUE_FRAME_TAG: &[u8; 3] = b"snp";
const TEXT_FRAME_TAG: &[u8; 3] = b"txt";

static NEXT_FOLLOWER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FollowerId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Value(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub reading: Reading,
}

impl Sample {
    pub fn value(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            reading: Reading::Value(value),
        }
    }

    pub fn text(timestamp_ms: i64, text: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            reading: Reading::Text(text.into()),
        }
    }

    /// Stream encoding: 3-byte tag, big-endian f64 millis, then the payload
    /// (big-endian f64 for values, UTF-8 for text).
    pub fn to_frame(&self) -> Vec<u8> {
        let ts = (self.timestamp_ms as f64).to_be_bytes();
        match &self.reading {
            Reading::Value(v) => {
                let mut frame = Vec::with_capacity(19);
                frame.extend_from_slice(VALUE_FRAME_TAG);
                frame.extend_from_slice(&ts);
                frame.extend_from_slice(&v.to_be_bytes());
                frame
            }
            Reading::Text(text) => {
                let mut frame = Vec::with_capacity(11 + text.len());
                frame.extend_from_slice(TEXT_FRAME_TAG);
                frame.extend_from_slice(&ts);
                frame.extend_from_slice(text.as_bytes());
                frame
            }
        }
    }
}

/// Registration handle. Clones refer to the same subscription.
#[derive(Debug, Clone)]
pub struct Follower {
    id: FollowerId,
    rate_ms: i64,
    slot: mpsc::Sender<Sample>,
}

impl Follower {
    /// `rate_ms` is the minimum spacing between delivered samples; 0 or
    /// negative delivers everything the slot can take.
    pub fn new(rate_ms: i64) -> (Follower, FollowerStream) {
        let id = FollowerId(NEXT_FOLLOWER_ID.fetch_add(1, Ordering::Relaxed));
        let (slot, rx) = mpsc::channel(1);
        (
            Follower {
                id,
                rate_ms: rate_ms.max(0),
                slot,
            },
            FollowerStream { id, rx },
        )
    }

    pub fn id(&self) -> FollowerId {
        self.id
    }

    pub fn rate_ms(&self) -> i64 {
        self.rate_ms
    }
}

/// Receiving end of a follower's slot.
#[derive(Debug)]
pub struct FollowerStream {
    id: FollowerId,
    rx: mpsc::Receiver<Sample>,
}

impl FollowerStream {
    pub fn id(&self) -> FollowerId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Sample> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Sample> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive for callers outside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Sample> {
        self.rx.blocking_recv()
    }
}

#[derive(Debug)]
struct RatedFollower {
    follower: Follower,
    last_sent_ms: i64,
}

#[derive(Debug, Default)]
pub struct FollowRegistry {
    streams: Mutex<HashMap<String, Vec<RatedFollower>>>,
}

impl FollowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `follower` under `name`. Returns false, after logging, if it
    /// is already registered there.
    pub fn follow(&self, name: &str, follower: &Follower) -> bool {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = streams.entry(name.to_string()).or_default();
        if entry.iter().any(|f| f.follower.id == follower.id) {
            log::error!("stream {name} is already being followed by this follower");
            return false;
        }
        entry.push(RatedFollower {
            follower: follower.clone(),
            last_sent_ms: 0,
        });
        if entry.len() == 1 {
            log::info!("first follower registered for {name}");
        } else {
            log::info!("new follower registered for {name}, count: {}", entry.len());
        }
        true
    }

    /// Remove `follower` from `name`; the name is dropped with its last
    /// follower. Returns false, after logging, if nothing matched.
    pub fn unfollow(&self, name: &str, follower: &Follower) -> bool {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = streams.get_mut(name) else {
            log::error!("tried to unfollow {name}, which is not being followed");
            return false;
        };
        let Some(pos) = entry.iter().position(|f| f.follower.id == follower.id) else {
            log::error!("failed to remove follower for {name}: not registered");
            return false;
        };
        entry.swap_remove(pos);
        log::info!("removed follower for {name}, {} remaining", entry.len());
        if entry.is_empty() {
            streams.remove(name);
            log::info!("no longer following {name}, removing");
        }
        true
    }

    /// Offer `sample` to every follower of `name`; returns how many took it.
    pub fn publish(&self, name: &str, sample: &Sample) -> usize {
        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = streams.get_mut(name) else {
            return 0;
        };

        let mut delivered = 0;
        for rated in entry.iter_mut() {
            if rated.follower.slot.capacity() == 0 {
                continue;
            }
            let rate = rated.follower.rate_ms;
            if rate > 0 && sample.timestamp_ms - rated.last_sent_ms < rate {
                continue;
            }
            if rated.follower.slot.try_send(sample.clone()).is_ok() {
                rated.last_sent_ms = sample.timestamp_ms;
                delivered += 1;
            }
        }
        delivered
    }

    pub fn follower_count(&self) -> usize {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.values().map(Vec::len).sum()
    }

    pub fn followers_of(&self, name: &str) -> usize {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.get(name).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_704_067_200_000;

    #[test]
    fn value_frame_layout() {
        let frame = Sample::value(1_000, 77.5).to_frame();
        assert_eq!(frame.len(), 19);
        assert_eq!(&frame[..3], b"snp");
        assert_eq!(f64::from_be_bytes(frame[3..11].try_into().unwrap()), 1_000.0);
        assert_eq!(f64::from_be_bytes(frame[11..].try_into().unwrap()), 77.5);

        let text = Sample::text(5, "fix acquired").to_frame();
        assert_eq!(&text[..3], b"txt");
        assert_eq!(&text[11..], b"fix acquired");
    }

    #[test]
    fn duplicate_and_unknown_registrations() {
        let registry = FollowRegistry::new();
        let (a, _rx_a) = Follower::new(0);
        let (b, _rx_b) = Follower::new(0);

        assert!(registry.follow("soc", &a));
        assert!(!registry.follow("soc", &a));
        assert!(registry.follow("soc", &b));
        assert_eq!(registry.followers_of("soc"), 2);

        assert!(!registry.unfollow("gps", &a));
        assert!(registry.unfollow("soc", &a));
        assert!(!registry.unfollow("soc", &a));
        assert!(registry.unfollow("soc", &b));
        assert_eq!(registry.follower_count(), 0);
        assert!(registry.streams.lock().unwrap().is_empty());
    }

    #[test]
    fn occupied_slot_skips_samples() {
        let registry = FollowRegistry::new();
        let (f, mut rx) = Follower::new(0);
        registry.follow("soc", &f);

        for i in 0..100 {
            registry.publish("soc", &Sample::value(T0 + i, i as f64));
        }
        // only the first fit in the slot; the rest were skipped
        assert_eq!(rx.try_recv(), Some(Sample::value(T0, 0.0)));
        assert_eq!(rx.try_recv(), None);

        assert_eq!(registry.publish("soc", &Sample::value(T0 + 200, 200.0)), 1);
        assert_eq!(rx.try_recv(), Some(Sample::value(T0 + 200, 200.0)));
    }

    #[test]
    fn rate_spacing_is_enforced() {
        let registry = FollowRegistry::new();
        let (f, mut rx) = Follower::new(1_000);
        registry.follow("battery_amps", &f);

        let mut seen = Vec::new();
        for i in 0..30 {
            let ts = T0 + i * 100;
            registry.publish("battery_amps", &Sample::value(ts, i as f64));
            while let Some(sample) = rx.try_recv() {
                seen.push(sample);
            }
        }
        let stamps: Vec<i64> = seen.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![T0, T0 + 1_000, T0 + 2_000]);
        assert!(stamps.windows(2).all(|w| w[1] - w[0] >= 1_000));
    }

    #[test]
    fn throttled_follower_does_not_starve_others() {
        let registry = FollowRegistry::new();
        let (slow, mut slow_rx) = Follower::new(1_000);
        let (fast, mut fast_rx) = Follower::new(0);
        registry.follow("soc", &slow);
        registry.follow("soc", &fast);

        let mut fast_seen = 0;
        let mut slow_seen = 0;
        for i in 0..10 {
            registry.publish("soc", &Sample::value(T0 + i * 100, i as f64));
            fast_seen += usize::from(fast_rx.try_recv().is_some());
            slow_seen += usize::from(slow_rx.try_recv().is_some());
        }
        assert_eq!(fast_seen, 10);
        assert_eq!(slow_seen, 1);
    }

    #[tokio::test]
    async fn async_receiver_gets_published_sample() {
        let registry = FollowRegistry::new();
        let (f, mut rx) = Follower::new(0);
        registry.follow("gps", &f);
        registry.publish("gps", &Sample::text(T0, "fix"));
        assert_eq!(rx.recv().await, Some(Sample::text(T0, "fix")));
    }
}
