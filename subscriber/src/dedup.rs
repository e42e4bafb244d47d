//! Short-window duplicate message suppression.
//!
//! A flush racing a connection replacement can deliver the same serialized
//! batch twice. Fingerprinting the raw text and dropping repeats seen
//! within a small window makes redelivery harmless.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

/// Bytes of the raw message hashed into the fingerprint. Batches share a
/// prefix only up to their first differing event, so this is plenty.
const FINGERPRINT_PREFIX_BYTES: usize = 128;

/// Compute the cheap fingerprint of a raw message.
pub fn fingerprint(raw: &str) -> String {
    let prefix = &raw.as_bytes()[..raw.len().min(FINGERPRINT_PREFIX_BYTES)];
    let digest = Sha256::digest(prefix);
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fingerprints seen recently, pruned lazily on each observation.
pub struct RecentFingerprints {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl RecentFingerprints {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Record a message. Returns `true` when it is fresh, `false` when the
    /// same fingerprint was already observed within the window.
    pub fn observe(&mut self, raw: &str, now: Instant) -> bool {
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) < self.window);

        let print = fingerprint(raw);
        match self.seen.get(&print) {
            Some(_) => false,
            None => {
                self.seen.insert(print, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_within_window_is_suppressed() {
        let mut recent = RecentFingerprints::new(Duration::from_secs(5));
        let now = Instant::now();
        assert!(recent.observe("{\"type\":\"rfid-log\",\"data\":{\"id\":1}}", now));
        assert!(!recent.observe("{\"type\":\"rfid-log\",\"data\":{\"id\":1}}", now));
    }

    #[test]
    fn duplicate_after_window_is_fresh_again() {
        let mut recent = RecentFingerprints::new(Duration::from_secs(5));
        let now = Instant::now();
        assert!(recent.observe("payload", now));
        assert!(!recent.observe("payload", now + Duration::from_secs(4)));
        assert!(recent.observe("payload", now + Duration::from_secs(6)));
    }

    #[test]
    fn different_messages_do_not_collide() {
        let mut recent = RecentFingerprints::new(Duration::from_secs(5));
        let now = Instant::now();
        assert!(recent.observe("{\"type\":\"rfid-log\",\"data\":{\"id\":1}}", now));
        assert!(recent.observe("{\"type\":\"rfid-log\",\"data\":{\"id\":2}}", now));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = fingerprint("hello");
        assert_eq!(a, fingerprint("hello"));
        assert_eq!(a.len(), 16);
    }
}
