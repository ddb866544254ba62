//! Identity and clock primitives for runs and workers.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};

const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// A fresh 128-bit random value (a v4 UUID's bit pattern, not its
/// hyphenated textual form) rendered as unpadded base-32.
fn random_base32() -> String {
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut acc: u32 = 0;
    let mut acc_bits = 0u32;
    for b in bytes {
        acc = (acc << 8) | b as u32;
        acc_bits += 8;
        while acc_bits >= 5 {
            acc_bits -= 5;
            let idx = (acc >> acc_bits) & 0x1f;
            out.push(BASE32_ALPHABET[idx as usize] as char);
        }
    }
    if acc_bits > 0 {
        let idx = (acc << (5 - acc_bits)) & 0x1f;
        out.push(BASE32_ALPHABET[idx as usize] as char);
    }
    out
}

/// Identifies a single worker within a run's tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SpanId(String);

impl SpanId {
    pub fn new() -> Self {
        Self(random_base32())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SpanId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a run: the tree of workers rooted at a single top-level query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(format!("run_{}", random_base32()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Clock abstraction so tests can control elapsed time without sleeping.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> i64;
    fn wall_now(&self) -> DateTime<Utc>;
}

/// Real wall-clock/monotonic clock backed by `std::time::Instant`.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests; advanced explicitly by callers.
pub struct FakeClock {
    now_us: Mutex<i64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now_us: Mutex::new(0),
        }
    }

    pub fn advance_us(&self, delta: i64) {
        *self.now_us.lock().unwrap() += delta;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> i64 {
        *self.now_us.lock().unwrap()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_ids_are_unique() {
        let a = SpanId::new();
        let b = SpanId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26); // 16 bytes -> ceil(128/5) = 26 base32 chars
    }

    #[test]
    fn run_ids_are_prefixed() {
        let id = RunId::new();
        assert!(id.as_str().starts_with("run_"));
    }

    #[test]
    fn fake_clock_advances_explicitly() {
        let clock = FakeClock::new();
        assert_eq!(clock.now_us(), 0);
        clock.advance_us(1_000);
        assert_eq!(clock.now_us(), 1_000);
    }
}
