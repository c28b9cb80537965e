//! Log throttling for retry loops
//!
//! Device lock acquisition retries once per second for up to half a minute.
//! Logging every attempt buries the decision lines an operator reads after an
//! unattended run, so repeated messages are collapsed and the number of
//! suppressed attempts is reported with the next message that gets through.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct KeyState {
    last_logged: Instant,
    suppressed: u32,
}

/// Limits how often the same message key is logged
///
/// ```rust
/// use std::time::Duration;
/// use cardsweep::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert_eq!(throttler.check("lock:/dev/sdb1"), Some(0));
/// assert_eq!(throttler.check("lock:/dev/sdb1"), None);
/// ```
#[derive(Debug)]
pub struct LogThrottler {
    keys: Mutex<HashMap<String, KeyState>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `Some(suppressed)` when the message should be logged now,
    /// where `suppressed` counts the messages dropped since the last one.
    /// Returns `None` while the key is throttled.
    pub fn check(&self, key: &str) -> Option<u32> {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        match keys.get_mut(key) {
            Some(state) if now.duration_since(state.last_logged) < self.interval => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = state.suppressed;
                state.last_logged = now;
                state.suppressed = 0;
                Some(suppressed)
            }
            None => {
                keys.insert(
                    key.to_string(),
                    KeyState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget a key, returning how many messages were suppressed since it
    /// was last logged.
    pub fn finish(&self, key: &str) -> u32 {
        self.keys
            .lock()
            .remove(key)
            .map(|state| state.suppressed)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}
