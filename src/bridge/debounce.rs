use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::hat::{Action, Direction, InputEvent};

/// Debounce settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DebounceSettings {
    pub enabled: bool,
    pub window_ms: u64,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 300,
        }
    }
}

/// Per-key debouncer for joystick events
///
/// Events sharing an `(action, direction)` pair that arrive less than one
/// window after the last accepted event of that pair are rejected. Rejections
/// do not move the window, so a steady stream of repeats still lets one event
/// through per window. Different pairs never influence each other.
#[derive(Debug, Clone)]
pub struct DebounceFilter {
    window: Duration,

    // Last accepted instant per key, at most one entry per action/direction pair
    last_accepted: HashMap<(Action, Direction), Instant>,
}

impl DebounceFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &DebounceSettings) -> Option<Self> {
        settings
            .enabled
            .then(|| Self::new(Duration::from_millis(settings.window_ms)))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides whether `event` observed at `now` passes the filter and records
    /// it if so.
    pub fn accept(&mut self, event: &InputEvent, now: Instant) -> bool {
        let key = (event.action, event.direction);

        if let Some(last) = self.last_accepted.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                debug!(
                    "Debounced {}_{} after {} ms",
                    event.action,
                    event.direction,
                    elapsed.as_millis()
                );
                return false;
            }
        }

        self.last_accepted.insert(key, now);
        true
    }

    /// Number of distinct keys seen so far
    pub fn tracked_keys(&self) -> usize {
        self.last_accepted.len()
    }
}
