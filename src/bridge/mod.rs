//! Joystick event bridge
//!
//! ```text
//! JoystickHat ──► DebounceFilter ──► Timestamper ──► OutputRecord ──► stdout (+ MQTT mirror)
//!                 (optional)                         (JSON line)
//! ```
//!
//! 1. [`debounce`] - per-key suppression of repeats inside a time window
//! 2. [`record`] - the JSON record and its timestamp policy
//! 3. [`event_bridge`] - the poll loop and its lifecycle

pub mod debounce;
pub mod event_bridge;
pub mod record;

pub use debounce::{DebounceFilter, DebounceSettings};
pub use event_bridge::{
    BannerTarget, BridgeError, BridgeSettings, BridgeStats, EventBridge, IndicatorSettings,
    OutputSettings, START_BANNER, STOP_BANNER,
};
pub use record::{OutputRecord, TimestampPolicy, Timestamper};
