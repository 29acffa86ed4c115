//! Event Bridge - joystick events to JSON lines
//!
//! Lifecycle of the bridge as a statum state machine:
//!
//! ```text
//! EventBridge<Idle> ──start()──► EventBridge<Running> ──run_until_cancelled()──► BridgeStats
//!   (devices owned)  clear LED,     poll ► debounce ► stamp ► write+flush ► flash
//!                    banner         ... until cancelled or the hardware fails
//! ```
//!
//! Whatever ends the run, the LED display is cleared and the stop banner is
//! written before the result is handed back.

use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::io::Write;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::debounce::{DebounceFilter, DebounceSettings};
use super::record::{OutputRecord, TimestampPolicy, Timestamper};
use crate::hat::{Action, HatError, InputEvent, JoystickHat, Rgb};
use crate::mqtt::MqttMirror;

pub const START_BANNER: &str = "Joystick monitor started";
pub const STOP_BANNER: &str = "Joystick monitor stopped";

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Where the start and stop banners are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BannerTarget {
    /// Interleaved with the JSON records on the event stream
    #[default]
    Events,
    /// On the diagnostic stream, leaving the event stream pure JSON
    Diagnostics,
}

/// LED feedback for pressed events
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct IndicatorSettings {
    pub enabled: bool,
    pub color: Rgb,
    pub hold_ms: u64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            color: (0, 255, 0),
            hold_ms: 100,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub timestamp: TimestampPolicy,
    pub banners: BannerTarget,
}

/// Everything the run loop needs to know
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeSettings {
    /// Idle time between two hardware polls
    pub poll_interval_ms: u64,
    pub debounce: DebounceSettings,
    pub indicator: IndicatorSettings,
    pub output: OutputSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            debounce: DebounceSettings::default(),
            indicator: IndicatorSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

/// Counters collected over one run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub polls: u64,
    pub received: u64,
    pub emitted: u64,
    pub suppressed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Hardware error: {0}")]
    HardwareError(#[from] HatError),

    #[error("Failed to write event stream: {0}")]
    OutputError(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Idle,
    Running,
}

#[machine]
pub struct EventBridge<S: BridgeState> {
    // Hardware handle, acquired once by the caller
    hat: Box<dyn JoystickHat>,

    // JSON records, one per line
    events: Box<dyn Write>,

    // Banners when routed away from the event stream
    diagnostics: Box<dyn Write>,

    settings: BridgeSettings,

    // None when debouncing is switched off
    debounce: Option<DebounceFilter>,

    timestamper: Timestamper,

    mirror: Option<MqttMirror>,

    stats: BridgeStats,
}

impl<S: BridgeState> EventBridge<S> {
    fn write_banner(&mut self, banner: &str) -> std::io::Result<()> {
        let target: &mut dyn Write = match self.settings.output.banners {
            BannerTarget::Events => self.events.as_mut(),
            BannerTarget::Diagnostics => self.diagnostics.as_mut(),
        };
        writeln!(target, "{}", banner)?;
        target.flush()
    }
}

impl EventBridge<Idle> {
    pub fn create(
        hat: Box<dyn JoystickHat>,
        events: Box<dyn Write>,
        diagnostics: Box<dyn Write>,
        settings: BridgeSettings,
        mirror: Option<MqttMirror>,
    ) -> Self {
        debug!("Creating Event Bridge with settings: {:?}", settings);

        let debounce = DebounceFilter::from_settings(&settings.debounce);
        match &debounce {
            Some(filter) => info!("Debounce enabled with {} ms window", filter.window().as_millis()),
            None => info!("Debounce disabled"),
        }
        let timestamper = Timestamper::new(settings.output.timestamp);

        Self::new(
            hat,
            events,
            diagnostics,
            settings,
            debounce,
            timestamper,
            mirror,
            BridgeStats::default(),
        )
    }

    /// Clears the display and announces the monitor
    pub fn start(mut self) -> Result<EventBridge<Running>, BridgeError> {
        self.hat.clear()?;
        self.write_banner(START_BANNER)?;
        info!(
            "Event Bridge started, polling every {} ms",
            self.settings.poll_interval_ms
        );
        Ok(self.transition())
    }
}

impl EventBridge<Running> {
    /// Runs until `cancel` fires or the hardware fails, then cleans up.
    ///
    /// A hardware or output failure is returned after cleanup; a failure during
    /// cleanup is only returned when the run itself ended cleanly.
    pub async fn run_until_cancelled(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<BridgeStats, BridgeError> {
        let outcome = self.run_loop(cancel).await;
        if let Err(e) = &outcome {
            error!("Event Bridge stopped by fault: {}", e);
        }

        let cleanup = self.shutdown().await;

        match (outcome, cleanup) {
            (Err(e), Err(cleanup_error)) => {
                warn!("Cleanup after fault also failed: {}", cleanup_error);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(cleanup_error)) => Err(cleanup_error),
            (Ok(()), Ok(())) => {
                info!("Event Bridge stopped: {:?}", self.stats);
                Ok(self.stats)
            }
        }
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);
        let mut last_stats_time = Instant::now();
        let mut last_stats = self.stats;

        loop {
            if cancel.is_cancelled() {
                info!("Stop requested");
                return Ok(());
            }

            let batch = self.hat.poll_events()?;
            self.stats.polls += 1;
            if !batch.is_empty() {
                debug!("Polled {} events", batch.len());
            }

            for event in batch {
                self.dispatch(event).await?;
            }

            let now = Instant::now();
            if now - last_stats_time >= STATS_INTERVAL {
                info!(
                    "Event Bridge stats: {} events received, {} emitted, {} debounced in last {} seconds",
                    self.stats.received - last_stats.received,
                    self.stats.emitted - last_stats.emitted,
                    self.stats.suppressed - last_stats.suppressed,
                    (now - last_stats_time).as_secs()
                );
                if let Some(filter) = &self.debounce {
                    debug!("Debounce tracking {} keys", filter.tracked_keys());
                }
                last_stats = self.stats;
                last_stats_time = now;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stop requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn dispatch(&mut self, event: InputEvent) -> Result<(), BridgeError> {
        self.stats.received += 1;

        if let Some(filter) = self.debounce.as_mut() {
            if !filter.accept(&event, Instant::now()) {
                self.stats.suppressed += 1;
                return Ok(());
            }
        }

        let record = OutputRecord::new(&event, self.timestamper.stamp_now());
        let line = record.to_json_line()?;
        writeln!(self.events, "{}", line)?;
        self.events.flush()?;
        self.stats.emitted += 1;
        debug!("Emitted {} at {}", event, record.timestamp);

        if let Some(mirror) = self.mirror.as_mut() {
            mirror.publish(&line);
        }

        if event.action == Action::Pressed && self.settings.indicator.enabled {
            self.flash().await?;
        }
        Ok(())
    }

    // Blocks event handling for the hold time
    async fn flash(&mut self) -> Result<(), BridgeError> {
        let indicator = &self.settings.indicator;
        self.hat.fill(indicator.color)?;
        tokio::time::sleep(Duration::from_millis(indicator.hold_ms)).await;
        self.hat.clear()?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), BridgeError> {
        debug!("Cleaning up Event Bridge");

        if let Some(mirror) = self.mirror.take() {
            mirror.shutdown().await;
        }

        let cleared = self.hat.clear();
        if let Err(e) = &cleared {
            warn!("Failed to clear LED display on shutdown: {}", e);
        }
        self.write_banner(STOP_BANNER)?;
        cleared?;
        Ok(())
    }
}
