//! Hardware collaborator for the event bridge
//!
//! The bridge only needs three things from the board:
//!
//! 1. [`JoystickHat::poll_events`] - pending joystick events, possibly none
//! 2. [`JoystickHat::fill`] - paint the whole LED display in one color
//! 3. [`JoystickHat::clear`] - switch the LED display off
//!
//! [`sense_hat`] implements this for the Raspberry Pi Sense HAT on Linux.

pub mod sense_hat;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use sense_hat::SenseHat;

/// RGB color as stored in the configuration
pub type Rgb = (u8, u8, u8);

pub const BLACK: Rgb = (0, 0, 0);

/// What happened to the joystick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Pressed,
    Released,
    Held,
}

/// Which way the joystick was pushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Middle,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pressed => "pressed",
            Action::Released => "released",
            Action::Held => "held",
        }
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Middle => "middle",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single joystick event as reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputEvent {
    pub action: Action,
    pub direction: Direction,
}

impl InputEvent {
    pub fn new(action: Action, direction: Direction) -> Self {
        Self { action, direction }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.action, self.direction)
    }
}

/// Errors raised by the hardware backend
#[derive(Debug, thiserror::Error)]
pub enum HatError {
    /// No device with the expected name was found during discovery
    #[error("No {kind} device named {name:?} found in {}", searched.display())]
    DeviceNotFound {
        kind: &'static str,
        name: String,
        searched: PathBuf,
    },

    /// Opening a device node failed
    #[error("Failed to open {}: {source}", path.display())]
    OpenError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the joystick failed, usually because the device went away
    #[error("Failed to read joystick events: {0}")]
    ReadError(#[source] std::io::Error),

    /// Writing to the LED framebuffer failed
    #[error("Failed to write LED display: {0}")]
    DisplayError(#[source] std::io::Error),
}

/// The slice of a joystick board the bridge talks to
pub trait JoystickHat {
    /// Returns every event that arrived since the last call. Must not block
    /// waiting for new input.
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, HatError>;

    /// Paints every LED in `color`
    fn fill(&mut self, color: Rgb) -> Result<(), HatError>;

    fn clear(&mut self) -> Result<(), HatError> {
        self.fill(BLACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&Action::Pressed).unwrap(),
            "\"pressed\""
        );
        assert_eq!(
            serde_json::to_string(&Direction::Middle).unwrap(),
            "\"middle\""
        );
        let held: Action = serde_json::from_str("\"held\"").unwrap();
        assert_eq!(held, Action::Held);
    }

    #[test]
    fn display_matches_serialized_tag() {
        for action in [Action::Pressed, Action::Released, Action::Held] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action));
        }
        let event = InputEvent::new(Action::Released, Direction::Left);
        assert_eq!(event.to_string(), "released/left");
    }
}
