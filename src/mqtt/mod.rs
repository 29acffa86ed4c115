//! Optional MQTT mirror of the event stream
//!
//! Every JSON line written to stdout can also be published to a broker topic,
//! which lets home automation setups subscribe to the joystick directly. The
//! mirror never blocks the bridge: publishes are queued with `try_publish` and
//! the connection is driven by a separate task on the same runtime.

pub mod mirror;

use serde::{Deserialize, Serialize};

pub use mirror::MqttMirror;

/// Broker connection and topic settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "sensehat-bridge".to_string(),
            topic: "home/sensehat/joystick".to_string(),
            keep_alive_secs: 5,
            username: None,
            password: None,
        }
    }
}
