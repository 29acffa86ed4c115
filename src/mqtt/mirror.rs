use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::MqttSettings;

// Publishes that may queue up while the broker is unreachable
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct MqttMirror {
    client: AsyncClient,
    topic: String,
    driver: JoinHandle<()>,
    stop: CancellationToken,
    published: u64,
    dropped: u64,
}

impl MqttMirror {
    /// Connects in the background; the first publishes may be queued until the
    /// broker answers.
    pub fn spawn(settings: &MqttSettings) -> Self {
        info!(
            "Mirroring events to mqtt://{}:{} topic {}",
            settings.host, settings.port, settings.topic
        );

        let (client, eventloop) = AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY);
        let stop = CancellationToken::new();
        let driver = tokio::spawn(drive_connection(eventloop, stop.clone()));

        Self {
            client,
            topic: settings.topic.clone(),
            driver,
            stop,
            published: 0,
            dropped: 0,
        }
    }

    /// Queues `line` for publishing. Failures are logged and counted, never
    /// returned.
    pub fn publish(&mut self, line: &str) {
        match self
            .client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, line.as_bytes().to_vec())
        {
            Ok(()) => {
                self.published += 1;
                debug!("Queued MQTT publish on {}", self.topic);
            }
            Err(e) => {
                self.dropped += 1;
                warn!("Dropping MQTT publish on {}: {}", self.topic, e);
            }
        }
    }

    /// Sends DISCONNECT after everything already queued and waits for the
    /// connection task to flush it. Gives up after `DISCONNECT_TIMEOUT`.
    pub async fn shutdown(self) {
        info!(
            "Stopping MQTT mirror ({} queued, {} dropped)",
            self.published, self.dropped
        );
        let Self {
            client,
            mut driver,
            stop,
            ..
        } = self;
        stop.cancel();

        let closed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            if let Err(e) = client.disconnect().await {
                debug!("MQTT disconnect not queued: {}", e);
            }
            (&mut driver).await
        })
        .await;

        match closed {
            Ok(Ok(())) => debug!("MQTT connection closed"),
            Ok(Err(e)) => warn!("MQTT connection task failed: {}", e),
            Err(_) => {
                warn!(
                    "MQTT connection did not close within {:?}, aborting",
                    DISCONNECT_TIMEOUT
                );
                driver.abort();
            }
        }
    }
}

fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(1)));
    if let Some(username) = &settings.username {
        options.set_credentials(
            username.clone(),
            settings.password.clone().unwrap_or_default(),
        );
    }
    options
}

/// Drives the rumqttc event loop. Once `stop` fires the task keeps going
/// until the DISCONNECT has been written or the connection fails.
async fn drive_connection(mut eventloop: EventLoop, stop: CancellationToken) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("Connected to MQTT broker"),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(event) => debug!("MQTT event: {:?}", event),
            Err(e) if stop.is_cancelled() => {
                debug!("MQTT connection closed while stopping: {}", e);
                break;
            }
            Err(e) => {
                error!("MQTT connection error: {}", e);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn options_follow_settings() {
        let settings = MqttSettings {
            enabled: true,
            host: "10.1.3.200".to_string(),
            port: 1884,
            client_id: "hat-kitchen".to_string(),
            keep_alive_secs: 0,
            ..Default::default()
        };
        let options = mqtt_options(&settings);

        assert_eq!(options.broker_address(), ("10.1.3.200".to_string(), 1884));
        assert_eq!(options.client_id(), "hat-kitchen");
        assert_eq!(options.keep_alive(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn shutdown_finishes_without_a_broker() {
        let settings = MqttSettings {
            enabled: true,
            port: 1,
            ..Default::default()
        };
        let mut mirror = MqttMirror::spawn(&settings);

        mirror.publish(r#"{"action":"pressed","direction":"up","timestamp":"x"}"#);
        assert_eq!(mirror.published + mirror.dropped, 1);

        let stopped = tokio::time::timeout(Duration::from_secs(3), mirror.shutdown()).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn shutdown_sends_disconnect_after_queued_publishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut connect = [0u8; 256];
            let n = socket.read(&mut connect).await.unwrap();
            assert!(n > 0);
            assert_eq!(connect[0], 0x10);
            // CONNACK, session not present, accepted
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let mut rest = Vec::new();
            socket.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let settings = MqttSettings {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port,
            ..Default::default()
        };
        let mut mirror = MqttMirror::spawn(&settings);
        mirror.publish(r#"{"action":"held","direction":"left","timestamp":"x"}"#);
        mirror.shutdown().await;

        let received = tokio::time::timeout(Duration::from_secs(3), broker)
            .await
            .unwrap()
            .unwrap();
        let payload = br#""direction":"left""#;
        assert!(received.windows(payload.len()).any(|w| w == payload));
        assert!(received.ends_with(&[0xE0, 0x00]));
    }
}
