//! MQTT publish sink.
//!
//! Device topics live under `<base>/<device>/<subtopic>`. Bridge availability
//! is announced on the retained `<base>/status` topic, with a last will so an
//! unclean exit also reads as `OFF`.

use super::{BinaryState, PublishSink};
use crate::config::MqttConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Topic suffix for the availability announcement.
pub const STATUS_SUBTOPIC: &str = "status";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

pub fn device_topic(base_topic: &str, device_id: &str, subtopic: &str) -> String {
    format!("{}/{}/{}", base_topic, device_id, subtopic)
}

pub fn status_topic(base_topic: &str) -> String {
    format!("{}/{}", base_topic, STATUS_SUBTOPIC)
}

/// rumqttc-backed [`PublishSink`].
pub struct MqttPublisher {
    client: AsyncClient,
    base_topic: String,
    connect_timeout: Duration,
    event_loop: Mutex<Option<EventLoop>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Create a publisher from configuration. Nothing is sent before
    /// [`PublishSink::connect`].
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(
            status_topic(&config.base_topic),
            BinaryState::Off.as_ref(),
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self {
            client,
            base_topic: config.base_topic.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            event_loop: Mutex::new(Some(event_loop)),
            event_task: Mutex::new(None),
        }
    }

    pub fn device_topic(&self, device_id: &str, subtopic: &str) -> String {
        device_topic(&self.base_topic, device_id, subtopic)
    }

    pub fn status_topic(&self) -> String {
        status_topic(&self.base_topic)
    }

    /// Send a clean disconnect and wait briefly for queued packets to go out.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("[MQTT] Disconnect request failed: {}", e);
        }

        let task = self.event_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("[MQTT] Event loop did not stop, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.get_mut().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl PublishSink for MqttPublisher {
    async fn connect(&self) -> Result<()> {
        let Some(event_loop) = self.event_loop.lock().take() else {
            debug!("[MQTT] Already connected");
            return Ok(());
        };

        let (connected_tx, connected_rx) = oneshot::channel();
        *self.event_task.lock() = Some(tokio::spawn(run_event_loop(
            event_loop,
            Some(connected_tx),
        )));

        match tokio::time::timeout(self.connect_timeout, connected_rx).await {
            Ok(Ok(())) => {
                info!("[MQTT] Connection established");
                Ok(())
            }
            Ok(Err(_)) => Err(BridgeError::MqttConnect(
                "event loop stopped before connecting".to_string(),
            )),
            Err(_) => Err(BridgeError::MqttConnect(format!(
                "no connection acknowledgement after {} seconds",
                self.connect_timeout.as_secs()
            ))),
        }
    }

    async fn publish(
        &self,
        device_id: &str,
        subtopic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<()> {
        let topic = self.device_topic(device_id, subtopic);
        debug!("[MQTT] {} <- {}", topic, payload);
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes())
            .await?;
        Ok(())
    }

    async fn publish_service_status(&self, state: BinaryState) -> Result<()> {
        info!("[MQTT] Service status {}", state);
        self.client
            .publish(self.status_topic(), QoS::AtLeastOnce, true, state.as_ref())
            .await?;
        Ok(())
    }
}

/// Drive the connection until a clean disconnect goes out.
///
/// Connection errors are retried after a fixed delay; rumqttc reconnects on
/// the next poll. `connected` fires on the first `ConnAck`.
async fn run_event_loop(mut event_loop: EventLoop, mut connected: Option<oneshot::Sender<()>>) {
    info!("[MQTT] Starting event loop");

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("[MQTT] ConnAck: {:?}", ack.code);
                if let Some(tx) = connected.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("[MQTT] Disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("[MQTT] Connection error: {:?}", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
