//! Publishing side of the bridge.
//!
//! Handlers never talk to the broker directly. They push [`Publication`]s onto
//! a [`PublishQueue`], whose worker hands them to a [`PublishSink`] in order.

pub mod mqtt;
pub mod queue;

pub use mqtt::MqttPublisher;
pub use queue::PublishQueue;

use crate::error::Result;
use async_trait::async_trait;
use strum::{AsRefStr, Display, EnumString};

/// Binary sensor and service availability payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BinaryState {
    On,
    Off,
}

impl From<bool> for BinaryState {
    fn from(value: bool) -> Self {
        if value {
            BinaryState::On
        } else {
            BinaryState::Off
        }
    }
}

/// One message for the bus, addressed relative to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub device_id: String,
    pub subtopic: String,
    pub payload: String,
    pub retain: bool,
}

impl Publication {
    pub fn new(
        device_id: impl Into<String>,
        subtopic: impl Into<String>,
        payload: impl Into<String>,
        retain: bool,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            subtopic: subtopic.into(),
            payload: payload.into(),
            retain,
        }
    }

    /// Retained `ON`/`OFF` sensor state.
    pub fn sensor(device_id: &str, topic_key: &str, state: BinaryState) -> Self {
        Self::new(device_id, topic_key, state.as_ref(), true)
    }
}

/// Message bus the bridge publishes to.
#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Establish the broker connection.
    async fn connect(&self) -> Result<()>;

    /// Publish `payload` on the device-relative `subtopic`.
    async fn publish(&self, device_id: &str, subtopic: &str, payload: &str, retain: bool)
    -> Result<()>;

    /// Announce whether the bridge is available.
    async fn publish_service_status(&self, state: BinaryState) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_binary_state_payloads() {
        assert_eq!(BinaryState::On.to_string(), "ON");
        assert_eq!(BinaryState::Off.as_ref(), "OFF");
        assert_eq!(BinaryState::from(true), BinaryState::On);
        assert_eq!(BinaryState::from(false), BinaryState::Off);
        assert_eq!(BinaryState::from_str("ON").unwrap(), BinaryState::On);
    }

    #[test]
    fn test_sensor_publication_is_retained() {
        let publication = Publication::sensor("cam1", "line-cross", BinaryState::On);
        assert_eq!(
            publication,
            Publication::new("cam1", "line-cross", "ON", true)
        );
    }
}
