use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("ONVIF request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ONVIF {action} failed with status {status}: {reason}")]
    SoapFault {
        action: &'static str,
        status: u16,
        reason: String,
    },

    #[error("Malformed ONVIF response: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("ONVIF response is missing <{0}>")]
    MissingElement(&'static str),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("MQTT connection failed: {0}")]
    MqttConnect(String),

    #[error("Publish queue is closed")]
    PublishQueueClosed,

    #[error("Event handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soap_fault_display() {
        let err = BridgeError::SoapFault {
            action: "PullMessages",
            status: 400,
            reason: "Sender not authorized".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ONVIF PullMessages failed with status 400: Sender not authorized"
        );
    }

    #[test]
    fn test_missing_element_display() {
        let err = BridgeError::MissingElement("Address");
        assert_eq!(err.to_string(), "ONVIF response is missing <Address>");
    }
}
