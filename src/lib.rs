//! ONVIF to MQTT bridge library.
//!
//! Subscribes to camera events, reduces them to boolean sensor states per
//! event category and publishes every state change as a retained MQTT topic.

pub mod config;
pub mod error;
pub mod events;
pub mod input;
pub mod manager;
pub mod output;
pub mod templates;

pub use error::{BridgeError, Result};
pub use manager::Manager;
