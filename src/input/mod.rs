//! Event sources feeding the subscriber group.
//!
//! Current input sources:
//! - `onvif`: ONVIF PullPoint event subscriptions

pub mod onvif;

pub use onvif::OnvifSource;
