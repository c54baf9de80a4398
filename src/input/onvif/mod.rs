//! ONVIF camera events over the PullPoint interface.

pub mod client;
pub mod parser;
mod source;

pub use client::OnvifClient;
pub use source::{OnvifFeed, OnvifSource};
