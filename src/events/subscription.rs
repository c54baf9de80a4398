//! Subscription seam between event sources and the subscriber group.
//!
//! A [`SubscriptionSource`] establishes one live feed per device and pushes
//! every raw notification into the supplied [`NotificationSink`]. The feed
//! handle it returns is owned by a [`Subscription`] until it is released.

use super::state::RawNotification;
use crate::config::DeviceConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback receiving every raw notification of one device.
pub type NotificationSink = Arc<dyn Fn(RawNotification) + Send + Sync>;

/// Establishes live event feeds for devices.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Establish a feed for `device`. The source owns reconnection from here on.
    async fn subscribe(
        &self,
        device: &DeviceConfig,
        sink: NotificationSink,
    ) -> Result<Box<dyn EventFeed>>;
}

/// Handle to a live feed.
#[async_trait]
pub trait EventFeed: Send {
    /// Stop the feed and release its underlying resources. No further sink
    /// invocations happen once this returns.
    async fn teardown(self: Box<Self>) -> Result<()>;
}

/// One device's live connection to its event source.
pub struct Subscription {
    device_id: String,
    feed: Option<Box<dyn EventFeed>>,
}

impl Subscription {
    pub fn new(device_id: impl Into<String>, feed: Box<dyn EventFeed>) -> Self {
        Self {
            device_id: device_id.into(),
            feed: Some(feed),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_active(&self) -> bool {
        self.feed.is_some()
    }

    /// Give up ownership of the feed and tear it down.
    ///
    /// The handle is released even when teardown fails. Calling this again is
    /// a no-op.
    pub async fn release(&mut self) -> Result<()> {
        match self.feed.take() {
            Some(feed) => feed.teardown().await,
            None => Ok(()),
        }
    }
}
