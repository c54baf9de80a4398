//! ONVIF PullPoint subscription source.
//!
//! Each subscribed camera gets a background task that long-polls its pull
//! point, renews it at half its lifetime and re-creates it after failures.

use super::client::OnvifClient;
use crate::config::{DeviceConfig, SubscriptionConfig};
use crate::error::{BridgeError, Result};
use crate::events::{EventFeed, NotificationSink, SubscriptionSource};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Slack on top of the long-poll timeout before an HTTP request is abandoned.
const REQUEST_MARGIN: Duration = Duration::from_secs(10);

/// Upper bound for the best-effort unsubscribe on shutdown.
const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound for a feed's task to stop before it is aborted.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates PullPoint feeds for cameras.
#[derive(Debug, Clone, Default)]
pub struct OnvifSource {
    settings: SubscriptionConfig,
}

impl OnvifSource {
    pub fn new(settings: SubscriptionConfig) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SubscriptionSource for OnvifSource {
    async fn subscribe(
        &self,
        device: &DeviceConfig,
        sink: NotificationSink,
    ) -> Result<Box<dyn EventFeed>> {
        let client = OnvifClient::new(device, self.settings.pull_timeout() + REQUEST_MARGIN)?;
        let pull_point = PullPoint::create(&client, &self.settings).await?;
        info!(
            "[ONVIF] {} pull point created at {}",
            device.name, pull_point.address
        );

        let cancel = CancellationToken::new();
        let pull_loop = PullLoop {
            device_id: device.name.clone(),
            client,
            settings: self.settings.clone(),
            sink,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(pull_loop.run(pull_point));

        Ok(Box::new(OnvifFeed::new(device.name.clone(), cancel, task)))
    }
}

/// A live pull point and when it is due for renewal.
struct PullPoint {
    address: String,
    renew_at: Instant,
}

impl PullPoint {
    async fn create(client: &OnvifClient, settings: &SubscriptionConfig) -> Result<Self> {
        let event_url = client.event_service_address().await;
        let address = client
            .create_pull_point(&event_url, settings.termination())
            .await?;
        Ok(Self {
            address,
            renew_at: Instant::now() + settings.termination() / 2,
        })
    }
}

struct PullLoop {
    device_id: String,
    client: OnvifClient,
    settings: SubscriptionConfig,
    sink: NotificationSink,
    cancel: CancellationToken,
}

impl PullLoop {
    async fn run(self, mut pull_point: PullPoint) {
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.poll(&mut pull_point) => result,
            };

            if let Err(e) = result {
                warn!(
                    "[ONVIF] {} pull point failed: {}, reconnecting in {:?}",
                    self.device_id,
                    e,
                    self.settings.reconnect_delay()
                );
                match self.reconnect().await {
                    Some(fresh) => pull_point = fresh,
                    None => return,
                }
            }
        }

        debug!("[ONVIF] {} unsubscribing", self.device_id);
        match tokio::time::timeout(
            UNSUBSCRIBE_TIMEOUT,
            self.client.unsubscribe(&pull_point.address),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[ONVIF] {} unsubscribe failed: {}", self.device_id, e),
            Err(_) => debug!("[ONVIF] {} unsubscribe timed out", self.device_id),
        }
        info!("[ONVIF] {} feed stopped", self.device_id);
    }

    /// Renew if due, then pull one batch into the sink.
    async fn poll(&self, pull_point: &mut PullPoint) -> Result<()> {
        if Instant::now() >= pull_point.renew_at {
            self.client
                .renew(&pull_point.address, self.settings.termination())
                .await?;
            pull_point.renew_at = Instant::now() + self.settings.termination() / 2;
            debug!("[ONVIF] {} pull point renewed", self.device_id);
        }

        let notifications = self
            .client
            .pull_messages(
                &pull_point.address,
                self.settings.pull_timeout(),
                self.settings.message_limit,
            )
            .await?;

        for notification in notifications {
            if self.cancel.is_cancelled() {
                break;
            }
            (self.sink)(notification);
        }
        Ok(())
    }

    /// Re-create the pull point until it works. `None` once cancelled.
    async fn reconnect(&self) -> Option<PullPoint> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.settings.reconnect_delay()) => {}
            }

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                attempt = PullPoint::create(&self.client, &self.settings) => attempt,
            };

            match attempt {
                Ok(pull_point) => {
                    info!("[ONVIF] {} reconnected", self.device_id);
                    return Some(pull_point);
                }
                Err(e) => warn!("[ONVIF] {} reconnect failed: {}", self.device_id, e),
            }
        }
    }
}

/// Handle to a running pull loop.
///
/// Dropping the handle without a teardown still cancels the loop.
pub struct OnvifFeed {
    device_id: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    teardown_timeout: Duration,
}

impl OnvifFeed {
    fn new(device_id: String, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            device_id,
            cancel,
            task: Some(task),
            teardown_timeout: TEARDOWN_TIMEOUT,
        }
    }
}

#[async_trait]
impl EventFeed for OnvifFeed {
    async fn teardown(mut self: Box<Self>) -> Result<()> {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.teardown_timeout, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::Subscription(format!(
                "{} pull task failed: {}",
                self.device_id, e
            ))),
            Err(_) => {
                task.abort();
                Err(BridgeError::Subscription(format!(
                    "{} pull task did not stop within {:?}, aborted",
                    self.device_id, self.teardown_timeout
                )))
            }
        }
    }
}

impl Drop for OnvifFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RawNotification;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn feed(cancel: CancellationToken, task: JoinHandle<()>) -> Box<OnvifFeed> {
        let mut feed = OnvifFeed::new("cam1".to_string(), cancel, task);
        feed.teardown_timeout = Duration::from_millis(50);
        Box::new(feed)
    }

    #[tokio::test]
    async fn test_teardown_waits_for_cooperative_task() {
        let cancel = CancellationToken::new();
        let stopped = Arc::new(AtomicBool::new(false));

        let token = cancel.clone();
        let flag = stopped.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        tokio_test::assert_ok!(feed(cancel, task).teardown().await);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_teardown_aborts_stuck_task() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let result = feed(cancel.clone(), task).teardown().await;

        assert!(matches!(result, Err(BridgeError::Subscription(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_drop_cancels_loop() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { token.cancelled().await });

        drop(feed(cancel.clone(), task));

        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_subscribe_fails_for_unreachable_camera() {
        let source = OnvifSource::new(SubscriptionConfig {
            pull_timeout_secs: 1,
            ..Default::default()
        });
        let device = DeviceConfig {
            name: "cam1".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 1,
            username: None,
            password: None,
        };
        let sink: NotificationSink = Arc::new(|_: RawNotification| {});

        let result = source.subscribe(&device, sink).await;

        assert!(matches!(result, Err(BridgeError::Http(_))));
    }
}
