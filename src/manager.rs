//! Orchestration: wires the subscriber group's categories to publishing
//! handlers and rebuilds everything when the configuration changes.

use crate::config::{Config, TemplateConfig};
use crate::error::Result;
use crate::events::{EventCategory, EventHandler, RawState, SubscriberGroup, SubscriptionSource};
use crate::output::{BinaryState, Publication, PublishQueue, PublishSink};
use crate::templates::{TemplateValues, interpolate};
use futures_util::future::join_all;
use log::{info, warn};
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::task::JoinHandle;

/// Running bridge: one publish sink, one subscriber group at a time.
pub struct Manager {
    config: Config,
    sink: Arc<dyn PublishSink>,
    source: Arc<dyn SubscriptionSource>,
    queue: PublishQueue,
    queue_worker: JoinHandle<()>,
    group: SubscriberGroup,
}

impl Manager {
    /// Connect the sink, announce availability and subscribe every device.
    ///
    /// Only a failed connect or availability announcement is an error; device
    /// subscription failures are logged and leave that device idle.
    pub async fn start(
        config: Config,
        sink: Arc<dyn PublishSink>,
        source: Arc<dyn SubscriptionSource>,
    ) -> Result<Self> {
        info!("[Manager] Beginning initialization...");

        sink.connect().await?;
        sink.publish_service_status(BinaryState::On).await?;

        let (queue, queue_worker) = PublishQueue::spawn(sink.clone());
        let group = build_group(&config, source.clone(), &queue).await;

        info!(
            "[Manager] Running with {}/{} device(s) subscribed",
            group.device_ids().len(),
            config.onvif.len()
        );

        Ok(Self {
            config,
            sink,
            source,
            queue,
            queue_worker,
            group,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Devices with a live subscription.
    pub fn device_ids(&self) -> Vec<String> {
        self.group.device_ids()
    }

    /// Tear down every subscription and rebuild from `config`.
    ///
    /// Debounce records start over, so every device republishes its baseline.
    pub async fn reload(&mut self, config: Config) {
        if config.mqtt != self.config.mqtt {
            warn!("[Manager] MQTT settings changed; restart to apply them");
        }
        if config.subscription != self.config.subscription {
            warn!("[Manager] Subscription settings changed; restart to apply them");
        }

        info!(
            "[Manager] Rebuilding subscriptions for {} device(s)",
            config.onvif.len()
        );
        self.group.destroy().await;
        self.group = build_group(&config, self.source.clone(), &self.queue).await;
        self.config = config;
    }

    /// Release all subscriptions, drain pending publications and announce
    /// unavailability.
    pub async fn shutdown(self) {
        info!("[Manager] Shutting down");
        self.group.destroy().await;
        drop(self.group);

        if let Err(e) = self.queue.flush().await {
            warn!("[Manager] Pending publications lost: {}", e);
        }
        self.queue_worker.abort();

        if let Err(e) = self.sink.publish_service_status(BinaryState::Off).await {
            warn!("[Manager] Failed to announce shutdown: {}", e);
        }
    }
}

/// Fresh group with one publishing handler per sensor category and every
/// configured device seeded and subscribed.
async fn build_group(
    config: &Config,
    source: Arc<dyn SubscriptionSource>,
    queue: &PublishQueue,
) -> SubscriberGroup {
    let group = SubscriberGroup::new(source);
    let templates = Arc::new(config.api.templates.clone());

    for category in EventCategory::iter().filter(|c| c.is_dispatchable()) {
        group.with_callback(
            category,
            sensor_handler(category, queue.clone(), templates.clone()),
        );
    }

    // Baseline first, so an event arriving right after the subscription is
    // established is never overwritten by it.
    join_all(config.onvif.iter().map(|device| {
        let group = &group;
        async move {
            group.seed_baseline(&device.name);
            group.add_subscriber(device).await;
        }
    }))
    .await;

    group
}

/// Publish the configured templates, then the retained `ON`/`OFF` state on the
/// category's topic key.
fn sensor_handler(
    category: EventCategory,
    queue: PublishQueue,
    templates: Arc<Vec<TemplateConfig>>,
) -> EventHandler {
    Arc::new(move |device_id: &str, state: &RawState| -> Result<()> {
        let active = state.flag(category.state_fields());
        let topic_key = category.topic_key();
        let values = TemplateValues::for_event(device_id, topic_key, active);

        for template in templates.iter() {
            queue.push(Publication::new(
                device_id,
                interpolate(&template.subtopic, &values),
                interpolate(&template.template, &values),
                template.retain,
            ))?;
        }

        queue.push(Publication::sensor(
            device_id,
            topic_key,
            BinaryState::from(active),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, DeviceConfig};
    use crate::error::BridgeError;
    use crate::events::{EventFeed, NotificationSink, RawNotification, SimpleItem};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const MOTION_TOPIC: &str = "tns1:RuleEngine/CellMotionDetector/Motion";
    const SMART_TOPIC: &str = "tns1:RuleEngine/TPSmartEventDetector/TPSmartEvent";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum SinkCall {
        Connect,
        Publish(Publication),
        Status(BinaryState),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<SinkCall>>,
        refuse_connect: bool,
    }

    impl RecordingSink {
        fn calls(&self) -> Vec<SinkCall> {
            self.calls.lock().clone()
        }

        fn publications(&self) -> Vec<Publication> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    SinkCall::Publish(publication) => Some(publication),
                    _ => None,
                })
                .collect()
        }

        fn clear(&self) {
            self.calls.lock().clear();
        }
    }

    #[async_trait]
    impl PublishSink for RecordingSink {
        async fn connect(&self) -> Result<()> {
            if self.refuse_connect {
                return Err(BridgeError::MqttConnect("connection refused".into()));
            }
            self.calls.lock().push(SinkCall::Connect);
            Ok(())
        }

        async fn publish(
            &self,
            device_id: &str,
            subtopic: &str,
            payload: &str,
            retain: bool,
        ) -> Result<()> {
            self.calls.lock().push(SinkCall::Publish(Publication::new(
                device_id, subtopic, payload, retain,
            )));
            Ok(())
        }

        async fn publish_service_status(&self, state: BinaryState) -> Result<()> {
            self.calls.lock().push(SinkCall::Status(state));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSource {
        sinks: Mutex<HashMap<String, NotificationSink>>,
        unreachable: Vec<String>,
    }

    impl FakeSource {
        fn emit(&self, device: &str, topic: &str, items: &[(&str, &str)]) {
            let sink = self.sinks.lock().get(device).cloned().unwrap();
            sink(RawNotification::new(
                topic,
                items.iter().map(|(n, v)| SimpleItem::new(*n, *v)).collect(),
            ));
        }
    }

    struct NoopFeed;

    #[async_trait]
    impl EventFeed for NoopFeed {
        async fn teardown(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SubscriptionSource for FakeSource {
        async fn subscribe(
            &self,
            device: &DeviceConfig,
            sink: NotificationSink,
        ) -> Result<Box<dyn EventFeed>> {
            if self.unreachable.contains(&device.name) {
                return Err(BridgeError::Subscription("no route to host".into()));
            }
            self.sinks.lock().insert(device.name.clone(), sink);
            Ok(Box::new(NoopFeed))
        }
    }

    fn config(devices: &[&str], templates: Vec<TemplateConfig>) -> Config {
        Config {
            onvif: devices
                .iter()
                .map(|name| DeviceConfig {
                    name: name.to_string(),
                    hostname: "10.0.0.1".to_string(),
                    port: 80,
                    username: None,
                    password: None,
                })
                .collect(),
            api: ApiConfig { templates },
            ..Default::default()
        }
    }

    fn sensor(device: &str, key: &str, on: bool) -> Publication {
        Publication::sensor(device, key, BinaryState::from(on))
    }

    async fn flushed(manager: &Manager) {
        manager.queue.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_announces_and_seeds_baseline() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FakeSource::default());

        let manager = Manager::start(config(&["cam1"], vec![]), sink.clone(), source)
            .await
            .unwrap();
        flushed(&manager).await;

        let calls = sink.calls();
        assert_eq!(calls[0], SinkCall::Connect);
        assert_eq!(calls[1], SinkCall::Status(BinaryState::On));
        assert_eq!(
            sink.publications(),
            [
                sensor("cam1", "motion", false),
                sensor("cam1", "people", false),
                sensor("cam1", "line-cross", false),
                sensor("cam1", "vehicle", false),
                sensor("cam1", "animal", false),
            ]
        );
        assert_eq!(manager.device_ids(), ["cam1"]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let sink = Arc::new(RecordingSink {
            refuse_connect: true,
            ..Default::default()
        });
        let source = Arc::new(FakeSource::default());

        let result = Manager::start(config(&["cam1"], vec![]), sink.clone(), source).await;

        assert!(matches!(result, Err(BridgeError::MqttConnect(_))));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_event_publishes_templates_then_state() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FakeSource::default());
        let templates = vec![
            TemplateConfig {
                subtopic: "hass/${deviceId}/${eventType}".to_string(),
                template: r#"{"state": ${eventState}}"#.to_string(),
                retain: false,
            },
            TemplateConfig {
                subtopic: "raw".to_string(),
                template: "${onvifDeviceId}=${eventState}".to_string(),
                retain: true,
            },
        ];

        let manager = Manager::start(config(&["cam1"], templates), sink.clone(), source.clone())
            .await
            .unwrap();
        flushed(&manager).await;
        sink.clear();

        source.emit("cam1", MOTION_TOPIC, &[("IsMotion", "true")]);
        source.emit("cam1", MOTION_TOPIC, &[("IsMotion", "true")]);
        flushed(&manager).await;

        assert_eq!(
            sink.publications(),
            [
                Publication::new("cam1", "hass/cam1/motion", r#"{"state": true}"#, false),
                Publication::new("cam1", "raw", "cam1=true", true),
                sensor("cam1", "motion", true),
            ]
        );
    }

    #[tokio::test]
    async fn test_state_field_fallback_and_smart_events() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FakeSource::default());
        let manager = Manager::start(config(&["cam1"], vec![]), sink.clone(), source.clone())
            .await
            .unwrap();
        flushed(&manager).await;
        sink.clear();

        source.emit("cam1", MOTION_TOPIC, &[("State", "true")]);
        source.emit("cam1", SMART_TOPIC, &[("IsPet", "true")]);
        source.emit("cam1", SMART_TOPIC, &[("IsVehicle", "true")]);
        source.emit("cam1", SMART_TOPIC, &[("Other", "true")]);
        flushed(&manager).await;

        assert_eq!(
            sink.publications(),
            [
                sensor("cam1", "motion", true),
                sensor("cam1", "animal", true),
                sensor("cam1", "vehicle", true),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_device_still_gets_baseline() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FakeSource {
            unreachable: vec!["cam2".to_string()],
            ..Default::default()
        });

        let manager = Manager::start(config(&["cam1", "cam2"], vec![]), sink.clone(), source)
            .await
            .unwrap();
        flushed(&manager).await;

        assert_eq!(manager.device_ids(), ["cam1"]);
        let cam2: Vec<_> = sink
            .publications()
            .into_iter()
            .filter(|p| p.device_id == "cam2")
            .collect();
        assert_eq!(cam2.len(), 5);
    }

    #[tokio::test]
    async fn test_reload_rebuilds_group() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FakeSource::default());
        let mut manager = Manager::start(config(&["cam1"], vec![]), sink.clone(), source.clone())
            .await
            .unwrap();
        source.emit("cam1", MOTION_TOPIC, &[("IsMotion", "false")]);
        let stale = source.sinks.lock().get("cam1").cloned().unwrap();
        flushed(&manager).await;
        sink.clear();

        manager.reload(config(&["cam1", "cam3"], vec![])).await;
        flushed(&manager).await;

        let baseline: Vec<_> = sink
            .publications()
            .into_iter()
            .filter(|p| p.subtopic == "motion")
            .collect();
        assert_eq!(baseline.len(), 2);
        let mut devices = manager.device_ids();
        devices.sort();
        assert_eq!(devices, ["cam1", "cam3"]);
        assert_eq!(manager.config().onvif.len(), 2);

        sink.clear();
        stale(RawNotification::new(
            MOTION_TOPIC,
            vec![SimpleItem::new("IsMotion", "true")],
        ));
        flushed(&manager).await;
        assert!(sink.publications().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_announces_off() {
        let sink = Arc::new(RecordingSink::default());
        let source = Arc::new(FakeSource::default());
        let manager = Manager::start(config(&["cam1"], vec![]), sink.clone(), source.clone())
            .await
            .unwrap();
        source.emit("cam1", MOTION_TOPIC, &[("IsMotion", "true")]);

        manager.shutdown().await;

        let calls = sink.calls();
        assert_eq!(calls.last(), Some(&SinkCall::Status(BinaryState::Off)));
        assert_eq!(
            calls[calls.len() - 2],
            SinkCall::Publish(sensor("cam1", "motion", true))
        );
    }
}
