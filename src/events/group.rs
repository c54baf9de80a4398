//! Subscriber group: the single entry point for raw notifications.
//!
//! Every device subscription feeds the group's ingestion function, which
//! classifies the topic, debounces the payload per category and device, and
//! hands changed states to the handler registered for that category.

use super::category::{Classification, EventCategory, classify_topic};
use super::debounce::DebounceTable;
use super::state::{EventState, RawNotification, RawState};
use super::subscription::{NotificationSink, Subscription, SubscriptionSource};
use crate::config::DeviceConfig;
use crate::error::Result;
use futures_util::future::join_all;
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use strum::{EnumCount, IntoEnumIterator};

/// Payload field that routes a smart event to [`EventCategory::Vehicle`].
pub const VEHICLE_FIELD: &str = "IsVehicle";

/// Payload field that routes a smart event to [`EventCategory::Animal`].
pub const ANIMAL_FIELD: &str = "IsPet";

/// Receives `(device_id, state)` for every state change of one category.
pub type EventHandler = Arc<dyn Fn(&str, &RawState) -> Result<()> + Send + Sync>;

/// Handler per category. Empty slots are no-ops.
#[derive(Default)]
struct HandlerTable {
    slots: [Option<EventHandler>; EventCategory::COUNT],
}

impl HandlerTable {
    fn set(&mut self, category: EventCategory, handler: EventHandler) {
        self.slots[category.index()] = Some(handler);
    }

    fn get(&self, category: EventCategory) -> Option<EventHandler> {
        self.slots[category.index()].clone()
    }
}

/// State shared with the notification sinks handed to subscription sources.
struct GroupCore {
    handlers: RwLock<HandlerTable>,
    debouncers: DebounceTable,
    closed: AtomicBool,
}

impl GroupCore {
    fn ingest(&self, device_id: &str, notification: &RawNotification) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(
                "[ONVIF] Dropping late notification from {} on {}",
                device_id, notification.topic
            );
            return;
        }

        let state = EventState::from_items(&notification.items);
        trace!(
            "[ONVIF] {} received {}: {:?}",
            device_id, notification.topic, state
        );

        match classify_topic(&notification.topic) {
            Classification::Unknown => {
                warn!(
                    "[ONVIF] Unknown event from {}: {}",
                    device_id, notification.topic
                );
            }
            Classification::Known(EventCategory::SmartEvent) => {
                self.resolve_smart_event(device_id, state);
            }
            Classification::Known(category) => {
                self.dispatch(category, device_id, RawState::Reported(state));
            }
        }
    }

    /// Re-classify a smart event by its payload and run the resolved
    /// category's debounce and handler.
    fn resolve_smart_event(&self, device_id: &str, state: EventState) {
        let (category, field) = if state.contains(VEHICLE_FIELD) {
            (EventCategory::Vehicle, VEHICLE_FIELD)
        } else if state.contains(ANIMAL_FIELD) {
            (EventCategory::Animal, ANIMAL_FIELD)
        } else {
            warn!(
                "[ONVIF] Unresolvable smart event from {}: {:?}",
                device_id, state
            );
            return;
        };

        // Only the discriminating field is recorded, so side fields such as
        // confidence never re-dispatch an unchanged detection.
        let resolved: EventState = state
            .iter()
            .filter(|(name, _)| *name == field)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        self.dispatch(category, device_id, RawState::Reported(resolved));
    }

    fn dispatch(&self, category: EventCategory, device_id: &str, state: RawState) {
        if !self
            .debouncers
            .get(category)
            .should_dispatch(device_id, &state)
        {
            debug!("[ONVIF] {} {} unchanged, skipping", device_id, category);
            return;
        }

        let Some(handler) = self.handlers.read().get(category) else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(device_id, &state))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    "[ONVIF] {} handler failed for {}: {}",
                    category, device_id, e
                );
            }
            Err(_) => {
                warn!("[ONVIF] {} handler panicked for {}", category, device_id);
            }
        }
    }
}

/// Owns the active subscriptions and the category handlers.
pub struct SubscriberGroup {
    core: Arc<GroupCore>,
    source: Arc<dyn SubscriptionSource>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriberGroup {
    /// Create an empty group whose subscriptions come from `source`.
    pub fn new(source: Arc<dyn SubscriptionSource>) -> Self {
        Self {
            core: Arc::new(GroupCore {
                handlers: RwLock::new(HandlerTable::default()),
                debouncers: DebounceTable::new(),
                closed: AtomicBool::new(false),
            }),
            source,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Replace the handler for `category`. Debounce records are kept.
    pub fn with_callback(&self, category: EventCategory, handler: EventHandler) {
        self.core.handlers.write().set(category, handler);
    }

    /// Subscribe to `device` and route its notifications into this group.
    ///
    /// Establishment failures are logged and leave the device without a
    /// subscription; they never affect other devices.
    pub async fn add_subscriber(&self, device: &DeviceConfig) {
        if self.is_destroyed() {
            warn!(
                "[ONVIF] Not subscribing {}: group is destroyed",
                device.name
            );
            return;
        }

        let sink = self.sink_for(&device.name);
        match self.source.subscribe(device, sink).await {
            Ok(feed) => {
                let mut subscription = Subscription::new(device.name.clone(), feed);
                {
                    // Checked under the lock so destroy either sees this
                    // subscription or has already closed the group.
                    let mut subscriptions = self.subscriptions.lock();
                    if !self.is_destroyed() {
                        info!("[ONVIF] Subscribed to {}", device.name);
                        subscriptions.push(subscription);
                        return;
                    }
                }

                info!(
                    "[ONVIF] Group destroyed while subscribing {}, releasing",
                    device.name
                );
                if let Err(e) = subscription.release().await {
                    warn!(
                        "[ONVIF] Failed to tear down subscription for {}: {}",
                        device.name, e
                    );
                }
            }
            Err(e) => {
                warn!("[ONVIF] Failed to subscribe to {}: {}", device.name, e);
            }
        }
    }

    /// Run the synthetic "no event" state through every dispatchable category
    /// of `device_id`.
    pub fn seed_baseline(&self, device_id: &str) {
        if self.is_destroyed() {
            return;
        }
        for category in EventCategory::iter().filter(|c| c.is_dispatchable()) {
            self.core.dispatch(category, device_id, RawState::Baseline);
        }
    }

    /// Feed one raw notification through classification, debounce and dispatch.
    pub fn ingest(&self, device_id: &str, notification: &RawNotification) {
        self.core.ingest(device_id, notification);
    }

    /// Sink that forwards into this group for as long as the group is alive.
    pub fn sink_for(&self, device_id: &str) -> NotificationSink {
        let core: Weak<GroupCore> = Arc::downgrade(&self.core);
        let device_id = device_id.to_string();
        Arc::new(move |notification: RawNotification| {
            if let Some(core) = core.upgrade() {
                core.ingest(&device_id, &notification);
            }
        })
    }

    /// Names of the devices with an active subscription.
    pub fn device_ids(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|s| s.device_id().to_string())
            .collect()
    }

    /// Last state delivered for `device_id` in `category`, if any.
    pub fn last_state(&self, category: EventCategory, device_id: &str) -> Option<RawState> {
        self.core.debouncers.get(category).last_state(device_id)
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting notifications, release every subscription and discard
    /// the debounce records.
    ///
    /// Teardown failures are logged; the remaining subscriptions are still
    /// released. Safe to call more than once.
    pub async fn destroy(&self) {
        self.core.closed.store(true, Ordering::SeqCst);

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if !subscriptions.is_empty() {
            info!(
                "[ONVIF] Releasing {} subscription(s)",
                subscriptions.len()
            );
        }

        let releases = subscriptions.into_iter().map(|mut subscription| async move {
            if let Err(e) = subscription.release().await {
                warn!(
                    "[ONVIF] Failed to tear down subscription for {}: {}",
                    subscription.device_id(),
                    e
                );
            }
        });
        join_all(releases).await;

        self.core.debouncers.clear();
    }
}
