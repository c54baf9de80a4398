//! Event subscription, classification and debounce core.
//!
//! Raw notifications flow from a [`Subscription`] into the
//! [`SubscriberGroup`], which classifies them, suppresses repeated states per
//! device and category, and hands state changes to the registered handlers.

pub mod category;
pub mod debounce;
pub mod group;
pub mod state;
pub mod subscription;

pub use category::{Classification, EventCategory, classify, classify_topic};
pub use debounce::{DebounceTable, StateDebouncer};
pub use group::{EventHandler, SubscriberGroup};
pub use state::{EventState, RawNotification, RawState, SimpleItem};
pub use subscription::{EventFeed, NotificationSink, Subscription, SubscriptionSource};
