//! Semantic event categories and the vendor event-path classifier.
//!
//! Cameras report events on topics such as
//! `tns1:RuleEngine/CellMotionDetector/Motion`. The namespace before the first
//! `:` is discarded and the remaining event path is looked up in a static
//! table. Vendors are inconsistent, so one category may be reachable through
//! several path variants.

use strum::{AsRefStr, Display, EnumCount, EnumIter, IntoStaticStr};

/// Separates the topic namespace from the event path.
pub const NAMESPACE_DELIMITER: char = ':';

/// Fixed set of event kinds that all downstream logic keys on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumCount, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum EventCategory {
    Motion,
    People,
    LineCross,
    Vehicle,
    Animal,
    /// TP-Link smart detection. Resolved to [`Vehicle`](Self::Vehicle) or
    /// [`Animal`](Self::Animal) from the payload before dispatch.
    SmartEvent,
}

/// Known event paths. Vehicle and animal have no entry of their own: they are
/// only reached through smart event resolution.
const EVENT_PATHS: &[(&str, EventCategory)] = &[
    ("RuleEngine/MotionRegionDetector/Motion", EventCategory::Motion),
    ("RuleEngine/MotionRegionDetector/Motion//.", EventCategory::Motion),
    ("RuleEngine/CellMotionDetector/Motion", EventCategory::Motion),
    ("RuleEngine/CellMotionDetector/Motion//.", EventCategory::Motion),
    ("VideoSoure/MotionAlarm", EventCategory::Motion),
    ("VideoSource/MotionAlarm", EventCategory::Motion),
    ("RuleEngine/PeopleDetector/People", EventCategory::People),
    ("RuleEngine/PeopleDetector/People//.", EventCategory::People),
    ("RuleEngine/LineCrossDetector/LineCross", EventCategory::LineCross),
    ("RuleEngine/LineCrossDetector/LineCross//.", EventCategory::LineCross),
    ("RuleEngine/TPSmartEventDetector/TPSmartEvent", EventCategory::SmartEvent),
];

impl EventCategory {
    /// Index into per-category tables.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether events of this category are delivered to a handler directly.
    ///
    /// The meta-category never is; it is re-classified first.
    pub fn is_dispatchable(self) -> bool {
        self != EventCategory::SmartEvent
    }

    /// Topic key used when publishing, e.g. `motion` or `line-cross`.
    pub fn topic_key(self) -> &'static str {
        self.into()
    }

    /// Payload fields carrying the boolean state, in precedence order.
    ///
    /// Firmwares disagree on the field name, so the category-specific flag is
    /// tried first and the generic `State` field second.
    pub fn state_fields(self) -> (&'static str, &'static str) {
        match self {
            EventCategory::Motion => ("IsMotion", "State"),
            EventCategory::People => ("IsPeople", "State"),
            EventCategory::LineCross => ("IsLineCross", "State"),
            EventCategory::Vehicle => ("IsVehicle", "State"),
            EventCategory::Animal => ("IsPet", "State"),
            EventCategory::SmartEvent => ("State", "State"),
        }
    }
}

/// Result of classifying an event path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Known(EventCategory),
    Unknown,
}

/// Return the event path of a notification topic, without its namespace.
///
/// Topics with no namespace delimiter carry no event path.
pub fn event_path(topic: &str) -> Option<&str> {
    topic
        .split_once(NAMESPACE_DELIMITER)
        .map(|(_namespace, path)| path)
}

/// Map an event path to its category. Lookup is an exact match.
pub fn classify(event_path: &str) -> Classification {
    EVENT_PATHS
        .iter()
        .find(|(path, _)| *path == event_path)
        .map_or(Classification::Unknown, |(_, category)| {
            Classification::Known(*category)
        })
}

/// Classify a full notification topic.
pub fn classify_topic(topic: &str) -> Classification {
    event_path(topic).map_or(Classification::Unknown, classify)
}
