//! Raw notification payloads and the opaque state blob compared by the debouncer.

use serde::Serialize;

/// One `Name`/`Value` pair from a notification's data section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimpleItem {
    pub name: String,
    pub value: String,
}

impl SimpleItem {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A notification as delivered by a subscription source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawNotification {
    /// Full topic, e.g. `tns1:RuleEngine/CellMotionDetector/Motion`.
    pub topic: String,
    pub items: Vec<SimpleItem>,
}

impl RawNotification {
    pub fn new(topic: impl Into<String>, items: Vec<SimpleItem>) -> Self {
        Self {
            topic: topic.into(),
            items,
        }
    }
}

/// Flat key/value payload built by folding a notification's item list.
///
/// Keeps first-seen key order; a repeated key overwrites the earlier value in
/// place. Equality is literal over keys, values and order, so two payloads
/// expressing the same boolean through different fields are different states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventState {
    fields: Vec<(String, String)>,
}

impl EventState {
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a SimpleItem>) -> Self {
        items
            .into_iter()
            .fold(Self::default(), |mut state, item| {
                state.insert(&item.name, &item.value);
                state
            })
    }

    fn insert(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for EventState {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut state = Self::default();
        for (name, value) in iter {
            state.insert(&name, &value);
        }
        state
    }
}

/// State value delivered to a handler and stored as a debounce record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RawState {
    /// Synthetic "no event" state sent once per device at startup.
    Baseline,
    /// Payload reported by the device.
    Reported(EventState),
}

impl RawState {
    /// Extract the boolean carried by this state.
    ///
    /// The first field present wins, then the fallback. Absent fields and the
    /// baseline read as `false`.
    pub fn flag(&self, (primary, fallback): (&str, &str)) -> bool {
        match self {
            RawState::Baseline => false,
            RawState::Reported(state) => state
                .get(primary)
                .or_else(|| state.get(fallback))
                .is_some_and(parse_bool),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}
