//! Extraction of the few values the bridge needs from ONVIF SOAP responses.
//!
//! Matching is on local element names only. Cameras disagree on namespace
//! prefixes, so `tt:SimpleItem`, `tt1:SimpleItem` and `SimpleItem` are all
//! the same element here.

use crate::error::{BridgeError, Result};
use crate::events::{RawNotification, SimpleItem};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Local names along the path from the root to the current element.
#[derive(Default)]
struct ElementPath {
    names: Vec<Vec<u8>>,
}

impl ElementPath {
    fn push(&mut self, element: &BytesStart<'_>) {
        self.names.push(element.local_name().as_ref().to_vec());
    }

    fn pop(&mut self) {
        self.names.pop();
    }

    /// Whether the path ends with `suffix`.
    fn ends_with(&self, suffix: &[&str]) -> bool {
        suffix.len() <= self.names.len()
            && self.names[self.names.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(name, expected)| name.as_slice() == expected.as_bytes())
    }
}

fn reader(xml: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    reader
}

/// Text of the first element whose path ends with `suffix`.
pub fn find_text(xml: &str, suffix: &[&str]) -> Result<Option<String>> {
    let mut reader = reader(xml);
    let mut path = ElementPath::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => path.push(&e),
            Event::End(_) => path.pop(),
            Event::Text(text) if path.ends_with(suffix) => {
                return Ok(Some(text.unescape()?.trim().to_string()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Event service address from a `GetCapabilitiesResponse`.
pub fn event_service_address(xml: &str) -> Result<String> {
    find_text(xml, &["Events", "XAddr"])?.ok_or(BridgeError::MissingElement("XAddr"))
}

/// Pull-point address from a `CreatePullPointSubscriptionResponse`.
pub fn subscription_address(xml: &str) -> Result<String> {
    find_text(xml, &["SubscriptionReference", "Address"])?
        .ok_or(BridgeError::MissingElement("Address"))
}

/// Human-readable reason of a SOAP 1.2 (or 1.1) fault, if the body is one.
pub fn fault_reason(xml: &str) -> Option<String> {
    let reason = find_text(xml, &["Fault", "Reason", "Text"])
        .ok()
        .flatten()
        .or_else(|| find_text(xml, &["Fault", "faultstring"]).ok().flatten());
    match reason {
        Some(reason) if !reason.is_empty() => Some(reason),
        _ => find_text(xml, &["Fault", "Code", "Subcode", "Value"])
            .ok()
            .flatten(),
    }
}

/// Notifications from a `PullMessagesResponse`.
///
/// Only the `SimpleItem`s under a message's `Data` element form the payload;
/// `Source` and `Key` items identify the emitter and are skipped. Messages
/// without a topic are dropped.
pub fn notifications(xml: &str) -> Result<Vec<RawNotification>> {
    let mut reader = reader(xml);
    let mut path = ElementPath::default();
    let mut notifications = Vec::new();
    let mut topic: Option<String> = None;
    let mut items: Vec<SimpleItem> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"NotificationMessage" {
                    topic = None;
                    items.clear();
                } else if e.local_name().as_ref() == b"SimpleItem" && path.ends_with(&["Data"]) {
                    items.extend(simple_item(&e)?);
                }
                path.push(&e);
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"SimpleItem" && path.ends_with(&["Data"]) {
                    items.extend(simple_item(&e)?);
                }
            }
            Event::Text(text)
                if path.ends_with(&["NotificationMessage", "Topic"]) =>
            {
                topic = Some(text.unescape()?.trim().to_string());
            }
            Event::End(e) => {
                path.pop();
                if e.local_name().as_ref() == b"NotificationMessage" {
                    match topic.take() {
                        Some(topic) => notifications
                            .push(RawNotification::new(topic, std::mem::take(&mut items))),
                        None => items.clear(),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(notifications)
}

fn simple_item(element: &BytesStart<'_>) -> Result<Option<SimpleItem>> {
    let mut name = None;
    let mut value = None;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        match attribute.key.local_name().as_ref() {
            b"Name" => name = Some(attribute.unescape_value()?.into_owned()),
            b"Value" => value = Some(attribute.unescape_value()?.into_owned()),
            _ => {}
        }
    }

    Ok(name.map(|name| SimpleItem::new(name, value.unwrap_or_default())))
}
