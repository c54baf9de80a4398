//! `${key}` placeholder substitution for user-configured topics and payloads.

use std::collections::HashMap;

/// Values available to a template for one dispatched event.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    values: HashMap<&'static str, String>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Values for a sensor event: `deviceId` (also exposed as
    /// `onvifDeviceId`), `eventType` and `eventState`.
    pub fn for_event(device_id: &str, event_type: &str, event_state: bool) -> Self {
        Self::new()
            .with("deviceId", device_id)
            .with("onvifDeviceId", device_id)
            .with("eventType", event_type)
            .with("eventState", event_state.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Replace every `${key}` in `template` with its value.
///
/// Placeholders naming an unknown key, and an unterminated `${`, are copied
/// through unchanged.
pub fn interpolate(template: &str, values: &TemplateValues) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &after[..end];
        match values.get(key.trim()) {
            Some(value) => output.push_str(value),
            None => output.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolates_event_values() {
        let values = TemplateValues::for_event("front_door", "motion", true);

        assert_eq!(
            interpolate("hass/${deviceId}/${eventType}", &values),
            "hass/front_door/motion"
        );
        assert_eq!(
            interpolate(r#"{"state": ${eventState}}"#, &values),
            r#"{"state": true}"#
        );
    }

    #[test]
    fn test_device_id_alias() {
        let values = TemplateValues::for_event("cam1", "people", false);
        assert_eq!(
            interpolate("${onvifDeviceId}:${deviceId}", &values),
            "cam1:cam1"
        );
    }

    #[test]
    fn test_repeated_and_adjacent_placeholders() {
        let values = TemplateValues::new().with("a", "1").with("b", "2");
        assert_eq!(interpolate("${a}${b}${a}", &values), "121");
    }

    #[test]
    fn test_unknown_key_left_in_place() {
        let values = TemplateValues::new().with("a", "1");
        assert_eq!(interpolate("x/${missing}/${a}", &values), "x/${missing}/1");
    }

    #[test]
    fn test_unterminated_placeholder() {
        let values = TemplateValues::new().with("a", "1");
        assert_eq!(interpolate("${a} and ${a", &values), "1 and ${a");
    }

    #[test]
    fn test_plain_text_and_whitespace_in_key() {
        let values = TemplateValues::new().with("deviceId", "cam");
        assert_eq!(interpolate("no placeholders", &values), "no placeholders");
        assert_eq!(interpolate("${ deviceId }", &values), "cam");
        assert_eq!(interpolate("", &values), "");
        assert_eq!(interpolate("$deviceId {deviceId}", &values), "$deviceId {deviceId}");
    }
}
