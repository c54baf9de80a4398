//! Minimal ONVIF SOAP client for the PullPoint event interface.

use super::parser;
use crate::config::DeviceConfig;
use crate::error::{BridgeError, Result};
use crate::events::RawNotification;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use quick_xml::escape::escape;
use rand::Rng;
use reqwest::Client;
use sha1::{Digest, Sha1};
use std::time::Duration;
use uuid::Uuid;

const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";
const EVENT_SERVICE_PATH: &str = "/onvif/event_service";

const GET_CAPABILITIES: &str = "http://www.onvif.org/ver10/device/wsdl/GetCapabilities";
const CREATE_PULL_POINT: &str =
    "http://www.onvif.org/ver10/events/wsdl/EventPortType/CreatePullPointSubscriptionRequest";
const PULL_MESSAGES: &str =
    "http://www.onvif.org/ver10/events/wsdl/PullPointSubscription/PullMessagesRequest";
const RENEW: &str = "http://docs.oasis-open.org/wsn/bw-2/SubscriptionManager/RenewRequest";
const UNSUBSCRIBE: &str = "http://docs.oasis-open.org/wsn/bw-2/SubscriptionManager/UnsubscribeRequest";

/// `xs:duration` in whole seconds, e.g. `PT60S`.
pub fn xs_duration(duration: Duration) -> String {
    format!("PT{}S", duration.as_secs())
}

/// WS-Security UsernameToken password digest:
/// `Base64(SHA1(nonce + created + password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// WS-Security header for one request.
fn security_header(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    format!(
        r#"<wsse:Security s:mustUnderstand="1" xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"><wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password><wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</wsse:Nonce><wsu:Created>{}</wsu:Created></wsse:UsernameToken></wsse:Security>"#,
        escape(username),
        password_digest(nonce, created, password),
        STANDARD.encode(nonce),
        created
    )
}

fn envelope(header: &str, action: &str, to: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:a="http://www.w3.org/2005/08/addressing"><s:Header>{}<a:Action s:mustUnderstand="1">{}</a:Action><a:MessageID>urn:uuid:{}</a:MessageID><a:To s:mustUnderstand="1">{}</a:To></s:Header><s:Body>{}</s:Body></s:Envelope>"#,
        header,
        action,
        Uuid::new_v4(),
        escape(to),
        body
    )
}

/// SOAP client bound to one camera.
#[derive(Clone)]
pub struct OnvifClient {
    http: Client,
    device_url: String,
    event_url_fallback: String,
    credentials: Option<(String, String)>,
}

impl OnvifClient {
    pub fn new(device: &DeviceConfig, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        let base = format!("http://{}:{}", device.hostname, device.port);

        Ok(Self {
            http,
            device_url: format!("{}{}", base, DEVICE_SERVICE_PATH),
            event_url_fallback: format!("{}{}", base, EVENT_SERVICE_PATH),
            credentials: device
                .username
                .clone()
                .map(|username| (username, device.password.clone().unwrap_or_default())),
        })
    }

    pub fn device_url(&self) -> &str {
        &self.device_url
    }

    fn header(&self) -> String {
        match &self.credentials {
            Some((username, password)) => {
                let nonce: [u8; 16] = rand::thread_rng().r#gen();
                let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
                security_header(username, password, &nonce, &created)
            }
            None => String::new(),
        }
    }

    async fn call(&self, name: &'static str, action: &str, url: &str, body: &str) -> Result<String> {
        debug!("[ONVIF] {} -> {}", name, url);
        let request = envelope(&self.header(), action, url, body);

        let response = self
            .http
            .post(url)
            .header(
                "Content-Type",
                format!(r#"application/soap+xml; charset=utf-8; action="{}""#, action),
            )
            .body(request)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BridgeError::SoapFault {
                action: name,
                status: status.as_u16(),
                reason: parser::fault_reason(&text)
                    .or_else(|| status.canonical_reason().map(str::to_string))
                    .unwrap_or_default(),
            });
        }

        Ok(text)
    }

    /// Address of the event service, falling back to the conventional path
    /// when the camera does not advertise one.
    pub async fn event_service_address(&self) -> String {
        let body = r#"<tds:GetCapabilities xmlns:tds="http://www.onvif.org/ver10/device/wsdl"><tds:Category>Events</tds:Category></tds:GetCapabilities>"#;

        let address = match self
            .call("GetCapabilities", GET_CAPABILITIES, &self.device_url, body)
            .await
        {
            Ok(response) => parser::event_service_address(&response),
            Err(e) => Err(e),
        };

        address.unwrap_or_else(|e| {
            warn!(
                "[ONVIF] No event service advertised by {} ({}), using {}",
                self.device_url, e, self.event_url_fallback
            );
            self.event_url_fallback.clone()
        })
    }

    /// Create a pull point and return its address.
    pub async fn create_pull_point(&self, event_url: &str, termination: Duration) -> Result<String> {
        let body = format!(
            r#"<tev:CreatePullPointSubscription xmlns:tev="http://www.onvif.org/ver10/events/wsdl"><tev:InitialTerminationTime>{}</tev:InitialTerminationTime></tev:CreatePullPointSubscription>"#,
            xs_duration(termination)
        );
        let response = self
            .call("CreatePullPointSubscription", CREATE_PULL_POINT, event_url, &body)
            .await?;
        parser::subscription_address(&response)
    }

    /// Long-poll the pull point for up to `timeout`.
    pub async fn pull_messages(
        &self,
        subscription_url: &str,
        timeout: Duration,
        limit: u32,
    ) -> Result<Vec<RawNotification>> {
        let body = format!(
            r#"<tev:PullMessages xmlns:tev="http://www.onvif.org/ver10/events/wsdl"><tev:Timeout>{}</tev:Timeout><tev:MessageLimit>{}</tev:MessageLimit></tev:PullMessages>"#,
            xs_duration(timeout),
            limit
        );
        let response = self
            .call("PullMessages", PULL_MESSAGES, subscription_url, &body)
            .await?;
        parser::notifications(&response)
    }

    pub async fn renew(&self, subscription_url: &str, termination: Duration) -> Result<()> {
        let body = format!(
            r#"<wsnt:Renew xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2"><wsnt:TerminationTime>{}</wsnt:TerminationTime></wsnt:Renew>"#,
            xs_duration(termination)
        );
        self.call("Renew", RENEW, subscription_url, &body).await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, subscription_url: &str) -> Result<()> {
        let body = r#"<wsnt:Unsubscribe xmlns:wsnt="http://docs.oasis-open.org/wsn/b-2"/>"#;
        self.call("Unsubscribe", UNSUBSCRIBE, subscription_url, body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(username: Option<&str>) -> DeviceConfig {
        DeviceConfig {
            name: "front_door".to_string(),
            hostname: "192.168.1.20".to_string(),
            port: 2020,
            username: username.map(str::to_string),
            password: Some("secret".to_string()),
        }
    }

    #[test]
    fn test_password_digest_vector() {
        let nonce: Vec<u8> = (0..16).collect();
        assert_eq!(
            password_digest(&nonce, "2024-01-01T00:00:00Z", "secret"),
            "vhkNh82r7E2rA9qMKzvKdpwqvjc="
        );
    }

    #[test]
    fn test_security_header_contents() {
        let nonce: Vec<u8> = (0..16).collect();
        let header = security_header("ad<min", "secret", &nonce, "2024-01-01T00:00:00Z");

        assert!(header.contains("<wsse:Username>ad&lt;min</wsse:Username>"));
        assert!(header.contains(">vhkNh82r7E2rA9qMKzvKdpwqvjc=</wsse:Password>"));
        assert!(header.contains(">AAECAwQFBgcICQoLDA0ODw==</wsse:Nonce>"));
        assert!(header.contains("<wsu:Created>2024-01-01T00:00:00Z</wsu:Created>"));
    }

    #[test]
    fn test_envelope_addressing() {
        let request = envelope("", PULL_MESSAGES, "http://cam/event-0", "<x/>");

        assert!(request.contains(&format!(
            r#"<a:Action s:mustUnderstand="1">{}</a:Action>"#,
            PULL_MESSAGES
        )));
        assert!(request.contains("<a:MessageID>urn:uuid:"));
        assert!(request.contains(r#"<a:To s:mustUnderstand="1">http://cam/event-0</a:To>"#));
        assert!(request.contains("<s:Body><x/></s:Body>"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let first = envelope("", RENEW, "http://cam", "");
        let second = envelope("", RENEW, "http://cam", "");
        assert_ne!(first, second);
    }

    #[test]
    fn test_xs_duration() {
        assert_eq!(xs_duration(Duration::from_secs(60)), "PT60S");
        assert_eq!(xs_duration(Duration::from_millis(10_500)), "PT10S");
    }

    #[test]
    fn test_client_urls_and_credentials() {
        let client = OnvifClient::new(&device(Some("admin")), Duration::from_secs(5)).unwrap();
        assert_eq!(
            client.device_url(),
            "http://192.168.1.20:2020/onvif/device_service"
        );
        assert_eq!(
            client.event_url_fallback,
            "http://192.168.1.20:2020/onvif/event_service"
        );
        assert!(client.header().contains("<wsse:Username>admin</wsse:Username>"));

        let anonymous = OnvifClient::new(&device(None), Duration::from_secs(5)).unwrap();
        assert!(anonymous.header().is_empty());
    }
}
