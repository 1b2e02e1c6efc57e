use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::WhatsAppConfig;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outbound message channel.
///
/// `dispatch` reports whether the transport accepted the message. A `false`
/// result covers both "not configured" and "rejected"; callers log it and move on.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn dispatch(&self, phone: &str, message: &str) -> bool;
}

/// Transport that never sends anything
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

#[async_trait]
impl MessageTransport for DisabledTransport {
    async fn dispatch(&self, phone: &str, _message: &str) -> bool {
        debug!(phone = %phone, "Notification transport disabled, dropping message");
        false
    }
}

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    messaging_product: &'a str,
    to: String,
    #[serde(rename = "type")]
    message_type: &'a str,
    text: TextBody<'a>,
}

/// WhatsApp Cloud API text message sender.
#[derive(Clone)]
pub struct WhatsAppTransport {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppTransport {
    pub fn new(config: WhatsAppConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            phone_number_id
        )
    }
}

/// Strips everything but digits and prefixes the country code on bare 10 digit numbers.
pub fn normalize_phone(phone: &str, country_code: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("{}{}", country_code, digits)
    } else {
        digits
    }
}

#[async_trait]
impl MessageTransport for WhatsAppTransport {
    #[instrument(skip(self, message))]
    async fn dispatch(&self, phone: &str, message: &str) -> bool {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let (Some(phone_number_id), Some(token)) = (
            present(&self.config.phone_number_id),
            present(&self.config.access_token),
        ) else {
            warn!("WhatsApp transport is not configured");
            return false;
        };

        let to = normalize_phone(phone, &self.config.country_code);
        if to.is_empty() {
            warn!(phone = %phone, "Refusing to send WhatsApp message to an empty number");
            return false;
        }

        let payload = TextMessage {
            messaging_product: "whatsapp",
            to,
            message_type: "text",
            text: TextBody { body: message },
        };

        match self
            .client
            .post(self.messages_url(&phone_number_id))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                counter!("garage.notifications.whatsapp.accepted", 1);
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "WhatsApp API rejected message");
                counter!("garage.notifications.whatsapp.rejected", 1);
                false
            }
            Err(e) => {
                warn!(error = %e, "WhatsApp API request failed");
                counter!("garage.notifications.whatsapp.errors", 1);
                false
            }
        }
    }
}
