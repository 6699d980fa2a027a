// Subscriber transports. Email delivery itself is handled by an external
// system; deployments point a webhook subscriber at whatever gateway turns
// the message into mail.

use crate::errors::NotifyError;
use crate::models::NotificationMessage;
use crate::notify::Subscriber;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

/// Subscriber that emits each message as a structured log record
pub struct LogSubscriber {
    endpoint: String,
}

impl LogSubscriber {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Subscriber for LogSubscriber {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn deliver(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        tracing::info!(
            endpoint = %self.endpoint,
            message_id = %message.id,
            subject = %message.subject,
            body = %message.body,
            "Notification delivered to log"
        );
        Ok(())
    }
}

/// Subscriber that POSTs the message as JSON to an HTTP endpoint, signed
/// with HMAC-SHA256 so the receiver can validate the sender.
pub struct WebhookSubscriber {
    url: String,
    secret: Option<String>,
    client: Client,
}

impl WebhookSubscriber {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Result<Self, NotifyError> {
        let url = url.into();
        if url.is_empty() {
            return Err(NotifyError::InvalidEndpoint(
                "webhook URL cannot be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::DeliveryFailed {
                endpoint: url.clone(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            url,
            secret,
            client,
        })
    }
}

/// Compute the hex-encoded HMAC-SHA256 signature of a payload
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, NotifyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        NotifyError::InvalidEndpoint(format!("invalid webhook secret: {}", e))
    })?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl Subscriber for WebhookSubscriber {
    fn endpoint(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, message), fields(endpoint = %self.url, message_id = %message.id))]
    async fn deliver(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(message).map_err(|e| NotifyError::DeliveryFailed {
            endpoint: self.url.clone(),
            reason: format!("failed to serialize message: {}", e),
        })?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");

        if let Some(secret) = &self.secret {
            let signature = sign_payload(&payload, secret)?;
            request = request.header("X-Watch-Signature", signature);
        }

        let response = request.body(payload).send().await.map_err(|e| {
            NotifyError::DeliveryFailed {
                endpoint: self.url.clone(),
                reason: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(NotifyError::DeliveryFailed {
                endpoint: self.url.clone(),
                reason: format!("received status {}", response.status()),
            });
        }

        debug!("Webhook delivery acknowledged");
        Ok(())
    }
}
