//! Wire-level web push delivery (RFC 8030).
//!
//! Payloads are encrypted per RFC 8291 (`aes128gcm`) and, when a key is
//! configured, signed with VAPID (RFC 8292). The `web-push` crate builds the
//! message; the HTTP request itself goes out through `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::debug;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage, WebPushMessageBuilder,
};

use crate::error::FailureReason;
use crate::types::Subscription;

/// Performs one push delivery to one subscriber.
///
/// Exactly one attempt per call; retry policy belongs to the caller.
#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), FailureReason>;
}

#[derive(Debug, Clone)]
pub struct WebPushConfig {
    /// Raw 32-byte P-256 scalar, base64url. Pushes are unsigned without it.
    pub vapid_private_key: Option<String>,

    /// `sub` claim of the VAPID JWT, usually a `mailto:` or `https:` URL.
    pub vapid_subject: String,

    /// How long the push service should hold an undelivered message.
    pub ttl: u32,

    /// Maximum time allowed for a single delivery request.
    pub timeout: Duration,
}

impl Default for WebPushConfig {
    fn default() -> Self {
        Self {
            vapid_private_key: None,
            vapid_subject: "mailto:admin@localhost".to_string(),
            ttl: 86_400,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Delivery through the browser vendors' push services.
pub struct WebPushDelivery {
    client: reqwest::Client,
    config: WebPushConfig,
}

impl WebPushDelivery {
    pub fn new(config: WebPushConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Reuse an existing client for connection pooling.
    pub fn with_client(client: reqwest::Client, config: WebPushConfig) -> Self {
        Self { client, config }
    }

    fn build_message(&self, subscription: &Subscription, payload: &[u8]) -> Result<WebPushMessage, FailureReason> {
        // Pushes without key material carry no payload; the service worker
        // shows its fallback text.
        let (p256dh, auth) = if subscription.has_keys() {
            (normalize_key(&subscription.key)?, normalize_key(&subscription.auth_secret)?)
        } else {
            (String::new(), String::new())
        };

        let sub_info = SubscriptionInfo::new(subscription.endpoint.to_string(), p256dh, auth);
        let mut builder = WebPushMessageBuilder::new(&sub_info);

        if subscription.has_keys() {
            builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        }
        builder.set_ttl(self.config.ttl);

        if let Some(private_key) = self.config.vapid_private_key.as_deref() {
            let mut sig_builder = VapidSignatureBuilder::from_base64(private_key, &sub_info)
                .map_err(|e| FailureReason::InvalidSubscription(format!("vapid key: {}", e)))?;
            sig_builder.add_claim("sub", self.config.vapid_subject.as_str());
            let signature = sig_builder
                .build()
                .map_err(|e| FailureReason::InvalidSubscription(format!("vapid signature: {}", e)))?;
            builder.set_vapid_signature(signature);
        }

        builder
            .build()
            .map_err(|e| FailureReason::InvalidSubscription(e.to_string()))
    }
}

#[async_trait]
impl PushDelivery for WebPushDelivery {
    async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), FailureReason> {
        let message = self.build_message(subscription, payload)?;

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .timeout(self.config.timeout)
            .header("TTL", message.ttl.to_string());

        if let Some(urgency) = message.urgency {
            request = request.header("Urgency", urgency.to_string());
        }

        if let Some(topic) = message.topic {
            request = request.header("Topic", topic);
        }

        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");

            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }

            request = request.body(push_payload.content);
        } else {
            request = request.header("Content-Length", "0");
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(err) if err.is_timeout() => return Err(FailureReason::Timeout),
            Err(_) => return Err(FailureReason::Network),
        };

        let status = response.status().as_u16();
        debug!(endpoint = %subscription.endpoint, status, "push service responded");
        classify_status(status)
    }
}

/// Map a push service response status onto a delivery result.
pub fn classify_status(status: u16) -> Result<(), FailureReason> {
    match status {
        200..=299 => Ok(()),
        404 | 410 => Err(FailureReason::Gone),
        429 => Err(FailureReason::RateLimited),
        400..=499 => Err(FailureReason::ClientError(status)),
        _ => Err(FailureReason::RemoteError(status)),
    }
}

const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Browsers hand out standard base64 (`btoa`) or base64url; the encryption
/// layer wants unpadded base64url.
pub fn normalize_key(value: &str) -> Result<String, FailureReason> {
    let url_safe: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = LENIENT_URL_SAFE
        .decode(url_safe.as_bytes())
        .map_err(|e| FailureReason::InvalidSubscription(format!("bad base64 key: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
