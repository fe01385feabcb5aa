//! Report delivery

use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use crate::config::NotifyConfig;
use crate::error::{Error, Result};

/// Secret used to authorize deliveries; never printed
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret value
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for placing on the wire
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether no usable secret was supplied
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Delivers a finished report somewhere a human will read it
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`, authorizing with `credential`
    async fn notify(&self, message: &str, credential: &Credential) -> Result<()>;
}

/// Posts the report as a form-encoded field to a webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    message_field: String,
}

impl WebhookNotifier {
    /// Create a notifier for the configured webhook
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.webhook_url.clone(),
            message_field: config.message_field.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str, credential: &Credential) -> Result<()> {
        if credential.is_empty() {
            return Err(Error::delivery("no notification credential configured"));
        }

        debug!(url = %self.url, bytes = message.len(), "Posting report");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(credential.expose())
            .form(&[(self.message_field.as_str(), message)])
            .send()
            .await
            .map_err(|e| Error::delivery(format!("webhook request failed: {e}")))?;

        // The webhook acknowledges with exactly 200
        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::delivery(format!("webhook returned {status}: {body}")));
        }

        info!(url = %self.url, "Report delivered");
        Ok(())
    }
}
