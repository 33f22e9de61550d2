//! Webhook notification channel.
//!
//! Posts a JSON `{"text": …}` payload, which is what Slack-style
//! incoming webhooks and most generic webhook receivers accept.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::ChannelConfig;
use crate::notify::Channel;

/// HTTP POST webhook channel.
pub struct WebhookChannel {
    name: String,
    url: String,
    client: Client,
}

impl WebhookChannel {
    /// Build a channel from its configuration.
    pub fn from_config(config: &ChannelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::channel(&config.name, e))?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .map_err(|e| AppError::channel(&self.name, e))?;

        response
            .error_for_status()
            .map_err(|e| AppError::channel(&self.name, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_uses_channel_name() {
        let channel = WebhookChannel::from_config(&ChannelConfig {
            name: "ops".to_string(),
            url: "https://hooks.example.com/x".to_string(),
            timeout_secs: 10,
        })
        .unwrap();
        assert_eq!(channel.name(), "ops");
    }
}
