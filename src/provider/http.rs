//! HTTP implementation of [`MailProvider`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{GeneratedAddress, InboxPayload, MailProvider, ProviderResponse, RemoteMessage};
use crate::error::{Result, TempboxError};

/// Talks to `GET {base_url}/api?action=...`.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpProvider {
    /// Build a provider whose every request fails after `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TempboxError::NetworkFailure(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn call<T: DeserializeOwned>(&self, query: &[(&str, &str)]) -> Result<T> {
        let action = query
            .iter()
            .find(|(k, _)| *k == "action")
            .map(|(_, v)| *v)
            .unwrap_or("request");
        let url = format!("{}/api", self.base_url);
        debug!(url = %url, action, "Provider request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_error(e))?
            .error_for_status()
            .map_err(|e| self.map_error(e))?;

        let envelope: ProviderResponse<T> = response.json().await.map_err(|e| self.map_error(e))?;
        envelope.into_result(action)
    }

    fn map_error(&self, err: reqwest::Error) -> TempboxError {
        if err.is_timeout() {
            TempboxError::NetworkTimeout(self.timeout.as_millis() as u64)
        } else {
            TempboxError::NetworkFailure(err.to_string())
        }
    }
}

#[async_trait]
impl MailProvider for HttpProvider {
    async fn generate_address(&self) -> Result<String> {
        let generated: GeneratedAddress = self.call(&[("action", "generate")]).await?;
        let email = generated.email.trim().to_string();
        if email.is_empty() {
            return Err(TempboxError::NetworkFailure("generate: empty address".into()));
        }
        Ok(email)
    }

    async fn fetch_inbox(&self, address: &str) -> Result<Vec<RemoteMessage>> {
        let payload: InboxPayload = self.call(&[("action", "inbox"), ("email", address)]).await?;
        debug!(address, count = payload.inbox.len(), "Inbox fetched");
        Ok(payload.inbox)
    }
}
