//! OAuth token endpoint over HTTP

use crate::error::ProcessingError;
use crate::token::{TokenEndpoint, TokenGrant};
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error};

pub struct HttpTokenEndpoint {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenEndpoint {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(2)
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessingError::TokenRefresh(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }
}

#[async_trait::async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        debug!(url = %self.token_url, "Requesting refresh_token grant");

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| ProcessingError::TokenRefresh(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Token refresh rejected");
            return Err(ProcessingError::TokenRefresh(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|e| ProcessingError::TokenRefresh(format!("invalid grant response: {}", e)))
    }
}
