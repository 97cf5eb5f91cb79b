//! Token exchange over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use gamelink_shared::{protocol::TOKEN_PATH, TokenRequest, TokenResponse};
use reqwest::StatusCode;
use url::Url;

use super::ports::{TokenExchange, TransportError};

pub struct HttpTokenExchange {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTokenExchange {
    /// `engine_url` is the Engine's base URL, e.g. `http://engine:3000`.
    /// A request that takes longer than `timeout` fails the attempt.
    pub fn new(engine_url: &Url, timeout: Duration) -> Result<Self, TransportError> {
        let endpoint = engine_url
            .join(TOKEN_PATH)
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, access_token: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&TokenRequest {
                access_token: access_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Authentication(body));
            }
            status => {
                return Err(TransportError::Connect(format!(
                    "token endpoint returned {status}"
                )))
            }
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Authentication(format!("malformed token response: {e}")))?;

        tracing::debug!(expires_in = token.expires_in, "Obtained hub bearer token");
        Ok(token.access_token)
    }
}
