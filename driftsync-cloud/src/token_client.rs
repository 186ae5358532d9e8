//! Token server client.
//!
//! Exchanges a backed assertion (plus the client-state tag derived from kB)
//! for short-lived storage credentials. Whatever the status, the response's
//! backoff headers and server timestamp are handed back so the caller can
//! update the ledger.

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{CloudError, CloudResult};
use crate::response::{server_timestamp_millis, weave_alert, ResponseBackoffSignal};
use crate::types::{TokenServerErrorBody, TokenServerToken};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub const CLIENT_STATE_HEADER: &str = "X-Client-State";

/// Everything one token exchange observed.
#[derive(Debug)]
pub struct TokenServerResponse {
    pub status: u16,
    pub backoff: ResponseBackoffSignal,
    pub server_timestamp_ms: Option<u64>,
    pub alert: Option<String>,
    pub result: CloudResult<TokenServerToken>,
}

#[async_trait]
pub trait TokenClient: Send + Sync {
    /// Only transport failures surface as `Err`; HTTP-level failures land in
    /// [`TokenServerResponse::result`].
    async fn exchange(&self, assertion: &str, client_state: &str) -> CloudResult<TokenServerResponse>;
}

pub struct HttpTokenClient {
    client: Client,
    url: String,
    clock: Arc<dyn Clock>,
}

impl HttpTokenClient {
    pub fn new(config: &SyncConfig, clock: Arc<dyn Clock>) -> CloudResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.token_server_url.clone(),
            clock,
        })
    }
}

fn parse_token(text: &str) -> CloudResult<TokenServerToken> {
    let token: TokenServerToken =
        serde_json::from_str(text).map_err(|e| CloudError::Malformed(e.to_string()))?;
    let endpoint = Url::parse(&token.api_endpoint)
        .map_err(|e| CloudError::Malformed(format!("api_endpoint: {e}")))?;
    if endpoint.host_str().is_none() {
        return Err(CloudError::Malformed("api_endpoint has no host".into()));
    }
    if token.id.is_empty() || token.key.is_empty() {
        return Err(CloudError::Malformed("token id and key must be present".into()));
    }
    Ok(token)
}

#[async_trait]
impl TokenClient for HttpTokenClient {
    async fn exchange(&self, assertion: &str, client_state: &str) -> CloudResult<TokenServerResponse> {
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, format!("BrowserID {assertion}"))
            .header(CLIENT_STATE_HEADER, client_state)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let now = self.clock.now_millis();
        let backoff = ResponseBackoffSignal::parse(status.as_u16(), &headers, now);
        let server_timestamp_ms = server_timestamp_millis(&headers);
        let alert = weave_alert(&headers);
        if let Some(alert) = &alert {
            warn!("token server alert: {alert}");
        }

        let text = resp.text().await?;
        let result = if status.is_success() {
            parse_token(&text)
        } else {
            let body: TokenServerErrorBody = serde_json::from_str(&text).unwrap_or_default();
            debug!("token server returned {status}: {}", body.summary());
            if status == StatusCode::UNAUTHORIZED {
                Err(CloudError::TokenServerInvalidCredentials(body.summary()))
            } else {
                Err(CloudError::TokenServer {
                    status: status.as_u16(),
                    message: body.summary(),
                })
            }
        };

        Ok(TokenServerResponse {
            status: status.as_u16(),
            backoff,
            server_timestamp_ms,
            alert,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_requires_endpoint_host() {
        let err = parse_token(r#"{"id":"i","key":"k","uid":1,"api_endpoint":"not a url"}"#).unwrap_err();
        assert!(matches!(err, CloudError::Malformed(_)));
    }

    #[test]
    fn token_accepts_endpoint_alias_and_numeric_uid() {
        let token =
            parse_token(r#"{"id":"i","key":"k","uid":42,"endpoint":"https://s.example.com/1.5/42"}"#).unwrap();
        assert_eq!(token.uid, "42");
        assert_eq!(token.api_endpoint, "https://s.example.com/1.5/42");
        assert_eq!(token.duration, None);
    }
}
