//! HTTP client for the identity provider.
//!
//! Covers the handful of account endpoints the login state machine needs:
//! sign-in, key fetch, certificate signing and verification status. Tokens
//! are sent as bearer credentials. Non-2xx responses become
//! [`CloudError::Remote`] carrying the provider's errno.

use crate::config::SyncConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::*;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Account operations used by the login state machine.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Signs in with the stretched password; never sends the raw password.
    async fn login(&self, email: &str, auth_pw: &[u8; 32]) -> CloudResult<LoginResponse>;

    async fn fetch_keys(&self, key_fetch_token: &str) -> CloudResult<KeysResponse>;

    /// Asks the provider to certify `public_key` for `duration_ms`.
    async fn sign_certificate(
        &self,
        session_token: &str,
        public_key: &serde_json::Value,
        duration_ms: u64,
    ) -> CloudResult<String>;

    async fn recovery_email_status(&self, session_token: &str) -> CloudResult<RecoveryEmailStatus>;

    async fn resend_verification_code(&self, session_token: &str) -> CloudResult<()>;
}

/// reqwest-backed [`AuthClient`].
pub struct HttpAuthClient {
    client: Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(config: &SyncConfig) -> CloudResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.identity_server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> CloudResult<T> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let resp = check_status(request.send().await?).await?;
        decode_body(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, bearer: &str) -> CloudResult<T> {
        let resp = self.client.get(self.url(path)).bearer_auth(bearer).send().await?;
        let resp = check_status(resp).await?;
        decode_body(resp).await
    }
}

/// Turns an error status into [`CloudError::Remote`].
async fn check_status(resp: reqwest::Response) -> CloudResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let body: RemoteErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .message
        .or(body.error)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    debug!("identity provider returned {status} errno={:?}", body.errno);
    Err(CloudError::Remote {
        status: status.as_u16(),
        errno: body.errno.unwrap_or(0),
        message,
    })
}

async fn decode_body<T: DeserializeOwned>(resp: reqwest::Response) -> CloudResult<T> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| CloudError::Malformed(e.to_string()))
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(&self, email: &str, auth_pw: &[u8; 32]) -> CloudResult<LoginResponse> {
        self.post_json(
            "/account/login",
            None,
            &serde_json::json!({ "email": email, "authPW": hex::encode(auth_pw) }),
        )
        .await
    }

    async fn fetch_keys(&self, key_fetch_token: &str) -> CloudResult<KeysResponse> {
        self.get_json("/account/keys", key_fetch_token).await
    }

    async fn sign_certificate(
        &self,
        session_token: &str,
        public_key: &serde_json::Value,
        duration_ms: u64,
    ) -> CloudResult<String> {
        let resp: CertificateResponse = self
            .post_json(
                "/certificate/sign",
                Some(session_token),
                &serde_json::json!({ "publicKey": public_key, "duration": duration_ms }),
            )
            .await?;
        Ok(resp.cert)
    }

    async fn recovery_email_status(&self, session_token: &str) -> CloudResult<RecoveryEmailStatus> {
        self.get_json("/recovery_email/status", session_token).await
    }

    async fn resend_verification_code(&self, session_token: &str) -> CloudResult<()> {
        let resp = self
            .client
            .post(self.url("/recovery_email/resend_code"))
            .bearer_auth(session_token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}
