//! Remote assertion verifier, used only to diagnose bad assertions.

use crate::config::SyncConfig;
use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// What the verifier said about an assertion.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifierVerdict {
    Okay(serde_json::Value),
    Failure(serde_json::Value),
}

#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify(&self, audience: &str, assertion: &str) -> CloudResult<VerifierVerdict>;
}

pub struct HttpVerifierClient {
    client: Client,
    url: String,
}

impl HttpVerifierClient {
    pub fn new(config: &SyncConfig) -> CloudResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.verifier_url.clone(),
        })
    }
}

#[derive(Deserialize)]
struct VerifierStatus {
    status: String,
}

#[async_trait]
impl AssertionVerifier for HttpVerifierClient {
    async fn verify(&self, audience: &str, assertion: &str) -> CloudResult<VerifierVerdict> {
        let body: serde_json::Value = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "audience": audience, "assertion": assertion }))
            .send()
            .await?
            .json()
            .await
            .map_err(|e| CloudError::Malformed(e.to_string()))?;

        let status: VerifierStatus =
            serde_json::from_value(body.clone()).map_err(|e| CloudError::Malformed(e.to_string()))?;
        if status.status == "okay" {
            Ok(VerifierVerdict::Okay(body))
        } else {
            Ok(VerifierVerdict::Failure(body))
        }
    }
}
