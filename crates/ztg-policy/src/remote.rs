//! Remote Policy Engine Client
//!
//! Thin client for an OPA-style decision service. Every failure mode
//! (connect, timeout, bad status, unparseable body) collapses into
//! `PolicyError::Unavailable` so callers can fall through their decision
//! chain instead of propagating transport details.

use crate::PolicyError;
use serde_json::Value;
use std::time::Duration;

/// OPA-style decision client
#[derive(Debug, Clone)]
pub struct RemotePolicyClient {
    http: reqwest::Client,
    base_url: String,
    policy_path: String,
}

impl RemotePolicyClient {
    /// Build a client with a bounded per-request timeout
    pub fn new(base_url: &str, policy_path: &str, timeout: Duration) -> Result<Self, PolicyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy_path: policy_path.trim_matches('/').to_string(),
        })
    }

    /// Evaluate the policy document against `input`
    ///
    /// POSTs `{"input": ...}` to `{base_url}/v1/data/{policy_path}` and
    /// returns the `result` field of the response body.
    pub async fn decide(&self, input: &Value) -> Result<Value, PolicyError> {
        let url = format!("{}/v1/data/{}", self.base_url, self.policy_path);
        let body = serde_json::json!({ "input": input });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PolicyError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PolicyError::Unavailable(format!(
                "policy engine returned {}",
                response.status()
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| PolicyError::Unavailable(format!("bad decision body: {}", e)))?;

        document
            .get("result")
            .cloned()
            .ok_or_else(|| PolicyError::Unavailable("decision body missing result".into()))
    }
}
