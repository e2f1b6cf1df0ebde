//! Client for the World ID verification authority

use anyhow::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::VerifierError;
use crate::types::{UpstreamVerdict, UpstreamVerifyPayload, UpstreamVerifyResponse, VerificationRequest};

/// Used when the authority rejects without a `detail`
pub const DEFAULT_REJECTION_MESSAGE: &str = "World ID verification failed";

/// Used when the authority rejects without a `code`
pub const DEFAULT_REJECTION_CODE: &str = "VERIFICATION_FAILED";

/// Maximum number of idle connections to keep per host
const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 10;

/// Largest authority response body the relay will buffer
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024; // 64 KiB

pub struct WorldIdClient {
    endpoint: String,
    app_id: String,
    api_key: String,
    client: Client,
}

impl WorldIdClient {
    pub fn new(endpoint: &str, app_id: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            app_id: app_id.to_string(),
            api_key: api_key.to_string(),
            client: Client::builder()
                .timeout(timeout)
                .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
                .user_agent(format!("worldid-relay/{}", env!("CARGO_PKG_VERSION")))
                .build()?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.verify_endpoint,
            &config.app_id,
            &config.api_key,
            config.request_timeout(),
        )
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Ask the authority to verify a proof.
    ///
    /// Exactly one request is made. A parsed answer, positive or negative,
    /// is a verdict; anything that prevents reading one (network failure,
    /// timeout, non-JSON body) is `VerifierError::Transport`.
    pub async fn verify(
        &self,
        request: &VerificationRequest,
    ) -> std::result::Result<UpstreamVerdict, VerifierError> {
        let payload = UpstreamVerifyPayload {
            app_id: &self.app_id,
            nullifier_hash: &request.nullifier_hash,
            merkle_root: &request.merkle_root,
            proof: &request.proof,
            verification_level: request.verification_level,
            action: &request.action,
        };

        info!(
            action = %request.action,
            verification_level = %request.verification_level,
            "Verifying World ID proof with {}", self.endpoint
        );
        debug!("Nullifier hash: {}", request.nullifier_hash);

        let mut response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();

        if response
            .content_length()
            .is_some_and(|len| len > MAX_RESPONSE_BYTES as u64)
        {
            return Err(response_too_large(status));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(response_too_large(status));
            }
            body.extend_from_slice(&chunk);
        }

        let result: UpstreamVerifyResponse = serde_json::from_slice(&body).map_err(|e| {
            VerifierError::Transport(format!(
                "unreadable response from verification authority (status {}): {}",
                status, e
            ))
        })?;

        debug!(
            "Verification authority responded {}: {}",
            status,
            String::from_utf8_lossy(&body)
        );

        if status.is_success() && result.is_success() {
            info!(action = %request.action, "World ID proof verified");
            return Ok(UpstreamVerdict::Verified {
                nullifier_hash: request.nullifier_hash.clone(),
                verification_level: request.verification_level,
                action: request.action.clone(),
            });
        }

        let reason = result
            .detail_text()
            .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string());
        let code = result
            .code_text()
            .unwrap_or_else(|| DEFAULT_REJECTION_CODE.to_string());

        warn!(%status, code = %code, "World ID proof rejected: {}", reason);

        Ok(UpstreamVerdict::Rejected { reason, code })
    }
}

fn response_too_large(status: reqwest::StatusCode) -> VerifierError {
    VerifierError::Transport(format!(
        "response from verification authority exceeds {} bytes (status {})",
        MAX_RESPONSE_BYTES, status
    ))
}
