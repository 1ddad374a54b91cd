//! Source verification against an external explorer.
//!
//! Explorers index new contracts with a lag and reject submissions for code they
//! have not seen yet, so verification is modelled as a two-state machine that
//! only ever moves from [`VerificationStatus::Pending`] to
//! [`VerificationStatus::Confirmed`]. Every error keeps the request pending.

use std::{future::Future, path::PathBuf, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use strum::Display;
use url::Url;

use crate::error::DeployError;

/// Default pause between two verification attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Timeout applied to a single explorer request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A deployed contract to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub chain_id: u64,
    pub address: Address,
    /// Artifact name of the contract.
    pub component: String,
    /// ABI-encoded constructor arguments, if the contract has any.
    pub constructor_args: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum VerificationStatus {
    Pending,
    Confirmed,
}

/// An explorer that can be asked to verify a contract.
pub trait VerificationService: Send + Sync {
    /// Make one verification attempt.
    ///
    /// Errors are not terminal: the poller treats them like `Pending`.
    fn attempt(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = anyhow::Result<VerificationStatus>> + Send;
}

/// Retries a [`VerificationService`] with a fixed backoff until it confirms.
#[derive(Debug)]
pub struct VerificationPoller<'a, V> {
    service: &'a V,
    backoff: Duration,
}

impl<'a, V: VerificationService> VerificationPoller<'a, V> {
    pub fn new(service: &'a V, backoff: Duration) -> Self {
        Self { service, backoff }
    }

    /// Poll until the service confirms, returning the number of attempts made.
    ///
    /// There is no retry limit. Callers bound the total time with
    /// [`VerificationPoller::poll_within`].
    pub async fn poll(&self, request: &VerificationRequest) -> u32 {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.service.attempt(request).await {
                Ok(VerificationStatus::Confirmed) => {
                    tracing::info!(
                        component = %request.component,
                        address = %request.address,
                        attempts,
                        "Verification confirmed"
                    );
                    return attempts;
                }
                Ok(VerificationStatus::Pending) => {
                    tracing::debug!(
                        component = %request.component,
                        address = %request.address,
                        attempts,
                        "Verification pending"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        component = %request.component,
                        address = %request.address,
                        attempts,
                        error = %e,
                        "Verification attempt failed, retrying"
                    );
                }
            }

            tokio::time::sleep(self.backoff).await;
        }
    }

    /// Poll with an overall wall-clock budget.
    ///
    /// Running out of budget yields [`DeployError::VerificationTimedOut`], which is
    /// not fatal to the deployment.
    pub async fn poll_within(
        &self,
        request: &VerificationRequest,
        budget: Duration,
    ) -> Result<u32, DeployError> {
        tokio::time::timeout(budget, self.poll(request))
            .await
            .map_err(|_| DeployError::VerificationTimedOut {
                component: request.component.clone(),
                address: request.address,
                budget,
            })
    }
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: Value,
}

/// Verifies through an Etherscan-compatible explorer.
///
/// Each attempt first asks the explorer whether the address already has verified
/// source. If not, the contract is (re)submitted with `forge verify-contract` and
/// the attempt reports `Pending`; confirmation is picked up by a later attempt.
#[derive(Debug, Clone)]
pub struct EtherscanVerifier {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    forge_bin: PathBuf,
}

impl EtherscanVerifier {
    pub fn new(api_url: Url, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url,
            api_key: api_key.into(),
            forge_bin: PathBuf::from("forge"),
        })
    }

    /// Use a specific `forge` binary instead of the one on `PATH`.
    pub fn with_forge_bin(mut self, forge_bin: impl Into<PathBuf>) -> Self {
        self.forge_bin = forge_bin.into();
        self
    }

    /// Whether the explorer already serves verified source for the address.
    pub async fn is_verified(&self, request: &VerificationRequest) -> anyhow::Result<bool> {
        let address = request.address.to_string();
        let chain_id = request.chain_id.to_string();

        let response = self
            .client
            .get(self.api_url.clone())
            .query(&[
                ("chainid", chain_id.as_str()),
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("Failed to query explorer")?;

        anyhow::ensure!(
            response.status().is_success(),
            "Explorer request failed: {}",
            response.status()
        );

        let body: EtherscanResponse = response
            .json()
            .await
            .context("Failed to parse explorer response")?;

        Ok(has_verified_source(&body))
    }

    /// Arguments passed to `forge` to submit a verification.
    pub fn forge_args(&self, request: &VerificationRequest) -> Vec<String> {
        let mut args = vec![
            "verify-contract".to_string(),
            request.address.to_string(),
            request.component.clone(),
            "--chain-id".to_string(),
            request.chain_id.to_string(),
            "--etherscan-api-key".to_string(),
            self.api_key.clone(),
        ];
        if let Some(encoded) = request.constructor_args.as_ref().filter(|a| !a.is_empty()) {
            args.push("--constructor-args".to_string());
            args.push(format!("0x{}", hex::encode(encoded)));
        }
        args
    }

    async fn submit(&self, request: &VerificationRequest) -> anyhow::Result<()> {
        let output = tokio::process::Command::new(&self.forge_bin)
            .args(self.forge_args(request))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.forge_bin.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::trace!(
            component = %request.component,
            stdout = %stdout.trim(),
            stderr = %stderr.trim(),
            "forge verify-contract output"
        );

        anyhow::ensure!(
            output.status.success(),
            "forge verify-contract exited with {}",
            output.status
        );
        Ok(())
    }
}

impl VerificationService for EtherscanVerifier {
    async fn attempt(&self, request: &VerificationRequest) -> anyhow::Result<VerificationStatus> {
        if self.is_verified(request).await? {
            return Ok(VerificationStatus::Confirmed);
        }
        self.submit(request).await?;
        Ok(VerificationStatus::Pending)
    }
}

/// `status == "1"` and the first result carries a non-empty `SourceCode`.
fn has_verified_source(response: &EtherscanResponse) -> bool {
    if response.status != "1" {
        tracing::trace!(message = %response.message, "Explorer reported no source");
        return false;
    }
    response
        .result
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("SourceCode"))
        .and_then(Value::as_str)
        .is_some_and(|source| !source.trim().is_empty())
}
