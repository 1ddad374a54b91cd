//! Error taxonomy for the deployment pipeline.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use derive_more::Display;

/// Errors surfaced by the deployment pipeline and its components.
///
/// Every variant except [`DeployError::VerificationTimedOut`] halts the pipeline.
/// Progress made before the failing stage is preserved in the registry, so
/// re-running resumes from the failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum DeployError {
    /// Invalid configuration or an unresolvable dependency. Always raised before
    /// any transaction is sent for the affected stage.
    #[display("configuration error: {_0}")]
    Configuration(String),

    /// A transaction was rejected by the network or reverted.
    #[display("stage `{stage}` failed: {reason}")]
    DeploymentFailed { stage: String, reason: String },

    /// Finality was not observed within the confirmation budget.
    ///
    /// The transaction may still land. The operator has to inspect `tx_hash`
    /// before re-running the stage.
    #[display("stage `{stage}` timed out waiting for confirmation of {tx_hash}")]
    ConfirmationTimeout { stage: String, tx_hash: B256 },

    /// The transaction may have reached the network but its outcome could not be
    /// observed. `tx_hash` is absent when the submission itself went unanswered.
    #[display("stage `{stage}` has an unknown outcome: {reason}")]
    OutcomeUnknown {
        stage: String,
        tx_hash: Option<B256>,
        reason: String,
    },

    /// The proxy upgrade call reverted. The registry still points at
    /// `retained_implementation`.
    #[display("upgrade of `{component}` failed ({reason}), kept {retained_implementation}")]
    UpgradeFailed {
        component: String,
        retained_implementation: Address,
        reason: String,
    },

    /// The verification service did not confirm within the wall-clock budget.
    #[display("verification of `{component}` at {address} did not complete within {budget:?}")]
    VerificationTimedOut {
        component: String,
        address: Address,
        budget: Duration,
    },

    /// The address registry could not be read or written.
    #[display("registry error: {_0}")]
    Registry(String),
}

impl std::error::Error for DeployError {}

impl DeployError {
    /// Shorthand for a [`DeployError::Configuration`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the pipeline must stop when this error is raised.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::VerificationTimedOut { .. })
    }

    /// Whether the failing transaction may still have been mined.
    ///
    /// Re-running without checking first can repeat the stage.
    pub fn may_have_landed(&self) -> bool {
        matches!(
            self,
            Self::ConfirmationTimeout { .. } | Self::OutcomeUnknown { .. }
        )
    }
}

/// Errors reported by a [`crate::ChainClient`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ChainError {
    /// The node refused the transaction before inclusion.
    #[display("transaction rejected: {_0}")]
    Rejected(String),

    /// The transaction was included but reverted.
    #[display("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    /// No receipt was observed within the finality budget.
    #[display("timed out waiting for receipt of {tx_hash}")]
    ConfirmationTimeout { tx_hash: B256 },

    /// Tracking of a submitted transaction failed before a receipt was seen.
    #[display("lost track of {tx_hash}: {reason}")]
    Unconfirmed { tx_hash: B256, reason: String },

    /// A submission went unanswered. The node may or may not have accepted it.
    #[display("submission unanswered: {_0}")]
    SubmissionUnknown(String),

    /// Transport or decoding failure talking to the node.
    #[display("transport error: {_0}")]
    Transport(String),
}

impl std::error::Error for ChainError {}

impl ChainError {
    /// Map a chain error raised while executing `stage` into the pipeline taxonomy.
    pub fn into_stage_error(self, stage: &str) -> DeployError {
        match self {
            ChainError::ConfirmationTimeout { tx_hash } => DeployError::ConfirmationTimeout {
                stage: stage.to_string(),
                tx_hash,
            },
            ChainError::Unconfirmed { tx_hash, reason } => DeployError::OutcomeUnknown {
                stage: stage.to_string(),
                tx_hash: Some(tx_hash),
                reason: format!("lost track of {tx_hash}: {reason}"),
            },
            ChainError::SubmissionUnknown(reason) => DeployError::OutcomeUnknown {
                stage: stage.to_string(),
                tx_hash: None,
                reason: format!("submission unanswered: {reason}"),
            },
            other => DeployError::DeploymentFailed {
                stage: stage.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_maps_to_confirmation_timeout() {
        let err = ChainError::ConfirmationTimeout {
            tx_hash: B256::repeat_byte(0xab),
        }
        .into_stage_error("TwapV3");

        assert_eq!(
            err,
            DeployError::ConfirmationTimeout {
                stage: "TwapV3".to_string(),
                tx_hash: B256::repeat_byte(0xab),
            }
        );
    }

    #[test]
    fn test_revert_maps_to_deployment_failed() {
        let err = ChainError::Reverted {
            tx_hash: B256::ZERO,
        }
        .into_stage_error("DimoCredit");

        assert!(matches!(
            err,
            DeployError::DeploymentFailed { ref stage, .. } if stage == "DimoCredit"
        ));
        assert!(err.is_fatal());
        assert!(!err.may_have_landed());
    }

    #[test]
    fn test_lost_receipt_maps_to_unknown_outcome() {
        let err = ChainError::Unconfirmed {
            tx_hash: B256::repeat_byte(0x11),
            reason: "connection reset".to_string(),
        }
        .into_stage_error("TwapV3");

        assert!(matches!(
            err,
            DeployError::OutcomeUnknown { ref stage, tx_hash: Some(hash), .. }
                if stage == "TwapV3" && hash == B256::repeat_byte(0x11)
        ));
        assert!(err.may_have_landed());
    }

    #[test]
    fn test_unanswered_submission_maps_to_unknown_outcome() {
        let err = ChainError::SubmissionUnknown("operation timed out".to_string())
            .into_stage_error("DimoCredit");

        assert!(matches!(err, DeployError::OutcomeUnknown { tx_hash: None, .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_verification_timeout_is_not_fatal() {
        let err = DeployError::VerificationTimedOut {
            component: "TwapV3".to_string(),
            address: Address::ZERO,
            budget: Duration::from_secs(30),
        };
        assert!(!err.is_fatal());
    }
}
