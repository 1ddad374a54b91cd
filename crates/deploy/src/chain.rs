//! Boundary to the target network.
//!
//! The pipeline never signs or encodes transactions itself beyond calldata. It hands
//! bytecode and calldata to a [`ChainClient`] which submits them from the operator
//! account and reports finality.

use std::future::Future;

use alloy_core::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// Identity of the connected network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    pub name: String,
    pub chain_id: u64,
}

/// A submitted, not yet confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: B256,
}

/// Receipt of a transaction that reached finality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    /// Set for contract creation transactions.
    pub contract_address: Option<Address>,
    pub block_number: u64,
    /// `false` if the transaction reverted.
    pub success: bool,
}

/// Operations the pipeline needs from a network.
///
/// Submissions (`deploy`, `send_call`) are never retried by callers: a resubmitted
/// creation transaction would deploy a second copy.
pub trait ChainClient: Send + Sync {
    /// Name and chain id of the connected network.
    fn network_identity(&self) -> impl Future<Output = Result<NetworkIdentity, ChainError>> + Send;

    /// Current gas price reported by the network.
    fn base_fee(&self) -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Submit a creation transaction for `bytecode` followed by the ABI-encoded
    /// `constructor_args`.
    fn deploy(
        &self,
        bytecode: Bytes,
        constructor_args: Bytes,
        gas_price: U256,
    ) -> impl Future<Output = Result<PendingTx, ChainError>> + Send;

    /// Submit a transaction calling `to` with `calldata`.
    fn send_call(
        &self,
        to: Address,
        calldata: Bytes,
        gas_price: U256,
    ) -> impl Future<Output = Result<PendingTx, ChainError>> + Send;

    /// Execute a read-only call against the latest state.
    fn read_call(
        &self,
        to: Address,
        calldata: Bytes,
    ) -> impl Future<Output = Result<Bytes, ChainError>> + Send;

    /// Wait until `tx` is final and return its receipt.
    fn await_receipt(
        &self,
        tx: PendingTx,
    ) -> impl Future<Output = Result<Receipt, ChainError>> + Send;
}

/// Wait for `tx` and turn a reverted receipt into [`ChainError::Reverted`].
///
/// Once submitted, a transaction can no longer be reported as simply failed: any
/// error other than a timeout becomes [`ChainError::Unconfirmed`].
pub async fn confirm<C: ChainClient>(client: &C, tx: PendingTx) -> Result<Receipt, ChainError> {
    let receipt = client.await_receipt(tx).await.map_err(|e| match e {
        ChainError::ConfirmationTimeout { .. }
        | ChainError::Unconfirmed { .. }
        | ChainError::Reverted { .. } => e,
        other => ChainError::Unconfirmed {
            tx_hash: tx.hash,
            reason: other.to_string(),
        },
    })?;
    if !receipt.success {
        return Err(ChainError::Reverted {
            tx_hash: receipt.tx_hash,
        });
    }
    Ok(receipt)
}
