//! JSON-RPC implementation of [`ChainClient`].
//!
//! Transactions are sent with `eth_sendTransaction`, so the endpoint (a node with
//! an unlocked account or a signing proxy in front of one) holds the operator key.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64, U256};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use derive_more::Display;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::{
    chain::{ChainClient, NetworkIdentity, PendingTx, Receipt},
    error::ChainError,
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time to wait for a receipt before reporting a confirmation timeout.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Number of retries for read-only requests.
const READ_RETRIES: usize = 3;

/// Failure of a single JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum RpcError {
    /// The request or its response was lost. The node may have processed it.
    #[display("{method} request failed: {reason}")]
    Transport { method: String, reason: String },

    /// The node answered with a JSON-RPC error object.
    #[display("{method} returned error {code}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
    },

    /// The node answered but the result did not have the expected shape.
    #[display("failed to decode {method} result: {reason}")]
    Decode { method: String, reason: String },
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Whether the node definitely refused the request.
    pub fn is_refusal(&self) -> bool {
        matches!(self, RpcError::Node { .. })
    }
}

/// Create an HTTP client for JSON-RPC requests with the given per-request timeout.
pub fn create_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
///
/// # Returns
/// The deserialized result. A JSON-RPC error object becomes [`RpcError::Node`],
/// anything that prevents reading an answer becomes [`RpcError::Transport`].
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let transport = |e: reqwest::Error| RpcError::Transport {
        method: method.to_string(),
        reason: e.to_string(),
    };

    let response: Value = client
        .post(url)
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(transport)?
        .json()
        .await
        .map_err(transport)?;

    if let Some(error) = response.get("error") {
        return Err(RpcError::Node {
            method: method.to_string(),
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        });
    }

    let result = response.get("result").cloned().ok_or_else(|| RpcError::Decode {
        method: method.to_string(),
        reason: "no result in response".to_string(),
    })?;

    serde_json::from_value(result).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    contract_address: Option<Address>,
    block_number: U64,
    /// Absent on pre-Byzantium chains.
    status: Option<U64>,
}

impl From<RpcReceipt> for Receipt {
    fn from(r: RpcReceipt) -> Self {
        Self {
            tx_hash: r.transaction_hash,
            contract_address: r.contract_address,
            block_number: r.block_number.to::<u64>(),
            success: r.status.is_none_or(|s| s == U64::from(1)),
        }
    }
}

/// A [`ChainClient`] talking to a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    client: reqwest::Client,
    url: Url,
    network: String,
    from: Address,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RpcChainClient {
    /// Create a client for `network` sending transactions from `from`.
    pub fn new(url: Url, network: impl Into<String>, from: Address) -> anyhow::Result<Self> {
        Ok(Self {
            client: create_client(DEFAULT_TIMEOUT)?,
            url,
            network: network.into(),
            from,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Read-only request, retried with exponential backoff on failure.
    async fn read<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        (|| {
            let params = params.clone();
            async move { json_rpc_call(&self.client, self.url.as_str(), method, params).await }
        })
        .retry(ExponentialBuilder::default().with_max_times(READ_RETRIES))
        .when(|err: &RpcError| !err.is_refusal())
        .notify(|err: &RpcError, after: Duration| {
            tracing::trace!(method, error = %err, ?after, "RPC read failed, retrying");
        })
        .await
        .map_err(|e| ChainError::Transport(e.to_string()))
    }

    /// Submit a transaction once. A failed submission is never retried.
    ///
    /// Only an explicit node error counts as a rejection. A lost request or an
    /// unreadable answer leaves the outcome open.
    async fn submit(&self, tx: Value) -> Result<PendingTx, ChainError> {
        let hash: B256 = json_rpc_call(
            &self.client,
            self.url.as_str(),
            "eth_sendTransaction",
            vec![tx],
        )
        .await
        .map_err(|e| {
            if e.is_refusal() {
                ChainError::Rejected(e.to_string())
            } else {
                ChainError::SubmissionUnknown(e.to_string())
            }
        })?;

        Ok(PendingTx { hash })
    }
}

impl ChainClient for RpcChainClient {
    async fn network_identity(&self) -> Result<NetworkIdentity, ChainError> {
        let chain_id: U64 = self.read("eth_chainId", vec![]).await?;
        Ok(NetworkIdentity {
            name: self.network.clone(),
            chain_id: chain_id.to::<u64>(),
        })
    }

    async fn base_fee(&self) -> Result<U256, ChainError> {
        self.read("eth_gasPrice", vec![]).await
    }

    async fn deploy(
        &self,
        bytecode: Bytes,
        constructor_args: Bytes,
        gas_price: U256,
    ) -> Result<PendingTx, ChainError> {
        let mut data = bytecode.to_vec();
        data.extend_from_slice(&constructor_args);

        self.submit(json!({
            "from": self.from,
            "data": Bytes::from(data),
            "gasPrice": gas_price,
        }))
        .await
    }

    async fn send_call(
        &self,
        to: Address,
        calldata: Bytes,
        gas_price: U256,
    ) -> Result<PendingTx, ChainError> {
        self.submit(json!({
            "from": self.from,
            "to": to,
            "data": calldata,
            "gasPrice": gas_price,
        }))
        .await
    }

    async fn read_call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        self.read(
            "eth_call",
            vec![json!({ "to": to, "data": calldata }), json!("latest")],
        )
        .await
    }

    async fn await_receipt(&self, tx: PendingTx) -> Result<Receipt, ChainError> {
        let start = tokio::time::Instant::now();

        loop {
            if start.elapsed() > self.confirmation_timeout {
                return Err(ChainError::ConfirmationTimeout { tx_hash: tx.hash });
            }

            let receipt: Option<RpcReceipt> = self
                .read("eth_getTransactionReceipt", vec![json!(tx.hash)])
                .await
                .map_err(|e| ChainError::Unconfirmed {
                    tx_hash: tx.hash,
                    reason: e.to_string(),
                })?;
            if let Some(receipt) = receipt {
                return Ok(receipt.into());
            }

            tracing::trace!(tx_hash = %tx.hash, "Receipt not available yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_decoding() {
        let raw = json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "contractAddress": "0x2222222222222222222222222222222222222222",
            "blockNumber": "0x1b4",
            "status": "0x1"
        });
        let receipt: Receipt = serde_json::from_value::<RpcReceipt>(raw).unwrap().into();

        assert_eq!(receipt.block_number, 436);
        assert_eq!(receipt.contract_address, Some(Address::repeat_byte(0x22)));
        assert!(receipt.success);
    }

    #[test]
    fn test_only_node_errors_are_refusals() {
        let node = RpcError::Node {
            method: "eth_sendTransaction".to_string(),
            code: -32000,
            message: "insufficient funds".to_string(),
        };
        let lost = RpcError::Transport {
            method: "eth_sendTransaction".to_string(),
            reason: "operation timed out".to_string(),
        };
        let garbled = RpcError::Decode {
            method: "eth_sendTransaction".to_string(),
            reason: "invalid hex".to_string(),
        };

        assert!(node.is_refusal());
        assert!(!lost.is_refusal());
        assert!(!garbled.is_refusal());
        assert_eq!(
            node.to_string(),
            "eth_sendTransaction returned error -32000: insufficient funds"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_transport_error() {
        let client = create_client(Duration::from_millis(200)).unwrap();
        let err = json_rpc_call::<U64>(&client, "http://127.0.0.1:1", "eth_chainId", vec![])
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::Transport { ref method, .. } if method == "eth_chainId"));
        assert!(!err.is_refusal());
    }

    #[test]
    fn test_reverted_receipt() {
        let raw = json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "contractAddress": null,
            "blockNumber": "0x1",
            "status": "0x0"
        });
        let receipt: Receipt = serde_json::from_value::<RpcReceipt>(raw).unwrap().into();

        assert!(!receipt.success);
        assert_eq!(receipt.contract_address, None);
    }
}
