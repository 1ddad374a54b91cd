//! Shared fixtures: an in-memory chain and artifact source.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

use alloy_core::primitives::{Address, B256, Bytes, U256};
use stagehand_deploy::{
    Artifact, ArtifactSource, ChainClient, ChainError, DeployError, NetworkConfig,
    NetworkIdentity, ParamValue, PendingTx, Receipt, VerificationConfig, abi,
};
use tempdir::TempDir;

pub const CHAIN_ID: u64 = 80002;
pub const NETWORK: &str = "amoy";
pub const BASE_FEE: u64 = 30_000_000_000;

pub fn operator() -> Address {
    Address::repeat_byte(0x0e)
}

/// What a recorded transaction did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxKind {
    Create { bytecode: Bytes, args: Bytes },
    Call { to: Address, data: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTx {
    pub hash: B256,
    pub kind: TxKind,
    pub gas_price: U256,
    pub contract_address: Option<Address>,
}

impl RecordedTx {
    /// Artifact name of a creation transaction, from the fixture bytecode.
    pub fn created_artifact(&self) -> Option<String> {
        match &self.kind {
            TxKind::Create { bytecode, .. } => Some(String::from_utf8_lossy(bytecode).into_owned()),
            TxKind::Call { .. } => None,
        }
    }

    pub fn selector(&self) -> Option<[u8; 4]> {
        match &self.kind {
            TxKind::Call { data, .. } if data.len() >= 4 => {
                Some([data[0], data[1], data[2], data[3]])
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    next_address: u64,
    txs: Vec<RecordedTx>,
    roles: BTreeSet<(Address, B256, Address)>,
    reverted: HashSet<B256>,
    timed_out: HashSet<B256>,
    revert_selectors: HashSet<[u8; 4]>,
    /// Index (0-based) of the transaction whose receipt never arrives.
    timeout_at: Option<usize>,
    /// Index (0-based) of the transaction whose receipt poll fails in transport.
    receipt_lost_at: Option<usize>,
    receipt_lost: HashSet<B256>,
}

/// A deterministic single-account chain.
///
/// Contract addresses are handed out sequentially, every transaction is recorded,
/// and `grantRole`/`hasRole` are tracked so role checks behave like the real
/// access-control contracts.
#[derive(Debug)]
pub struct MockChain {
    chain_id: u64,
    state: Mutex<State>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::with_chain_id(CHAIN_ID)
    }

    pub fn with_chain_id(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(State {
                next_address: 0x1000,
                ..Default::default()
            }),
        }
    }

    /// Make every call with this selector revert.
    pub fn revert_selector(&self, signature: &str) {
        self.state
            .lock()
            .unwrap()
            .revert_selectors
            .insert(abi::selector(signature));
    }

    /// Never produce a receipt for the `index`-th transaction.
    pub fn timeout_at(&self, index: usize) {
        self.state.lock().unwrap().timeout_at = Some(index);
    }

    /// Fail the receipt poll of the `index`-th transaction with a transport error.
    /// The transaction itself is mined.
    pub fn lose_receipt_at(&self, index: usize) {
        self.state.lock().unwrap().receipt_lost_at = Some(index);
    }

    /// Stop reverting calls with this selector.
    pub fn clear_reverts(&self) {
        self.state.lock().unwrap().revert_selectors.clear();
    }

    /// Number of recorded calls with the given selector.
    pub fn calls_to(&self, signature: &str) -> usize {
        let selector = abi::selector(signature);
        self.txs()
            .iter()
            .filter(|tx| tx.selector() == Some(selector))
            .count()
    }

    /// Pretend `account` already holds `role` on `target`.
    pub fn seed_role(&self, target: Address, role: &str, account: Address) {
        self.state
            .lock()
            .unwrap()
            .roles
            .insert((target, abi::role_id(role), account));
    }

    pub fn has_role(&self, target: Address, role: &str, account: Address) -> bool {
        self.state
            .lock()
            .unwrap()
            .roles
            .contains(&(target, abi::role_id(role), account))
    }

    pub fn txs(&self) -> Vec<RecordedTx> {
        self.state.lock().unwrap().txs.clone()
    }

    pub fn tx_count(&self) -> usize {
        self.state.lock().unwrap().txs.len()
    }

    fn record(&self, kind: TxKind, gas_price: U256) -> PendingTx {
        let mut state = self.state.lock().unwrap();
        let index = state.txs.len();
        let hash = B256::left_padding_from(&((index as u64) + 1).to_be_bytes());

        let mut contract_address = None;
        let mut reverted = false;

        match &kind {
            TxKind::Create { .. } => {
                state.next_address += 1;
                contract_address = Some(Address::left_padding_from(
                    &state.next_address.to_be_bytes(),
                ));
            }
            TxKind::Call { to, data } => {
                let selector = [data[0], data[1], data[2], data[3]];
                if state.revert_selectors.contains(&selector) {
                    reverted = true;
                } else if selector == abi::selector(abi::GRANT_ROLE_SIGNATURE) {
                    let role = B256::from_slice(&data[4..36]);
                    let account = Address::from_slice(&data[48..68]);
                    state.roles.insert((*to, role, account));
                }
            }
        }

        if reverted {
            state.reverted.insert(hash);
        }
        if state.timeout_at == Some(index) {
            state.timed_out.insert(hash);
        }
        if state.receipt_lost_at == Some(index) {
            state.receipt_lost.insert(hash);
        }

        state.txs.push(RecordedTx {
            hash,
            kind,
            gas_price,
            contract_address,
        });
        PendingTx { hash }
    }
}

impl ChainClient for MockChain {
    async fn network_identity(&self) -> Result<NetworkIdentity, ChainError> {
        Ok(NetworkIdentity {
            name: NETWORK.to_string(),
            chain_id: self.chain_id,
        })
    }

    async fn base_fee(&self) -> Result<U256, ChainError> {
        Ok(U256::from(BASE_FEE))
    }

    async fn deploy(
        &self,
        bytecode: Bytes,
        constructor_args: Bytes,
        gas_price: U256,
    ) -> Result<PendingTx, ChainError> {
        Ok(self.record(
            TxKind::Create {
                bytecode,
                args: constructor_args,
            },
            gas_price,
        ))
    }

    async fn send_call(
        &self,
        to: Address,
        calldata: Bytes,
        gas_price: U256,
    ) -> Result<PendingTx, ChainError> {
        if calldata.len() < 4 {
            return Err(ChainError::Rejected("calldata without selector".to_string()));
        }
        Ok(self.record(TxKind::Call { to, data: calldata }, gas_price))
    }

    async fn read_call(&self, to: Address, calldata: Bytes) -> Result<Bytes, ChainError> {
        let mut word = [0u8; 32];
        if calldata.len() >= 68 && calldata[..4] == abi::selector(abi::HAS_ROLE_SIGNATURE) {
            let role = B256::from_slice(&calldata[4..36]);
            let account = Address::from_slice(&calldata[48..68]);
            if self.state.lock().unwrap().roles.contains(&(to, role, account)) {
                word[31] = 1;
            }
        }
        Ok(Bytes::from(word.to_vec()))
    }

    async fn await_receipt(&self, tx: PendingTx) -> Result<Receipt, ChainError> {
        let state = self.state.lock().unwrap();
        if state.timed_out.contains(&tx.hash) {
            return Err(ChainError::ConfirmationTimeout { tx_hash: tx.hash });
        }
        if state.receipt_lost.contains(&tx.hash) {
            return Err(ChainError::Transport(
                "connection reset while polling receipt".to_string(),
            ));
        }
        let recorded = state
            .txs
            .iter()
            .position(|r| r.hash == tx.hash)
            .ok_or_else(|| ChainError::Transport(format!("unknown transaction {}", tx.hash)))?;

        Ok(Receipt {
            tx_hash: tx.hash,
            contract_address: state.txs[recorded].contract_address,
            block_number: recorded as u64 + 1,
            success: !state.reverted.contains(&tx.hash),
        })
    }
}

/// Artifacts whose bytecode is the component name, so creations are easy to identify.
#[derive(Debug, Default)]
pub struct NamedArtifacts;

impl ArtifactSource for NamedArtifacts {
    fn load(&self, name: &str) -> Result<Artifact, DeployError> {
        Ok(Artifact {
            name: name.to_string(),
            abi: serde_json::Value::Array(vec![]),
            bytecode: Bytes::from(name.as_bytes().to_vec()),
        })
    }
}

pub fn network_config(external: BTreeMap<String, Address>) -> NetworkConfig {
    NetworkConfig {
        chain_id: CHAIN_ID,
        rpc_url: "http://localhost:8545".parse().unwrap(),
        operator: operator(),
        gas_bump_percent: 20,
        confirmation_timeout_secs: 60,
        external,
        params: BTreeMap::<String, ParamValue>::new(),
        verification: VerificationConfig::default(),
    }
}

/// Scratch directory holding a registry file.
pub struct Workspace {
    _dir: TempDir,
    pub registry_path: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new("stagehand-test").expect("Failed to create temp dir");
        let registry_path = dir.path().join("deployments.json");
        Self {
            _dir: dir,
            registry_path,
        }
    }

    pub fn registry_bytes(&self) -> Vec<u8> {
        std::fs::read(&self.registry_path).unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.registry_path
    }
}

/// Address encoded in the `index`-th 32-byte word of ABI-encoded arguments.
pub fn address_word(args: &[u8], index: usize) -> Address {
    let word = &args[index * 32..(index + 1) * 32];
    Address::from_slice(&word[12..])
}
