//! Deployment of single components.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes},
};

use crate::{
    abi,
    artifact::Artifact,
    chain::{self, ChainClient, Receipt},
    error::DeployError,
    gas::GasPriceStrategy,
    registry::RegistryEntry,
};

/// Result of deploying one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployed {
    pub entry: RegistryEntry,
    /// Every contract created by the stage, in creation order.
    pub created: Vec<CreatedContract>,
}

/// A contract created by a deployment, as needed for source verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContract {
    pub artifact: String,
    pub address: Address,
    pub constructor_args: Bytes,
}

/// Submits creation and call transactions for one stage at a time.
///
/// The gas bid is recomputed before every transaction. Nothing is retried: a
/// failed or timed out submission is surfaced to the caller.
#[derive(Debug)]
pub struct ContractDeployer<'a, C> {
    client: &'a C,
    gas: GasPriceStrategy,
}

impl<'a, C: ChainClient> ContractDeployer<'a, C> {
    pub fn new(client: &'a C, gas: GasPriceStrategy) -> Self {
        Self { client, gas }
    }

    pub fn client(&self) -> &'a C {
        self.client
    }

    /// Deploy a non-upgradeable component with constructor arguments.
    pub async fn deploy_bare(
        &self,
        stage: &str,
        artifact: &Artifact,
        constructor_args: &[DynSolValue],
    ) -> Result<Deployed, DeployError> {
        let created = self.create(stage, artifact, constructor_args).await?;

        Ok(Deployed {
            entry: RegistryEntry::Simple(created.address),
            created: vec![created],
        })
    }

    /// Deploy an implementation, an ERC1967 proxy pointing at it with empty
    /// initialization data, and then call `initializer` on the proxy.
    ///
    /// The implementation never runs initialization logic in its constructor, so
    /// the initializer has to go through the proxy in its own transaction.
    pub async fn deploy_upgradeable(
        &self,
        stage: &str,
        implementation: &Artifact,
        proxy: &Artifact,
        initializer: Option<Bytes>,
    ) -> Result<Deployed, DeployError> {
        let implementation = self.create(stage, implementation, &[]).await?;

        let proxy = self
            .create(
                stage,
                proxy,
                &[
                    DynSolValue::Address(implementation.address),
                    DynSolValue::Bytes(Vec::new()),
                ],
            )
            .await?;

        if let Some(calldata) = initializer {
            self.call(stage, proxy.address, calldata).await?;
            tracing::info!(stage, proxy = %proxy.address, "Proxy initialized");
        }

        Ok(Deployed {
            entry: RegistryEntry::Proxied {
                proxy: proxy.address,
                implementation: implementation.address,
            },
            created: vec![implementation, proxy],
        })
    }

    /// Submit a creation transaction and wait for the resulting address.
    pub async fn create(
        &self,
        stage: &str,
        artifact: &Artifact,
        constructor_args: &[DynSolValue],
    ) -> Result<CreatedContract, DeployError> {
        let encoded = Bytes::from(abi::encode_args(constructor_args));
        let gas_price = self.gas.current_bid(self.client, stage).await?;

        let pending = self
            .client
            .deploy(artifact.bytecode.clone(), encoded.clone(), gas_price)
            .await
            .map_err(|e| e.into_stage_error(stage))?;
        tracing::info!(
            stage,
            artifact = %artifact.name,
            tx_hash = %pending.hash,
            %gas_price,
            "Creation transaction submitted"
        );

        let receipt = self.confirm(stage, pending.hash).await?;
        let address = receipt.contract_address.ok_or_else(|| DeployError::DeploymentFailed {
            stage: stage.to_string(),
            reason: format!("receipt of {} carries no contract address", receipt.tx_hash),
        })?;

        tracing::info!(
            stage,
            artifact = %artifact.name,
            %address,
            block = receipt.block_number,
            "Contract created"
        );

        Ok(CreatedContract {
            artifact: artifact.name.clone(),
            address,
            constructor_args: encoded,
        })
    }

    /// Submit a call to an existing contract and wait for it to succeed.
    pub async fn call(
        &self,
        stage: &str,
        to: Address,
        calldata: Bytes,
    ) -> Result<Receipt, DeployError> {
        let gas_price = self.gas.current_bid(self.client, stage).await?;

        let pending = self
            .client
            .send_call(to, calldata, gas_price)
            .await
            .map_err(|e| e.into_stage_error(stage))?;
        tracing::debug!(stage, %to, tx_hash = %pending.hash, %gas_price, "Call submitted");

        self.confirm(stage, pending.hash).await
    }

    async fn confirm(&self, stage: &str, hash: B256) -> Result<Receipt, DeployError> {
        chain::confirm(self.client, chain::PendingTx { hash })
            .await
            .map_err(|e| e.into_stage_error(stage))
    }
}

