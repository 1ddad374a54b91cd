//! Implementation upgrades of proxied components.

use alloy_core::primitives::{Address, Bytes};

use crate::{
    abi,
    artifact::Artifact,
    chain::ChainClient,
    deployer::{ContractDeployer, CreatedContract},
    error::DeployError,
    registry::{NetworkRegistry, RegistryEntry},
};

/// Outcome of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgraded {
    pub component: String,
    pub proxy: Address,
    pub previous_implementation: Address,
    pub implementation: CreatedContract,
}

/// Swaps the implementation behind an existing proxy.
///
/// The proxy address is always read from the registry and never changes. Only the
/// implementation field is written back, and only after the upgrade call succeeded.
pub struct ProxyUpgradeCoordinator<'d, 'a, C> {
    deployer: &'d ContractDeployer<'a, C>,
}

impl<'d, 'a, C: ChainClient> ProxyUpgradeCoordinator<'d, 'a, C> {
    pub fn new(deployer: &'d ContractDeployer<'a, C>) -> Self {
        Self { deployer }
    }

    /// Deploy a fresh implementation of `component` and point its proxy at it.
    ///
    /// `reinitializer` is run atomically with the upgrade when given.
    pub async fn upgrade(
        &self,
        registry: &mut NetworkRegistry,
        component: &str,
        implementation: &Artifact,
        reinitializer: Option<Bytes>,
    ) -> Result<Upgraded, DeployError> {
        let (proxy, previous) = match registry.get(component) {
            Some(RegistryEntry::Proxied {
                proxy,
                implementation,
            }) => (*proxy, *implementation),
            Some(RegistryEntry::Simple(_)) => {
                return Err(DeployError::config(format!(
                    "`{component}` is not deployed behind a proxy on {}",
                    registry.network()
                )));
            }
            None => {
                return Err(DeployError::config(format!(
                    "cannot upgrade `{component}`: no registry entry on {}",
                    registry.network()
                )));
            }
        };

        let failed = |e: DeployError| match e {
            DeployError::DeploymentFailed { reason, .. } => DeployError::UpgradeFailed {
                component: component.to_string(),
                retained_implementation: previous,
                reason,
            },
            other => other,
        };

        tracing::info!(component, %proxy, %previous, "Upgrading component");

        let created = self
            .deployer
            .create(component, implementation, &[])
            .await
            .map_err(failed)?;

        let calldata =
            abi::upgrade_to_and_call(created.address, reinitializer.unwrap_or_default());
        self.deployer
            .call(component, proxy, calldata)
            .await
            .map_err(failed)?;

        registry.set_implementation(component, created.address)?;
        registry.persist()?;

        tracing::info!(
            component,
            %proxy,
            implementation = %created.address,
            "Proxy upgraded"
        );

        Ok(Upgraded {
            component: component.to_string(),
            proxy,
            previous_implementation: previous,
            implementation: created,
        })
    }
}
