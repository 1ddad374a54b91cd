//! The top-level sequencer.
//!
//! A run works on exactly one network. It claims the network's lock, reads the
//! registry fresh, validates the plan, and then executes stages one after the
//! other. Every deployed stage is persisted before the next one starts, together
//! with the wiring calls it owes, so an interrupted run resumes where it stopped.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use alloy_core::primitives::Address;
use strum::Display;

use crate::{
    abi,
    artifact::{Artifact, ArtifactSource, PROXY_ARTIFACT},
    chain::ChainClient,
    config::NetworkConfig,
    deployer::{ContractDeployer, CreatedContract, Deployed},
    error::DeployError,
    plan::{DeploymentPlan, ResolveContext, Stage, StageKind, WireCall},
    registry::{NetworkLock, NetworkRegistry, RegistryEntry},
    roles::RoleGrantOrchestrator,
    upgrade::{ProxyUpgradeCoordinator, Upgraded},
    verify::{VerificationPoller, VerificationRequest, VerificationService, VerificationStatus},
};

/// Which pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PipelineKind {
    /// Deploy missing stages, then grant roles, then issue outstanding wiring calls.
    Deploy,
    /// Replace implementations behind existing proxies.
    Upgrade,
    /// Only evaluate the role grant table.
    Grant,
}

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Verify every contract created by this run.
    pub verify: bool,
    /// Components to upgrade. Empty means every upgradeable stage of the plan.
    pub components: Vec<String>,
}

/// Verification settings for a run.
#[derive(Debug)]
pub struct Verification<'a, V> {
    pub service: &'a V,
    pub backoff: Duration,
    /// Wall-clock budget per contract.
    pub budget: Duration,
}

/// Placeholder service for pipelines built without verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unverified;

impl VerificationService for Unverified {
    async fn attempt(&self, _request: &VerificationRequest) -> anyhow::Result<VerificationStatus> {
        anyhow::bail!("verification is not configured")
    }
}

/// What a run did.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub network: String,
    pub deployed: Vec<(String, RegistryEntry)>,
    pub skipped: Vec<String>,
    pub upgraded: Vec<Upgraded>,
    pub granted: usize,
    pub already_held: usize,
    pub wired: Vec<String>,
    pub verified: Vec<Address>,
    /// Non-fatal [`DeployError::VerificationTimedOut`] errors.
    pub verification_timeouts: Vec<DeployError>,
}

impl PipelineReport {
    /// Emit a one-line summary.
    pub fn log_summary(&self) {
        tracing::info!(
            network = %self.network,
            deployed = self.deployed.len(),
            skipped = self.skipped.len(),
            upgraded = self.upgraded.len(),
            granted = self.granted,
            already_held = self.already_held,
            wired = self.wired.len(),
            verified = self.verified.len(),
            verification_timeouts = self.verification_timeouts.len(),
            "Pipeline finished"
        );
        for timeout in &self.verification_timeouts {
            tracing::error!(%timeout, "Contract left unverified");
        }
    }
}

/// Runs a [`DeploymentPlan`] against one network.
pub struct DeploymentPipeline<'a, C, A, V = Unverified> {
    client: &'a C,
    artifacts: &'a A,
    plan: &'a DeploymentPlan,
    network_name: String,
    network: &'a NetworkConfig,
    registry_path: PathBuf,
    verification: Option<Verification<'a, V>>,
}

impl<'a, C, A> DeploymentPipeline<'a, C, A, Unverified>
where
    C: ChainClient,
    A: ArtifactSource,
{
    pub fn new(
        client: &'a C,
        artifacts: &'a A,
        plan: &'a DeploymentPlan,
        network_name: impl Into<String>,
        network: &'a NetworkConfig,
        registry_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            artifacts,
            plan,
            network_name: network_name.into(),
            network,
            registry_path: registry_path.into(),
            verification: None,
        }
    }

    /// Enable source verification through `verification.service`.
    pub fn with_verification<W: VerificationService>(
        self,
        verification: Verification<'a, W>,
    ) -> DeploymentPipeline<'a, C, A, W> {
        DeploymentPipeline {
            client: self.client,
            artifacts: self.artifacts,
            plan: self.plan,
            network_name: self.network_name,
            network: self.network,
            registry_path: self.registry_path,
            verification: Some(verification),
        }
    }
}

impl<'a, C, A, V> DeploymentPipeline<'a, C, A, V>
where
    C: ChainClient,
    A: ArtifactSource,
    V: VerificationService,
{
    /// Run `kind` to completion or to the first fatal error.
    pub async fn run(
        &self,
        kind: PipelineKind,
        options: &RunOptions,
    ) -> Result<PipelineReport, DeployError> {
        let gas = self.network.gas_strategy()?;
        let _lock = NetworkLock::acquire(&self.registry_path, &self.network_name)?;
        let mut registry = NetworkRegistry::load(&self.registry_path, &self.network_name)?;
        let ctx = self.network.resolve_context();
        self.plan.validate(&ctx)?;
        self.check_network().await?;

        tracing::info!(
            network = %self.network_name,
            %kind,
            registry = %self.registry_path.display(),
            known_components = registry.entries().len(),
            "Starting pipeline"
        );

        let deployer = ContractDeployer::new(self.client, gas);
        let mut report = PipelineReport {
            network: self.network_name.clone(),
            ..Default::default()
        };

        match kind {
            PipelineKind::Deploy => {
                self.deploy(&deployer, &mut registry, &ctx, options, &mut report)
                    .await?
            }
            PipelineKind::Upgrade => {
                self.upgrade(&deployer, &mut registry, options, &mut report)
                    .await?
            }
            PipelineKind::Grant => self.grant(&deployer, &registry, &ctx, &mut report).await?,
        }

        report.log_summary();
        Ok(report)
    }

    /// Refuse to run against an endpoint that is not the configured chain.
    async fn check_network(&self) -> Result<(), DeployError> {
        let identity = self
            .client
            .network_identity()
            .await
            .map_err(|e| DeployError::config(format!("cannot reach {}: {e}", self.network_name)))?;

        if identity.chain_id != self.network.chain_id {
            return Err(DeployError::config(format!(
                "network `{}` expects chain id {}, endpoint reports {}",
                self.network_name, self.network.chain_id, identity.chain_id
            )));
        }
        Ok(())
    }

    async fn deploy(
        &self,
        deployer: &ContractDeployer<'a, C>,
        registry: &mut NetworkRegistry,
        ctx: &ResolveContext<'_>,
        options: &RunOptions,
        report: &mut PipelineReport,
    ) -> Result<(), DeployError> {
        let artifacts = self.preload(
            self.plan
                .stages
                .iter()
                .filter(|s| !registry.contains(&s.component)),
        )?;

        for stage in &self.plan.stages {
            if let Some(entry) = registry.get(&stage.component) {
                tracing::info!(
                    component = %stage.component,
                    address = %entry.address(),
                    "Already deployed, skipping"
                );
                report.skipped.push(stage.component.clone());
                continue;
            }

            let deployed = self
                .deploy_stage(deployer, registry, ctx, stage, &artifacts)
                .await?;
            registry.record_with_wiring(
                &stage.component,
                deployed.entry,
                stage.wire.iter().map(WireCall::id),
            )?;

            tracing::info!(
                component = %stage.component,
                address = %deployed.entry.address(),
                "Stage committed"
            );
            report.deployed.push((stage.component.clone(), deployed.entry));

            if options.verify {
                self.verify_all(&deployed.created, report).await;
            }
        }

        self.grant(deployer, registry, ctx, report).await?;
        self.wire(deployer, registry, ctx, report).await
    }

    /// Issue every wiring call the registry lists as outstanding, in plan order.
    ///
    /// Each call is struck from the registry only once it is confirmed, so a run
    /// halted before or during wiring issues the remainder on the next run.
    async fn wire(
        &self,
        deployer: &ContractDeployer<'a, C>,
        registry: &mut NetworkRegistry,
        ctx: &ResolveContext<'_>,
        report: &mut PipelineReport,
    ) -> Result<(), DeployError> {
        let outstanding: Vec<(&Stage, &WireCall)> = self
            .plan
            .stages
            .iter()
            .flat_map(|stage| stage.wire.iter().map(move |wire| (stage, wire)))
            .filter(|(_, wire)| registry.is_wiring_pending(&wire.id()))
            .collect();

        let known: Vec<String> = outstanding.iter().map(|(_, wire)| wire.id()).collect();
        for id in registry.pending_wiring() {
            if !known.contains(id) {
                tracing::warn!(%id, "Outstanding wiring call is not part of the plan, ignoring");
            }
        }

        for (stage, wire) in outstanding {
            let id = wire.id();
            let target = ctx.address_of(registry, &wire.target)?;
            let args = ctx.resolve_all(registry, &wire.call.args)?;
            deployer
                .call(
                    &format!("wire {id}"),
                    target,
                    abi::encode_call(&wire.call.signature, &args),
                )
                .await?;
            registry.complete_wiring(&id)?;

            tracing::info!(
                component = %stage.component,
                target = %wire.target,
                call = %wire.call.signature,
                "Wiring call executed"
            );
            report.wired.push(id);
        }

        Ok(())
    }

    async fn deploy_stage(
        &self,
        deployer: &ContractDeployer<'a, C>,
        registry: &NetworkRegistry,
        ctx: &ResolveContext<'_>,
        stage: &Stage,
        artifacts: &BTreeMap<String, Artifact>,
    ) -> Result<Deployed, DeployError> {
        let artifact = lookup(artifacts, &stage.component)?;

        match &stage.kind {
            StageKind::Bare { constructor_args } => {
                let args = ctx.resolve_all(registry, constructor_args)?;
                deployer.deploy_bare(&stage.component, artifact, &args).await
            }
            StageKind::Proxy { initializer } => {
                let calldata = initializer
                    .as_ref()
                    .map(|call| {
                        ctx.resolve_all(registry, &call.args)
                            .map(|args| abi::encode_call(&call.signature, &args))
                    })
                    .transpose()?;
                let proxy = lookup(artifacts, PROXY_ARTIFACT)?;
                deployer
                    .deploy_upgradeable(&stage.component, artifact, proxy, calldata)
                    .await
            }
        }
    }

    async fn upgrade(
        &self,
        deployer: &ContractDeployer<'a, C>,
        registry: &mut NetworkRegistry,
        options: &RunOptions,
        report: &mut PipelineReport,
    ) -> Result<(), DeployError> {
        let targets: Vec<&Stage> = if options.components.is_empty() {
            self.plan.upgradeable().collect()
        } else {
            options
                .components
                .iter()
                .map(|name| match self.plan.stage(name) {
                    Some(stage) if stage.is_upgradeable() => Ok(stage),
                    Some(_) => Err(DeployError::config(format!(
                        "`{name}` is not an upgradeable component"
                    ))),
                    None => Err(DeployError::config(format!(
                        "`{name}` is not part of the plan"
                    ))),
                })
                .collect::<Result<_, _>>()?
        };

        for stage in &targets {
            if !matches!(registry.get(&stage.component), Some(RegistryEntry::Proxied { .. })) {
                return Err(DeployError::config(format!(
                    "cannot upgrade `{}`: no proxied registry entry on {}",
                    stage.component, self.network_name
                )));
            }
        }

        let artifacts = self.preload(targets.iter().copied())?;
        let coordinator = ProxyUpgradeCoordinator::new(deployer);

        for stage in targets {
            let artifact = lookup(&artifacts, &stage.component)?;
            let upgraded = coordinator
                .upgrade(registry, &stage.component, artifact, None)
                .await?;

            if options.verify {
                self.verify_all(std::slice::from_ref(&upgraded.implementation), report)
                    .await;
            }
            report.upgraded.push(upgraded);
        }

        Ok(())
    }

    async fn grant(
        &self,
        deployer: &ContractDeployer<'a, C>,
        registry: &NetworkRegistry,
        ctx: &ResolveContext<'_>,
        report: &mut PipelineReport,
    ) -> Result<(), DeployError> {
        let grants = RoleGrantOrchestrator::new(deployer)
            .run(registry, ctx, &self.plan.grants)
            .await?;

        report.granted += grants.granted.len();
        report.already_held += grants.already_held.len();
        Ok(())
    }

    /// Verify each created contract within the configured budget.
    ///
    /// A timeout is recorded and logged but never stops the run.
    async fn verify_all(&self, created: &[CreatedContract], report: &mut PipelineReport) {
        let Some(verification) = &self.verification else {
            tracing::warn!("Verification requested but no verification service is configured");
            return;
        };
        let poller = VerificationPoller::new(verification.service, verification.backoff);

        for contract in created {
            let request = VerificationRequest {
                chain_id: self.network.chain_id,
                address: contract.address,
                component: contract.artifact.clone(),
                constructor_args: (!contract.constructor_args.is_empty())
                    .then(|| contract.constructor_args.clone()),
            };

            match poller.poll_within(&request, verification.budget).await {
                Ok(_) => report.verified.push(contract.address),
                Err(e) => {
                    tracing::error!(
                        component = %contract.artifact,
                        address = %contract.address,
                        budget = ?verification.budget,
                        "Verification timed out, contract is deployed but unverified"
                    );
                    report.verification_timeouts.push(e);
                }
            }
        }
    }

    /// Load every artifact the given stages need before any transaction is sent.
    fn preload<'s>(
        &self,
        stages: impl Iterator<Item = &'s Stage>,
    ) -> Result<BTreeMap<String, Artifact>, DeployError> {
        let mut loaded = BTreeMap::new();
        for stage in stages {
            let mut names = vec![stage.component.as_str()];
            if stage.is_upgradeable() {
                names.push(PROXY_ARTIFACT);
            }
            for name in names {
                if !loaded.contains_key(name) {
                    loaded.insert(name.to_string(), self.artifacts.load(name)?);
                }
            }
        }
        Ok(loaded)
    }
}

fn lookup<'m>(
    artifacts: &'m BTreeMap<String, Artifact>,
    name: &str,
) -> Result<&'m Artifact, DeployError> {
    artifacts
        .get(name)
        .ok_or_else(|| DeployError::config(format!("artifact `{name}` was not loaded")))
}
