//! Administrative role grants between components.

use alloy_core::primitives::{Address, B256};

use crate::{
    abi,
    chain::ChainClient,
    deployer::ContractDeployer,
    error::DeployError,
    plan::{ResolveContext, RoleGrant},
    registry::NetworkRegistry,
};

/// A grant with every name resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrant {
    pub component: String,
    pub role: String,
    pub target: Address,
    pub role_id: B256,
    pub grantee: Address,
}

/// What happened to each grant of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantReport {
    pub granted: Vec<ResolvedGrant>,
    pub already_held: Vec<ResolvedGrant>,
}

/// Issues the grant table in order, one transaction at a time.
///
/// Later grants can depend on earlier ones (the operator has to hold an admin role
/// before granting further roles), so grants are never reordered or batched.
pub struct RoleGrantOrchestrator<'d, 'a, C> {
    deployer: &'d ContractDeployer<'a, C>,
    check_first: bool,
}

impl<'d, 'a, C: ChainClient> RoleGrantOrchestrator<'d, 'a, C> {
    pub fn new(deployer: &'d ContractDeployer<'a, C>) -> Self {
        Self {
            deployer,
            check_first: true,
        }
    }

    /// Whether to query `hasRole` before each grant and skip roles already held.
    pub fn check_first(mut self, check_first: bool) -> Self {
        self.check_first = check_first;
        self
    }

    /// Resolve every grant up front so a missing component aborts before any
    /// transaction.
    pub fn resolve(
        registry: &NetworkRegistry,
        ctx: &ResolveContext<'_>,
        grants: &[RoleGrant],
    ) -> Result<Vec<ResolvedGrant>, DeployError> {
        grants
            .iter()
            .map(|grant| {
                Ok(ResolvedGrant {
                    component: grant.component.clone(),
                    role: grant.role.clone(),
                    target: ctx.address_of(registry, &grant.component)?,
                    role_id: abi::role_id(&grant.role),
                    grantee: ctx.grantee_address(registry, &grant.grantee)?,
                })
            })
            .collect()
    }

    /// Execute `grants` sequentially.
    pub async fn run(
        &self,
        registry: &NetworkRegistry,
        ctx: &ResolveContext<'_>,
        grants: &[RoleGrant],
    ) -> Result<GrantReport, DeployError> {
        let resolved = Self::resolve(registry, ctx, grants)?;
        let mut report = GrantReport::default();

        for grant in resolved {
            if self.check_first && self.holds(&grant).await {
                tracing::info!(
                    component = %grant.component,
                    role = %grant.role,
                    grantee = %grant.grantee,
                    "Role already held, skipping grant"
                );
                report.already_held.push(grant);
                continue;
            }

            let stage = format!("grant {} on {}", grant.role, grant.component);
            self.deployer
                .call(
                    &stage,
                    grant.target,
                    abi::grant_role_call(grant.role_id, grant.grantee),
                )
                .await?;

            tracing::info!(
                component = %grant.component,
                role = %grant.role,
                grantee = %grant.grantee,
                "Role granted"
            );
            report.granted.push(grant);
        }

        Ok(report)
    }

    /// Query `hasRole`. Any failure counts as not held, since granting again is harmless.
    async fn holds(&self, grant: &ResolvedGrant) -> bool {
        let calldata = abi::has_role_call(grant.role_id, grant.grantee);
        match self.deployer.client().read_call(grant.target, calldata).await {
            Ok(data) => abi::decode_bool(&data).unwrap_or(false),
            Err(e) => {
                tracing::warn!(
                    component = %grant.component,
                    role = %grant.role,
                    error = %e,
                    "hasRole query failed, granting anyway"
                );
                false
            }
        }
    }
}
