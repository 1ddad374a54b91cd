//! Deployment plans: ordered stages, their inputs and the role grant table.
//!
//! A plan is data. The same plan runs against every network; per-network
//! variation (external addresses, operator, static parameters) comes from the
//! [`ResolveContext`] built from configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{error::DeployError, registry::NetworkRegistry};

/// Type expected for a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ParamType {
    #[display("address")]
    Address,
    #[display("uint256")]
    Uint,
    #[display("string")]
    String,
    #[display("bool")]
    Bool,
}

/// A static value from the network's `params` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(u64),
    Text(String),
}

/// One typed argument of a constructor, initializer or wiring call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitArg {
    /// Address of another component, taken from the registry or the external
    /// address table. Proxied components resolve to their proxy.
    Component(String),
    /// The operator account of the target network.
    Operator,
    /// A value from the network's `params` table.
    Param { key: String, ty: ParamType },
    Address(Address),
    Uint(U256),
    String(String),
    Bool(bool),
}

impl InitArg {
    pub fn component(name: impl Into<String>) -> Self {
        Self::Component(name.into())
    }

    pub fn param(key: impl Into<String>, ty: ParamType) -> Self {
        Self::Param {
            key: key.into(),
            ty,
        }
    }

    /// Name of the component this argument refers to, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Component(name) => Some(name),
            _ => None,
        }
    }
}

/// A call with a canonical signature and typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    /// Canonical function signature, e.g. `initialize(address,address)`.
    pub signature: String,
    pub args: Vec<InitArg>,
}

impl CallSpec {
    pub fn new(signature: impl Into<String>, args: Vec<InitArg>) -> Self {
        Self {
            signature: signature.into(),
            args,
        }
    }
}

/// A call issued against an existing component after the grant phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCall {
    pub target: String,
    pub call: CallSpec,
}

impl WireCall {
    /// Key under which an outstanding call is tracked in the registry.
    pub fn id(&self) -> String {
        format!("{}.{}", self.target, self.call.signature)
    }
}

/// How a stage produces its component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// A single creation transaction with constructor arguments.
    Bare { constructor_args: Vec<InitArg> },
    /// Implementation, then an ERC1967 proxy with empty data, then an optional
    /// separate initialize call against the proxy.
    Proxy { initializer: Option<CallSpec> },
}

/// One step of a deployment plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Component produced by this stage. Also the artifact name.
    pub component: String,
    pub kind: StageKind,
    /// Calls owed once all grants are in place. They become outstanding when the
    /// stage is committed and stay so until each one is confirmed.
    pub wire: Vec<WireCall>,
}

impl Stage {
    pub fn bare(component: impl Into<String>, constructor_args: Vec<InitArg>) -> Self {
        Self {
            component: component.into(),
            kind: StageKind::Bare { constructor_args },
            wire: Vec::new(),
        }
    }

    pub fn proxy(component: impl Into<String>, initializer: Option<CallSpec>) -> Self {
        Self {
            component: component.into(),
            kind: StageKind::Proxy { initializer },
            wire: Vec::new(),
        }
    }

    /// Add a wiring call against `target`.
    pub fn wire(mut self, target: impl Into<String>, call: CallSpec) -> Self {
        self.wire.push(WireCall {
            target: target.into(),
            call,
        });
        self
    }

    pub fn is_upgradeable(&self) -> bool {
        matches!(self.kind, StageKind::Proxy { .. })
    }

    /// Components whose address this stage needs before its deploy action runs.
    pub fn dependencies(&self) -> BTreeSet<&str> {
        let args: Box<dyn Iterator<Item = &InitArg>> = match &self.kind {
            StageKind::Bare { constructor_args } => Box::new(constructor_args.iter()),
            StageKind::Proxy { initializer } => {
                Box::new(initializer.iter().flat_map(|call| call.args.iter()))
            }
        };
        args.filter_map(InitArg::dependency).collect()
    }

    /// Components referenced by this stage's wiring calls.
    pub fn wire_dependencies(&self) -> BTreeSet<&str> {
        self.wire
            .iter()
            .flat_map(|w| {
                std::iter::once(w.target.as_str())
                    .chain(w.call.args.iter().filter_map(InitArg::dependency))
            })
            .collect()
    }
}

/// Who receives a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grantee {
    Operator,
    Component(String),
}

/// `(target component, role name, grantee)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub component: String,
    pub role: String,
    pub grantee: Grantee,
}

impl RoleGrant {
    pub fn to_operator(component: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            role: role.into(),
            grantee: Grantee::Operator,
        }
    }

    pub fn to_component(
        component: impl Into<String>,
        role: impl Into<String>,
        grantee: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            role: role.into(),
            grantee: Grantee::Component(grantee.into()),
        }
    }
}

/// Ordered stages plus the role grant table evaluated after them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentPlan {
    pub stages: Vec<Stage>,
    pub grants: Vec<RoleGrant>,
}

impl DeploymentPlan {
    pub fn new(stages: Vec<Stage>, grants: Vec<RoleGrant>) -> Self {
        Self { stages, grants }
    }

    pub fn stage(&self, component: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.component == component)
    }

    /// Components deployed behind a proxy, in plan order.
    pub fn upgradeable(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter().filter(|s| s.is_upgradeable())
    }

    /// Check the plan against the network context before any transaction.
    ///
    /// Every component a stage depends on must be produced by an earlier stage or
    /// be listed as an external address. Wiring calls and grants may reference any
    /// stage of the plan. Every referenced parameter must be configured.
    pub fn validate(&self, ctx: &ResolveContext<'_>) -> Result<(), DeployError> {
        let mut produced: BTreeSet<&str> = BTreeSet::new();
        let all: BTreeSet<&str> = self.stages.iter().map(|s| s.component.as_str()).collect();

        for stage in &self.stages {
            if stage.component.starts_with('$') {
                return Err(DeployError::config(format!(
                    "component name `{}` may not start with `$`",
                    stage.component
                )));
            }
            if ctx.external.contains_key(&stage.component) {
                return Err(DeployError::config(format!(
                    "`{}` is both a plan stage and an external address",
                    stage.component
                )));
            }
            for dep in stage.dependencies() {
                if !produced.contains(dep) && !ctx.external.contains_key(dep) {
                    let reason = if all.contains(dep) {
                        "is deployed by a later stage"
                    } else {
                        "is neither a plan stage nor an external address"
                    };
                    return Err(DeployError::config(format!(
                        "stage `{}` depends on `{dep}`, which {reason}",
                        stage.component
                    )));
                }
            }
            for dep in stage.wire_dependencies() {
                if !all.contains(dep) && !ctx.external.contains_key(dep) {
                    return Err(DeployError::config(format!(
                        "wiring of `{}` references unknown component `{dep}`",
                        stage.component
                    )));
                }
            }
            for arg in stage_args(stage) {
                if let InitArg::Param { key, ty } = arg {
                    ctx.param(key, *ty)?;
                }
            }
            if !produced.insert(stage.component.as_str()) {
                return Err(DeployError::config(format!(
                    "component `{}` appears in more than one stage",
                    stage.component
                )));
            }
        }

        for grant in &self.grants {
            if !all.contains(grant.component.as_str()) {
                return Err(DeployError::config(format!(
                    "grant of {} targets `{}`, which is not a plan stage",
                    grant.role, grant.component
                )));
            }
            if let Grantee::Component(name) = &grant.grantee {
                if !all.contains(name.as_str()) && !ctx.external.contains_key(name) {
                    return Err(DeployError::config(format!(
                        "grant of {} on `{}` names unknown grantee `{name}`",
                        grant.role, grant.component
                    )));
                }
            }
        }

        Ok(())
    }
}

fn stage_args(stage: &Stage) -> impl Iterator<Item = &InitArg> {
    let own: Vec<&InitArg> = match &stage.kind {
        StageKind::Bare { constructor_args } => constructor_args.iter().collect(),
        StageKind::Proxy { initializer } => initializer
            .iter()
            .flat_map(|call| call.args.iter())
            .collect(),
    };
    own.into_iter()
        .chain(stage.wire.iter().flat_map(|w| w.call.args.iter()))
}

/// Per-network values used to resolve [`InitArg`]s.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub operator: Address,
    pub external: &'a BTreeMap<String, Address>,
    pub params: &'a BTreeMap<String, ParamValue>,
}

impl<'a> ResolveContext<'a> {
    /// Address of `name`: the registry first, then the external table.
    pub fn address_of(
        &self,
        registry: &NetworkRegistry,
        name: &str,
    ) -> Result<Address, DeployError> {
        if let Some(entry) = registry.get(name) {
            return Ok(entry.address());
        }
        self.external.get(name).copied().ok_or_else(|| {
            DeployError::config(format!(
                "no registry entry or external address for `{name}` on {}",
                registry.network()
            ))
        })
    }

    /// Look up and type-check a configuration parameter.
    pub fn param(&self, key: &str, ty: ParamType) -> Result<DynSolValue, DeployError> {
        let value = self
            .params
            .get(key)
            .ok_or_else(|| DeployError::config(format!("missing parameter `{key}`")))?;
        let mismatch = || DeployError::config(format!("parameter `{key}` is not a valid {ty}"));

        match (ty, value) {
            (ParamType::Bool, ParamValue::Bool(b)) => Ok(DynSolValue::Bool(*b)),
            (ParamType::Uint, ParamValue::Integer(n)) => Ok(DynSolValue::Uint(U256::from(*n), 256)),
            (ParamType::Uint, ParamValue::Text(s)) => U256::from_str(s)
                .map(|n| DynSolValue::Uint(n, 256))
                .map_err(|_| mismatch()),
            (ParamType::Address, ParamValue::Text(s)) => Address::from_str(s)
                .map(DynSolValue::Address)
                .map_err(|_| mismatch()),
            (ParamType::String, ParamValue::Text(s)) => Ok(DynSolValue::String(s.clone())),
            _ => Err(mismatch()),
        }
    }

    /// Resolve a single argument into an ABI value.
    pub fn resolve(
        &self,
        registry: &NetworkRegistry,
        arg: &InitArg,
    ) -> Result<DynSolValue, DeployError> {
        Ok(match arg {
            InitArg::Component(name) => DynSolValue::Address(self.address_of(registry, name)?),
            InitArg::Operator => DynSolValue::Address(self.operator),
            InitArg::Param { key, ty } => self.param(key, *ty)?,
            InitArg::Address(a) => DynSolValue::Address(*a),
            InitArg::Uint(n) => DynSolValue::Uint(*n, 256),
            InitArg::String(s) => DynSolValue::String(s.clone()),
            InitArg::Bool(b) => DynSolValue::Bool(*b),
        })
    }

    pub fn resolve_all(
        &self,
        registry: &NetworkRegistry,
        args: &[InitArg],
    ) -> Result<Vec<DynSolValue>, DeployError> {
        args.iter().map(|arg| self.resolve(registry, arg)).collect()
    }

    pub fn grantee_address(
        &self,
        registry: &NetworkRegistry,
        grantee: &Grantee,
    ) -> Result<Address, DeployError> {
        match grantee {
            Grantee::Operator => Ok(self.operator),
            Grantee::Component(name) => self.address_of(registry, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryEntry;
    use tempdir::TempDir;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn abc_plan() -> DeploymentPlan {
        DeploymentPlan::new(
            vec![
                Stage::bare("A", vec![]),
                Stage::bare("B", vec![InitArg::component("A")]),
                Stage::proxy(
                    "C",
                    Some(CallSpec::new(
                        "initialize(address,address)",
                        vec![InitArg::component("A"), InitArg::component("B")],
                    )),
                ),
            ],
            vec![RoleGrant::to_operator("C", "ADMIN")],
        )
    }

    #[test]
    fn test_valid_plan() {
        let external = BTreeMap::new();
        let params = BTreeMap::new();
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };
        abc_plan().validate(&ctx).unwrap();
    }

    #[test]
    fn test_dependency_on_later_stage_is_rejected() {
        let plan = DeploymentPlan::new(
            vec![
                Stage::bare("B", vec![InitArg::component("A")]),
                Stage::bare("A", vec![]),
            ],
            vec![],
        );
        let external = BTreeMap::new();
        let params = BTreeMap::new();
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };

        let err = plan.validate(&ctx).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(ref m) if m.contains("later stage")));
    }

    #[test]
    fn test_external_dependency_is_accepted() {
        let plan = DeploymentPlan::new(
            vec![Stage::bare("B", vec![InitArg::component("Receiver")])],
            vec![],
        );
        let external = BTreeMap::from([("Receiver".to_string(), addr(9))]);
        let params = BTreeMap::new();
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };
        plan.validate(&ctx).unwrap();
    }

    #[test]
    fn test_missing_param_is_rejected() {
        let plan = DeploymentPlan::new(
            vec![Stage::bare(
                "A",
                vec![InitArg::param("license_cost_usd", ParamType::Uint)],
            )],
            vec![],
        );
        let external = BTreeMap::new();
        let params = BTreeMap::new();
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };
        assert!(plan.validate(&ctx).is_err());
    }

    #[test]
    fn test_duplicate_stage_is_rejected() {
        let plan = DeploymentPlan::new(
            vec![Stage::bare("A", vec![]), Stage::bare("A", vec![])],
            vec![],
        );
        let external = BTreeMap::new();
        let params = BTreeMap::new();
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };
        assert!(plan.validate(&ctx).is_err());
    }

    #[test]
    fn test_reserved_component_name_is_rejected() {
        let plan = DeploymentPlan::new(vec![Stage::bare("$pendingWiring", vec![])], vec![]);
        let external = BTreeMap::new();
        let params = BTreeMap::new();
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };
        assert!(matches!(
            plan.validate(&ctx),
            Err(DeployError::Configuration(ref m)) if m.contains("may not start with")
        ));
    }

    #[test]
    fn test_wire_call_id() {
        let stage = Stage::bare("Provider", vec![]).wire(
            "Provider",
            CallSpec::new("addOracleSource(address)", vec![InitArg::component("Oracle")]),
        );
        assert_eq!(stage.wire[0].id(), "Provider.addOracleSource(address)");
    }

    #[test]
    fn test_dependencies_and_upgradeable() {
        let plan = abc_plan();
        let c = plan.stage("C").unwrap();
        assert_eq!(c.dependencies(), BTreeSet::from(["A", "B"]));
        assert_eq!(
            plan.upgradeable().map(|s| s.component.as_str()).collect::<Vec<_>>(),
            vec!["C"]
        );
    }

    #[test]
    fn test_resolve_prefers_proxy_address() {
        let dir = TempDir::new("stagehand-test").expect("Failed to create temp dir");
        let mut registry =
            NetworkRegistry::load(dir.path().join("deployments.json"), "amoy").unwrap();
        registry.put(
            "C",
            RegistryEntry::Proxied {
                proxy: addr(0xcc),
                implementation: addr(0xdd),
            },
        );

        let external = BTreeMap::new();
        let params = BTreeMap::from([
            ("cost".to_string(), ParamValue::Text("1000000000000000000".to_string())),
            ("image".to_string(), ParamValue::Text("ipfs://x".to_string())),
        ]);
        let ctx = ResolveContext {
            operator: addr(1),
            external: &external,
            params: &params,
        };

        assert_eq!(
            ctx.resolve(&registry, &InitArg::component("C")).unwrap(),
            DynSolValue::Address(addr(0xcc))
        );
        assert_eq!(
            ctx.resolve(&registry, &InitArg::Operator).unwrap(),
            DynSolValue::Address(addr(1))
        );
        assert_eq!(
            ctx.resolve(&registry, &InitArg::param("cost", ParamType::Uint)).unwrap(),
            DynSolValue::Uint(U256::from(1_000_000_000_000_000_000u64), 256)
        );
        assert!(ctx.resolve(&registry, &InitArg::param("image", ParamType::Bool)).is_err());
        assert!(ctx.resolve(&registry, &InitArg::component("Missing")).is_err());
    }
}
