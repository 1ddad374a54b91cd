//! stagehand-deploy - Deployment orchestration for multi-contract protocols.
//!
//! This crate deploys bare and proxied components in dependency order, keeps a
//! per-network address registry that makes every run resumable, grants
//! administrative roles between components and confirms deployments with a
//! source verification service.

pub mod abi;

mod artifact;
pub use artifact::{Artifact, ArtifactSource, DEFAULT_ARTIFACTS_DIR, ForgeArtifacts, PROXY_ARTIFACT};

mod chain;
pub use chain::{ChainClient, NetworkIdentity, PendingTx, Receipt, confirm};

mod config;
pub use config::{CONFIG_FILENAME, ENV_PREFIX, NetworkConfig, StagehandConfig, VerificationConfig};

mod deployer;
pub use deployer::{ContractDeployer, CreatedContract, Deployed};

mod error;
pub use error::{ChainError, DeployError};

mod gas;
pub use gas::{DEFAULT_BUMP_PERCENT, GasPriceStrategy, compute_bid};

mod pipeline;
pub use pipeline::{
    DeploymentPipeline, PipelineKind, PipelineReport, RunOptions, Unverified, Verification,
};

mod plan;
pub use plan::{
    CallSpec, DeploymentPlan, Grantee, InitArg, ParamType, ParamValue, ResolveContext, RoleGrant,
    Stage, StageKind, WireCall,
};

pub mod protocol;

mod registry;
pub use registry::{
    NetworkEntries, NetworkLock, NetworkPartition, NetworkRegistry, REGISTRY_FILENAME,
    RegistryDocument, RegistryEntry, read_document,
};

mod roles;
pub use roles::{GrantReport, ResolvedGrant, RoleGrantOrchestrator};

mod rpc;
pub use rpc::{
    DEFAULT_CONFIRMATION_TIMEOUT, RpcChainClient, RpcError, create_client, json_rpc_call,
};

mod upgrade;
pub use upgrade::{ProxyUpgradeCoordinator, Upgraded};

mod verify;
pub use verify::{
    DEFAULT_BACKOFF, EtherscanVerifier, VerificationPoller, VerificationRequest,
    VerificationService, VerificationStatus,
};
