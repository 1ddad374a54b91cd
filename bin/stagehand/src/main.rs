//! stagehand is a CLI tool to deploy and administer a multi-contract protocol
//! across several networks.

mod cli;

use anyhow::Result;
use clap::Parser;
use comfy_table::Table;

use cli::{Cli, Command};
use stagehand_deploy::{
    DeploymentPipeline, EtherscanVerifier, ForgeArtifacts, NetworkRegistry, PipelineKind,
    RegistryEntry, RpcChainClient, RunOptions, StagehandConfig, Verification, protocol,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = StagehandConfig::load(&cli.config)?;

    match cli.command {
        Command::Deploy { network, verify } => {
            let options = RunOptions {
                verify,
                ..Default::default()
            };
            run(&config, &network.network, PipelineKind::Deploy, options).await
        }
        Command::Upgrade {
            network,
            components,
            verify,
        } => {
            let options = RunOptions { verify, components };
            run(&config, &network.network, PipelineKind::Upgrade, options).await
        }
        Command::Grant { network } => {
            run(&config, &network.network, PipelineKind::Grant, RunOptions::default()).await
        }
        Command::Status { network } => status(&config, &network.network),
    }
}

async fn run(
    config: &StagehandConfig,
    network_name: &str,
    kind: PipelineKind,
    mut options: RunOptions,
) -> Result<()> {
    let network = config.network(network_name)?;
    options.verify |= network.verification.enabled;

    let client = RpcChainClient::new(network.rpc_url.clone(), network_name, network.operator)?
        .with_confirmation_timeout(network.confirmation_timeout());
    let artifacts = ForgeArtifacts::new(&config.artifacts_dir);
    let plan = protocol::plan();

    tracing::info!(
        network = network_name,
        chain_id = network.chain_id,
        operator = %network.operator,
        %kind,
        verify = options.verify,
        "Running pipeline..."
    );

    let pipeline = DeploymentPipeline::new(
        &client,
        &artifacts,
        &plan,
        network_name,
        network,
        &config.registry_path,
    );

    let result = if options.verify && kind != PipelineKind::Grant {
        let (api_url, api_key) = network.verification.credentials()?;
        let verifier = EtherscanVerifier::new(api_url.clone(), api_key)?;
        pipeline
            .with_verification(Verification {
                service: &verifier,
                backoff: network.verification.backoff(),
                budget: network.verification.budget(),
            })
            .run(kind, &options)
            .await
    } else {
        pipeline.run(kind, &options).await
    };

    if let Err(e) = &result {
        if e.may_have_landed() {
            tracing::error!(
                error = %e,
                "The last transaction may have been mined. Check it on chain before re-running"
            );
        }
    }
    result?;

    Ok(())
}

fn status(config: &StagehandConfig, network_name: &str) -> Result<()> {
    config.network(network_name)?;
    let registry = NetworkRegistry::load(&config.registry_path, network_name)?;

    let mut table = Table::new();
    table.set_header(vec!["Component", "Address", "Implementation"]);
    for (component, entry) in registry.entries() {
        match entry {
            RegistryEntry::Simple(address) => {
                table.add_row(vec![component.clone(), address.to_string(), String::new()]);
            }
            RegistryEntry::Proxied {
                proxy,
                implementation,
            } => {
                table.add_row(vec![
                    component.clone(),
                    proxy.to_string(),
                    implementation.to_string(),
                ]);
            }
        }
    }

    println!("{network_name} ({})", config.registry_path.display());
    println!("{table}");

    if !registry.pending_wiring().is_empty() {
        println!("Outstanding wiring calls (issued by the next deploy run):");
        for id in registry.pending_wiring() {
            println!("  {id}");
        }
    }
    Ok(())
}
