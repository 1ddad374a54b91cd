//! Compiled component artifacts.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::error::DeployError;

/// Default directory holding forge compilation output.
pub const DEFAULT_ARTIFACTS_DIR: &str = "out";

/// Name of the proxy component used for every upgradeable deployment.
pub const PROXY_ARTIFACT: &str = "ERC1967Proxy";

/// A deployable component: name, interface description and creation bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub abi: Value,
    pub bytecode: Bytes,
}

/// Source of compiled artifacts.
pub trait ArtifactSource: Send + Sync {
    /// Load the artifact for a component name.
    fn load(&self, name: &str) -> Result<Artifact, DeployError>;
}

#[derive(Debug, Deserialize)]
struct ForgeArtifact {
    abi: Value,
    bytecode: ForgeBytecode,
}

#[derive(Debug, Deserialize)]
struct ForgeBytecode {
    object: String,
}

/// Reads artifacts from a forge `out/` directory laid out as `<Name>.sol/<Name>.json`.
#[derive(Debug, Clone)]
pub struct ForgeArtifacts {
    root: PathBuf,
}

impl ForgeArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the artifact file for `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.sol")).join(format!("{name}.json"))
    }

    fn read(&self, path: &Path, name: &str) -> anyhow::Result<Artifact> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let parsed: ForgeArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let object = parsed.bytecode.object.trim_start_matches("0x");
        anyhow::ensure!(!object.is_empty(), "Artifact {name} has empty bytecode");
        let bytecode = hex::decode(object)
            .with_context(|| format!("Artifact {name} has invalid bytecode hex"))?;

        Ok(Artifact {
            name: name.to_string(),
            abi: parsed.abi,
            bytecode: Bytes::from(bytecode),
        })
    }
}

impl ArtifactSource for ForgeArtifacts {
    fn load(&self, name: &str) -> Result<Artifact, DeployError> {
        let path = self.artifact_path(name);
        self.read(&path, name)
            .map_err(|e| DeployError::config(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn write_artifact(root: &Path, name: &str, body: &str) {
        let dir = root.join(format!("{name}.sol"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.json")), body).unwrap();
    }

    #[test]
    fn test_load_forge_artifact() {
        let dir = TempDir::new("stagehand-test").expect("Failed to create temp dir");
        write_artifact(
            dir.path(),
            "TwapV3",
            r#"{"abi": [], "bytecode": {"object": "0x6080604052"}}"#,
        );

        let artifact = ForgeArtifacts::new(dir.path()).load("TwapV3").unwrap();
        assert_eq!(artifact.name, "TwapV3");
        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
    }

    #[test]
    fn test_missing_artifact_is_configuration_error() {
        let dir = TempDir::new("stagehand-test").expect("Failed to create temp dir");
        assert!(matches!(
            ForgeArtifacts::new(dir.path()).load("Missing"),
            Err(DeployError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_bytecode_is_rejected() {
        let dir = TempDir::new("stagehand-test").expect("Failed to create temp dir");
        write_artifact(
            dir.path(),
            "Interface",
            r#"{"abi": [], "bytecode": {"object": "0x"}}"#,
        );

        assert!(ForgeArtifacts::new(dir.path()).load("Interface").is_err());
    }
}
