//! Durable per-network address registry.
//!
//! The registry file is a JSON document keyed by network name. Each network maps
//! component names to either a bare address string or a `{proxy, implementation}`
//! pair:
//!
//! ```json
//! {
//!     "amoy": {
//!         "TwapV3": "0x...",
//!         "DevLicenseDimo": { "proxy": "0x...", "implementation": "0x..." }
//!     }
//! }
//! ```
//!
//! Wiring calls that a committed stage still owes are listed under the reserved
//! `$pendingWiring` key of the partition until each one is confirmed, so a halted
//! run picks them up again.
//!
//! A [`NetworkRegistry`] owns exactly one network partition. Persisting re-reads the
//! file under an exclusive lock and replaces only that partition, so runs against
//! different networks never clobber each other.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Default file name of the registry.
pub const REGISTRY_FILENAME: &str = "deployments.json";

/// Indentation used when pretty-printing the registry.
const INDENT: &[u8] = b"    ";

/// A registry value for one component on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistryEntry {
    /// A non-upgradeable component.
    Simple(Address),
    /// An upgradeable component behind a proxy.
    Proxied {
        /// Stable public address of the component.
        proxy: Address,
        /// Current implementation the proxy forwards to.
        implementation: Address,
    },
}

impl RegistryEntry {
    /// The address other components should talk to.
    ///
    /// For proxied components this is the proxy, never the implementation.
    pub fn address(&self) -> Address {
        match self {
            RegistryEntry::Simple(address) => *address,
            RegistryEntry::Proxied { proxy, .. } => *proxy,
        }
    }
}

/// Mapping from component name to entry for a single network.
pub type NetworkEntries = BTreeMap<String, RegistryEntry>;

/// One network's partition of the registry document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPartition {
    /// Ids of wiring calls owed by committed stages.
    #[serde(
        rename = "$pendingWiring",
        default,
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub pending_wiring: BTreeSet<String>,
    #[serde(flatten)]
    pub entries: NetworkEntries,
}

/// The whole registry document: network name to partition.
pub type RegistryDocument = BTreeMap<String, NetworkPartition>;

/// Handle on one network's partition of the registry file.
#[derive(Debug)]
pub struct NetworkRegistry {
    path: PathBuf,
    network: String,
    partition: NetworkPartition,
    dirty: bool,
}

impl NetworkRegistry {
    /// Load the partition for `network` from the registry file at `path`.
    ///
    /// A missing file is treated as an empty registry.
    pub fn load(path: impl Into<PathBuf>, network: &str) -> Result<Self, DeployError> {
        let path = path.into();
        let partition = read_document(&path)?.remove(network).unwrap_or_default();

        tracing::debug!(
            path = %path.display(),
            network,
            entries = partition.entries.len(),
            pending_wiring = partition.pending_wiring.len(),
            "Registry loaded"
        );

        Ok(Self {
            path,
            network: network.to_string(),
            partition,
            dirty: false,
        })
    }

    /// The network this partition belongs to.
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries of this network.
    pub fn entries(&self) -> &NetworkEntries {
        &self.partition.entries
    }

    /// Look up a component.
    pub fn get(&self, component: &str) -> Option<&RegistryEntry> {
        self.partition.entries.get(component)
    }

    /// Whether a component already has an entry.
    pub fn contains(&self, component: &str) -> bool {
        self.partition.entries.contains_key(component)
    }

    /// Ids of wiring calls still owed on this network.
    pub fn pending_wiring(&self) -> &BTreeSet<String> {
        &self.partition.pending_wiring
    }

    pub fn is_wiring_pending(&self, id: &str) -> bool {
        self.partition.pending_wiring.contains(id)
    }

    /// Insert or replace the entry of a component in memory.
    ///
    /// Call [`NetworkRegistry::persist`] to make the change durable.
    pub fn put(&mut self, component: &str, entry: RegistryEntry) {
        if self.partition.entries.get(component) != Some(&entry) {
            self.partition.entries.insert(component.to_string(), entry);
            self.dirty = true;
        }
    }

    /// Replace only the implementation of a proxied component.
    ///
    /// The proxy address is preserved. Fails if the component is absent or not proxied.
    pub fn set_implementation(
        &mut self,
        component: &str,
        implementation: Address,
    ) -> Result<(), DeployError> {
        match self.partition.entries.get(component) {
            Some(RegistryEntry::Proxied { proxy, .. }) => {
                let proxy = *proxy;
                self.put(
                    component,
                    RegistryEntry::Proxied {
                        proxy,
                        implementation,
                    },
                );
                Ok(())
            }
            Some(RegistryEntry::Simple(_)) => Err(DeployError::config(format!(
                "`{component}` is not an upgradeable component on {}",
                self.network
            ))),
            None => Err(DeployError::config(format!(
                "`{component}` has no registry entry on {}",
                self.network
            ))),
        }
    }

    /// Insert or replace an entry and flush it to disk immediately.
    pub fn record(&mut self, component: &str, entry: RegistryEntry) -> Result<(), DeployError> {
        self.record_with_wiring(component, entry, std::iter::empty())
    }

    /// Record an entry together with the wiring calls its stage now owes, in a
    /// single write.
    pub fn record_with_wiring(
        &mut self,
        component: &str,
        entry: RegistryEntry,
        wiring: impl IntoIterator<Item = String>,
    ) -> Result<(), DeployError> {
        self.put(component, entry);
        for id in wiring {
            self.dirty |= self.partition.pending_wiring.insert(id);
        }
        self.persist()
    }

    /// Mark a wiring call as confirmed and flush.
    pub fn complete_wiring(&mut self, id: &str) -> Result<(), DeployError> {
        self.dirty |= self.partition.pending_wiring.remove(id);
        self.persist()
    }

    /// Flush pending changes to disk.
    ///
    /// The write goes to a temporary file that is renamed over the registry, so a
    /// crash leaves either the old or the new document, never a torn one. Does
    /// nothing when there are no pending changes.
    pub fn persist(&mut self) -> Result<(), DeployError> {
        if !self.dirty {
            return Ok(());
        }

        let lock = lock_registry(&self.path)?;

        let mut document = read_document(&self.path)?;
        document.insert(self.network.clone(), self.partition.clone());
        write_document(&self.path, &document)?;

        lock.unlock()
            .map_err(|e| DeployError::Registry(format!("failed to release registry lock: {e}")))?;

        self.dirty = false;
        tracing::info!(
            path = %self.path.display(),
            network = %self.network,
            "Registry persisted"
        );
        Ok(())
    }
}

/// Exclusive claim on one network's partition for the duration of a pipeline run.
///
/// Only one pipeline may write a given network at a time. The lock is released
/// when this guard is dropped.
#[derive(Debug)]
pub struct NetworkLock {
    file: File,
    path: PathBuf,
}

impl NetworkLock {
    /// Try to claim `network` in the registry at `registry_path` without blocking.
    pub fn acquire(registry_path: &Path, network: &str) -> Result<Self, DeployError> {
        let path = lock_path(registry_path, Some(network));
        let file = open_lock_file(&path)?;

        file.try_lock_exclusive().map_err(|_| {
            DeployError::config(format!(
                "another pipeline is already running against {network} (lock held on {})",
                path.display()
            ))
        })?;

        Ok(Self { file, path })
    }
}

impl Drop for NetworkLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to release network lock"
            );
        }
    }
}

/// Read the full registry document. A missing file yields an empty document.
pub fn read_document(path: &Path) -> Result<RegistryDocument, DeployError> {
    if !path.exists() {
        return Ok(RegistryDocument::new());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| DeployError::Registry(format!("failed to read {}: {e}", path.display())))?;

    if content.trim().is_empty() {
        return Ok(RegistryDocument::new());
    }

    serde_json::from_str(&content)
        .map_err(|e| DeployError::Registry(format!("failed to parse {}: {e}", path.display())))
}

fn write_document(path: &Path, document: &RegistryDocument) -> Result<(), DeployError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(INDENT);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document
        .serialize(&mut ser)
        .map_err(|e| DeployError::Registry(format!("failed to serialize registry: {e}")))?;
    buf.push(b'\n');

    let tmp_path = path.with_extension("json.tmp");
    let write_tmp = || -> std::io::Result<()> {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()
    };
    write_tmp().map_err(|e| {
        DeployError::Registry(format!("failed to write {}: {e}", tmp_path.display()))
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        DeployError::Registry(format!(
            "failed to move {} over {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

fn lock_path(registry_path: &Path, network: Option<&str>) -> PathBuf {
    let file_name = registry_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| REGISTRY_FILENAME.to_string());

    let lock_name = match network {
        Some(network) => format!(".{file_name}.{network}.lock"),
        None => format!(".{file_name}.lock"),
    };

    registry_path.with_file_name(lock_name)
}

fn open_lock_file(path: &Path) -> Result<File, DeployError> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| DeployError::Registry(format!("failed to open {}: {e}", path.display())))
}

/// Blocking exclusive lock on the whole registry file, held while merging a partition.
fn lock_registry(registry_path: &Path) -> Result<File, DeployError> {
    let path = lock_path(registry_path, None);
    let file = open_lock_file(&path)?;
    file.lock_exclusive()
        .map_err(|e| DeployError::Registry(format!("failed to lock {}: {e}", path.display())))?;
    Ok(file)
}
