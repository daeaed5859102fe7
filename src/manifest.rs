//! YAML manifests of managed resources.
//!
//! A manifest is a list of resources, each with its `namespace`, `name`,
//! `spec`, and the `status` the last run observed:
//!
//! ```yaml
//! - namespace: default
//!   name: mike
//!   spec:
//!     firstName: Mike
//!     lastName: Davidson
//!     age: 34
//!     address: Here St, 1234
//!     email: mike@x.com
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use userop_reconciler::ManagedResource;

/// Read resources from a YAML manifest, rejecting duplicate keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if two entries
/// share a namespace and name.
pub fn load(path: &Path) -> Result<Vec<ManagedResource>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;

    let resources: Vec<ManagedResource> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse manifest {}", path.display()))?;

    let mut seen = HashSet::new();
    if let Some(dup) = resources.iter().find(|r| !seen.insert(&r.key)) {
        bail!("Duplicate resource {} in {}", dup.key, path.display());
    }

    Ok(resources)
}

/// Write resources back to a YAML manifest.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn save(path: &Path, resources: &[ManagedResource]) -> Result<()> {
    let content = serde_yaml::to_string(resources).context("Failed to serialize manifest")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write manifest {}", path.display()))
}
