//! Loading Applications into the local store at startup.

use std::path::Path;

use anyhow::{Context, Result};
use appsync_core::Application;
use appsync_store::ObjectStore;
use serde::Deserialize;
use tracing::{info, warn};

/// Parse a YAML stream of Applications, one per document.
///
/// Empty documents are skipped.
///
/// # Errors
///
/// Returns an error naming the offending document if one does not parse
/// or lacks a name or namespace.
pub fn parse_applications(yaml: &str) -> Result<Vec<Application>> {
    let mut apps = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let parsed = Option::<Application>::deserialize(document)
            .with_context(|| format!("document {index} is not an Application"))?;
        let Some(app) = parsed else {
            continue;
        };
        if app.metadata.name.is_empty() || app.metadata.namespace.is_empty() {
            anyhow::bail!("document {index}: metadata.name and metadata.namespace are required");
        }
        apps.push(app);
    }
    Ok(apps)
}

/// Read and parse an Applications file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_applications(path: &Path) -> Result<Vec<Application>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_applications(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Create each Application in `store`, skipping ones that already exist.
///
/// Returns the number created.
///
/// # Errors
///
/// Returns an error on any store failure other than already-exists.
pub async fn seed_store(store: &dyn ObjectStore, apps: Vec<Application>) -> Result<usize> {
    let mut created = 0;
    for app in apps {
        let key = app.key();
        match store.create_application(app).await {
            Ok(_) => {
                info!(key = %key, "Loaded application");
                created += 1;
            }
            Err(e) if e.is_already_exists() => {
                warn!(key = %key, "Application already present, skipping");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create application {key}"));
            }
        }
    }
    Ok(created)
}
