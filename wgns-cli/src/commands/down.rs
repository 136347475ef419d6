//! Down command implementation

use anyhow::{Context, Result};
use wgns_namespace::{NamespaceManager, Settings};

pub async fn execute(settings: Settings, namespace: &str) -> Result<()> {
    NamespaceManager::system(settings)
        .deflate(namespace)
        .await
        .with_context(|| format!("Failed to deflate {namespace}"))?;

    eprintln!("🧹 Namespace {namespace} deflated");
    Ok(())
}
