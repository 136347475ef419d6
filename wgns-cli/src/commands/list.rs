//! List command implementation

use anyhow::{Context, Result};
use wgns_namespace::{NamespaceManager, Settings};

pub async fn execute(settings: Settings, all: bool) -> Result<()> {
    tracing::debug!(all, "Listing namespaces");

    let names = NamespaceManager::system(settings)
        .list(all)
        .await
        .context("Failed to list namespaces")?;

    if names.is_empty() {
        eprintln!("No namespaces");
    }
    for name in &names {
        println!("{name}");
    }

    Ok(())
}
