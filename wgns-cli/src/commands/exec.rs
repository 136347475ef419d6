//! Exec command implementation

use anyhow::{Context, Result};
use wgns_core::NamespaceName;
use wgns_namespace::{LaunchOptions, NamespaceManager, Settings};

use super::run::supervise;

pub async fn execute(
    settings: Settings,
    namespace: &str,
    auto_deflate: bool,
    user: Option<String>,
    command: &str,
) -> Result<()> {
    let namespace = NamespaceName::new(namespace).context("Invalid namespace name")?;
    let manager = NamespaceManager::system(settings);

    let mut launch = LaunchOptions::new().with_auto_deflate(auto_deflate);
    if let Some(user) = user {
        launch = launch.with_user(user);
    }

    let process = manager
        .launch(&namespace, command, launch)
        .with_context(|| format!("Failed to launch `{command}` in {namespace}"))?;

    supervise(process).await
}
