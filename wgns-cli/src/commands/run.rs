//! Run command implementation

use anyhow::{Context, Result};
use std::path::Path;
use wgns_namespace::{InflateOptions, LaunchOptions, NamespaceManager, Settings, SupervisedProcess};

pub async fn execute(
    settings: Settings,
    config: &Path,
    options: &InflateOptions,
    auto_deflate: bool,
    user: Option<String>,
    command: &str,
) -> Result<()> {
    tracing::info!(config = %config.display(), command, "Starting tunnel-confined command");

    let manager = NamespaceManager::system(settings);
    let mut launch = LaunchOptions::new().with_auto_deflate(auto_deflate);
    if let Some(user) = user {
        launch = launch.with_user(user);
    }

    let process = manager
        .run(config, command, options, launch)
        .await
        .with_context(|| format!("Failed to run `{command}` through {}", config.display()))?;

    supervise(process).await
}

/// Wait for a supervised child, forwarding Ctrl+C to it
pub async fn supervise(process: SupervisedProcess) -> Result<()> {
    let namespace = process.binding().namespace().clone();
    let pid = process.pid();
    let terminator = process.terminator();

    eprintln!(
        "🚀 Started in {namespace} (pid {})",
        pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
    );

    let wait = process.wait();
    tokio::pin!(wait);

    let report = loop {
        tokio::select! {
            report = &mut wait => break report?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                tracing::info!(namespace = %namespace, "Interrupted, terminating child");
                terminator.terminate();
            }
        }
    };

    if report.deflated {
        eprintln!("🧹 Namespace {namespace} deflated");
    } else {
        eprintln!("📌 Namespace {namespace} left in place (remove with: wgns down {namespace})");
    }

    match report.exit_code {
        Some(0) => Ok(()),
        Some(code) => anyhow::bail!("Command exited with code {code}"),
        None => anyhow::bail!("Command was killed by a signal"),
    }
}
