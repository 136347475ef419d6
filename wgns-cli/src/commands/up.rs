//! Up command implementation

use anyhow::{Context, Result};
use std::path::Path;
use wgns_namespace::{InflateOptions, NamespaceManager, Settings};

pub async fn execute(settings: Settings, config: &Path, options: &InflateOptions) -> Result<()> {
    let manager = NamespaceManager::system(settings);

    let namespace = manager
        .inflate(config, options)
        .await
        .with_context(|| format!("Failed to inflate {}", config.display()))?;

    eprintln!("✅ Namespace {} ready", namespace.name);
    eprintln!("   Interface: {}", namespace.interface);
    eprintln!("   Addresses: {}", namespace.addresses.join(", "));
    if let Some(resolver) = &namespace.resolver {
        eprintln!("   Nameservers: {}", resolver.nameservers.join(", "));
        if !resolver.search.is_empty() {
            eprintln!("   Search: {}", resolver.search.join(" "));
        }
    }

    // the bare name on stdout, for scripts
    println!("{}", namespace.name);

    Ok(())
}
