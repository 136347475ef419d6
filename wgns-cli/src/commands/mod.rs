use crate::cli::{Cli, Commands, script};
use anyhow::{Context, Result};
use std::path::Path;
use wgns_namespace::Settings;

pub mod down;
pub mod exec;
pub mod health;
pub mod list;
pub mod run;
pub mod up;

/// Dispatch command to appropriate handler
pub async fn dispatch(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.settings.as_deref(), cli.no_elevate)?;

    match cli.command {
        Commands::Run {
            config,
            tunnel,
            auto_deflate,
            user,
            command,
        } => {
            run::execute(
                settings,
                &config,
                &tunnel.options(),
                auto_deflate,
                user,
                &script(&command),
            )
            .await
        }

        Commands::Up { config, tunnel } => up::execute(settings, &config, &tunnel.options()).await,

        Commands::Down { namespace } => down::execute(settings, &namespace).await,

        Commands::Exec {
            namespace,
            auto_deflate,
            user,
            command,
        } => exec::execute(settings, &namespace, auto_deflate, user, &script(&command)).await,

        Commands::List { all } => list::execute(settings, all).await,

        Commands::Health => health::execute(&settings),
    }
}

fn load_settings(path: Option<&Path>, no_elevate: bool) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_json_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::detect(),
    };

    Ok(if no_elevate {
        settings.without_elevation()
    } else {
        settings
    })
}
