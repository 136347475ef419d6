//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use wgns_namespace::{InflateOptions, shell_quote};

#[derive(Parser)]
#[command(name = "wgns")]
#[command(
    about = "Run programs confined to a WireGuard tunnel in their own network namespace",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Load settings from a JSON file
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Run privileged commands directly instead of through sudo
    #[arg(long, global = true)]
    pub no_elevate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for values taken from the tunnel config
#[derive(Args, Debug, Clone, Default)]
pub struct TunnelArgs {
    /// Addresses to assign instead of the config's (comma-separated)
    #[arg(long = "address", value_name = "CIDR", value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// DNS entries to use instead of the config's (comma-separated)
    #[arg(long, value_name = "ENTRY", value_delimiter = ',')]
    pub dns: Vec<String>,
}

impl TunnelArgs {
    pub fn options(&self) -> InflateOptions {
        let mut options = InflateOptions::new();
        if !self.addresses.is_empty() {
            options = options.with_addresses(self.addresses.iter().cloned());
        }
        if !self.dns.is_empty() {
            options = options.with_dns(self.dns.iter().cloned());
        }
        options
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a namespace for a tunnel and run a command inside it
    Run {
        /// wg-quick style tunnel config
        config: PathBuf,

        #[command(flatten)]
        tunnel: TunnelArgs,

        /// Delete the namespace when the command exits
        #[arg(long)]
        auto_deflate: bool,

        /// User to run the command as (default: invoking user)
        #[arg(short, long)]
        user: Option<String>,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Create a namespace for a tunnel and print its name
    Up {
        /// wg-quick style tunnel config
        config: PathBuf,

        #[command(flatten)]
        tunnel: TunnelArgs,
    },

    /// Delete a namespace and its resolver directory
    Down {
        /// Namespace name
        namespace: String,
    },

    /// Run a command inside an existing namespace
    Exec {
        /// Namespace name
        namespace: String,

        /// Delete the namespace when the command exits
        #[arg(long)]
        auto_deflate: bool,

        /// User to run the command as (default: invoking user)
        #[arg(short, long)]
        user: Option<String>,

        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List namespaces
    List {
        /// Include namespaces not created by wgns
        #[arg(short, long)]
        all: bool,
    },

    /// Check system prerequisites
    Health,
}

/// Shell script for a command given on the command line
///
/// A single word is taken as a script so pipelines can be passed quoted;
/// several words are quoted individually.
pub fn script(command: &[String]) -> String {
    match command {
        [script] => script.clone(),
        words => words
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_single_word_is_verbatim() {
        let command = vec!["curl -s https://example.com | head".to_string()];
        assert_eq!(script(&command), "curl -s https://example.com | head");
    }

    #[test]
    fn test_script_words_are_quoted() {
        let command = vec!["echo".to_string(), "a b".to_string(), "it's".to_string()];
        assert_eq!(script(&command), r"echo 'a b' 'it'\''s'");
    }

    #[test]
    fn test_tunnel_overrides() {
        let cli = Cli::parse_from([
            "wgns",
            "up",
            "vpn.conf",
            "--address",
            "10.0.0.2/24,fd00::2/64",
            "--dns",
            "10.0.0.1",
        ]);

        let Commands::Up { config, tunnel } = cli.command else {
            panic!("expected up");
        };
        assert_eq!(config, PathBuf::from("vpn.conf"));

        let options = tunnel.options();
        assert_eq!(
            options.addresses,
            Some(vec!["10.0.0.2/24".to_string(), "fd00::2/64".to_string()])
        );
        assert_eq!(options.dns, Some(vec!["10.0.0.1".to_string()]));
    }

    #[test]
    fn test_no_overrides_by_default() {
        assert_eq!(TunnelArgs::default().options(), InflateOptions::new());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["wgns", "list", "--all", "--no-elevate", "-v"]);

        assert!(cli.no_elevate);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::List { all: true }));
    }
}
