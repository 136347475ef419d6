//! Runtime settings for privileged execution

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wgns_core::{Error, InterfaceName, NamespaceName, Result};

/// Wrapper that runs a command with elevated rights
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elevation {
    /// Program prefixed to every privileged command
    pub program: String,

    /// Extra arguments placed between the program and the command
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for Elevation {
    fn default() -> Self {
        Self {
            program: "sudo".to_string(),
            args: Vec::new(),
        }
    }
}

/// Program used to drop privileges to the target user
///
/// Invoked as `<program> -u <user> -- <command...>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSwitch {
    /// Program name
    pub program: String,
}

impl Default for UserSwitch {
    fn default() -> Self {
        Self {
            program: "sudo".to_string(),
        }
    }
}

/// Settings shared by every namespace operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Namespace-management tool
    pub ip_program: String,

    /// Tunnel-management tool
    pub wg_program: String,

    /// Shell used for compound invocations
    pub shell: String,

    /// Program used to remove resolver directories
    pub rm_program: String,

    /// Root of the namespace-scoped configuration directories
    pub netns_config_dir: PathBuf,

    /// Privileged-execution wrapper, `None` when already privileged
    pub elevation: Option<Elevation>,

    /// Privilege drop for supervised children
    pub user_switch: UserSwitch,

    /// Where generated files are written (system temp dir if unset)
    pub temp_dir: Option<PathBuf>,

    /// Prefix for generated namespace names
    pub name_prefix: String,

    /// Prefix for generated interface names
    pub interface_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ip_program: "ip".to_string(),
            wg_program: "wg".to_string(),
            shell: "/bin/sh".to_string(),
            rm_program: "rm".to_string(),
            netns_config_dir: PathBuf::from("/etc/netns"),
            elevation: Some(Elevation::default()),
            user_switch: UserSwitch::default(),
            temp_dir: None,
            name_prefix: NamespaceName::DEFAULT_PREFIX.to_string(),
            interface_prefix: InterfaceName::DEFAULT_PREFIX.to_string(),
        }
    }
}

impl Settings {
    /// Create default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default settings, without elevation when the effective user is root
    #[must_use]
    pub fn detect() -> Self {
        let settings = Self::default();
        if nix::unistd::geteuid().is_root() {
            tracing::debug!("Running as root, privileged commands will not be wrapped");
            settings.without_elevation()
        } else {
            settings
        }
    }

    /// Load settings from a JSON file; missing fields keep their defaults
    ///
    /// # Errors
    /// Returns a config error if the file cannot be read or parsed
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Set the privileged-execution wrapper
    #[must_use]
    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = Some(elevation);
        self
    }

    /// Run privileged commands directly
    #[must_use]
    pub fn without_elevation(mut self) -> Self {
        self.elevation = None;
        self
    }

    /// Set the namespace-management tool
    #[must_use]
    pub fn with_ip_program(mut self, program: impl Into<String>) -> Self {
        self.ip_program = program.into();
        self
    }

    /// Set the tunnel-management tool
    #[must_use]
    pub fn with_wg_program(mut self, program: impl Into<String>) -> Self {
        self.wg_program = program.into();
        self
    }

    /// Set the root of the namespace-scoped configuration directories
    #[must_use]
    pub fn with_netns_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.netns_config_dir = dir.into();
        self
    }

    /// Set where generated files are written
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set the prefix for generated namespace names
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the prefix for generated interface names
    #[must_use]
    pub fn with_interface_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.interface_prefix = prefix.into();
        self
    }

    /// Namespace-scoped configuration directory, e.g. `/etc/netns/<name>`
    #[must_use]
    pub fn resolver_dir(&self, namespace: &NamespaceName) -> PathBuf {
        self.netns_config_dir.join(namespace.as_str())
    }
}

/// User a supervised child runs as when none is given
///
/// Under sudo this is the user who invoked sudo, not root.
pub fn invoking_user() -> Result<String> {
    if let Ok(user) = std::env::var("SUDO_USER")
        && !user.is_empty()
    {
        return Ok(user);
    }

    let uid = nix::unistd::getuid();
    Ok(nix::unistd::User::from_uid(uid)?.map_or_else(|| format!("#{uid}"), |user| user.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.ip_program, "ip");
        assert_eq!(settings.wg_program, "wg");
        assert_eq!(settings.netns_config_dir, PathBuf::from("/etc/netns"));
        assert_eq!(settings.elevation, Some(Elevation::default()));
    }

    #[test]
    fn test_builder_pattern() {
        let settings = Settings::new()
            .without_elevation()
            .with_netns_config_dir("/tmp/netns")
            .with_name_prefix("test-");

        assert!(settings.elevation.is_none());
        assert_eq!(settings.name_prefix, "test-");

        let name = NamespaceName::new("test-1").unwrap();
        assert_eq!(
            settings.resolver_dir(&name),
            PathBuf::from("/tmp/netns/test-1")
        );
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"elevation": {{"program": "doas"}}, "netns_config_dir": "/run/netns-conf"}}"#
        )
        .unwrap();

        let settings = Settings::from_json_file(file.path()).unwrap();
        assert_eq!(settings.elevation.unwrap().program, "doas");
        assert_eq!(settings.netns_config_dir, PathBuf::from("/run/netns-conf"));
        assert_eq!(settings.ip_program, "ip");
    }

    #[test]
    fn test_from_json_file_errors() {
        let missing = Settings::from_json_file("/nonexistent/wgns.json");
        assert!(matches!(missing, Err(Error::Config { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Settings::from_json_file(file.path()),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_invoking_user_is_not_empty() {
        let user = invoking_user().unwrap();
        assert!(!user.is_empty());
    }
}
