//! Error types for wgns

use std::path::PathBuf;

use thiserror::Error;

use crate::{InterfaceName, NamespaceName};

/// wgns error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tunnel configuration could not be read, or a generated file could not be written
    #[error("Config error: {}: {source}", .path.display())]
    Config {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// External command exited unsuccessfully
    #[error("Command failed ({}): {command}{}", status_text(.exit_code), stderr_suffix(.stderr))]
    Command {
        /// Textual form of the command that failed
        command: String,
        /// Exit code, `None` when terminated by a signal
        exit_code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// External command could not be started
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        /// Textual form of the command
        command: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Safety check rejected the request before anything ran
    #[error("Precheck failed: {message}")]
    Precheck {
        /// Error message
        message: String,
    },

    /// Inflation aborted after the namespace name was allocated
    #[error("Inflating namespace {namespace} (interface {interface}) failed: {source}")]
    Inflate {
        /// Namespace that may be partially built
        namespace: NamespaceName,
        /// Interface allocated for the namespace
        interface: InterfaceName,
        /// Failing step
        #[source]
        source: Box<Error>,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Channel send error
    #[error("Channel send error")]
    ChannelSend,

    /// Task join error
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Build a precheck error
    pub fn precheck(message: impl Into<String>) -> Self {
        Self::Precheck {
            message: message.into(),
        }
    }

    /// Namespace left behind by a failed inflation, if any
    ///
    /// No rollback is attempted, so this is the handle for manual cleanup.
    #[must_use]
    pub const fn partial_namespace(&self) -> Option<&NamespaceName> {
        match self {
            Self::Inflate { namespace, .. } => Some(namespace),
            _ => None,
        }
    }

    /// Whether a safety check fired before any command ran
    #[must_use]
    pub const fn is_precheck(&self) -> bool {
        matches!(self, Self::Precheck { .. })
    }
}

#[allow(clippy::ref_option)]
fn status_text(code: &Option<i32>) -> String {
    code.map_or_else(
        || "killed by signal".to_string(),
        |code| format!("exit code {code}"),
    )
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelSend
    }
}

/// Result type alias for wgns operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = Error::Command {
            command: "ip netns add wgns-1".to_string(),
            exit_code: Some(2),
            stderr: "Cannot create namespace file\n".to_string(),
        };

        let text = err.to_string();
        assert!(text.contains("exit code 2"));
        assert!(text.contains("ip netns add wgns-1"));
        assert!(text.ends_with("Cannot create namespace file"));
    }

    #[test]
    fn test_command_error_signal() {
        let err = Error::Command {
            command: "wg setconf wg-1 /tmp/x".to_string(),
            exit_code: None,
            stderr: String::new(),
        };

        assert_eq!(
            err.to_string(),
            "Command failed (killed by signal): wg setconf wg-1 /tmp/x"
        );
    }

    #[test]
    fn test_partial_namespace() {
        let namespace = NamespaceName::new("wgns-abc").unwrap();
        let err = Error::Inflate {
            namespace: namespace.clone(),
            interface: InterfaceName::new("wg-abc").unwrap(),
            source: Box::new(Error::precheck("boom")),
        };

        assert_eq!(err.partial_namespace(), Some(&namespace));
        assert!(Error::precheck("x").partial_namespace().is_none());
        assert!(Error::precheck("x").is_precheck());
    }
}
