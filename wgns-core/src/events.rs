//! Namespace lifecycle events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::{InterfaceName, NamespaceName};

/// Events emitted during a namespace lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NamespaceEvent {
    /// Namespace and tunnel are up
    Inflated {
        /// Namespace name
        namespace: NamespaceName,
        /// Tunnel interface inside the namespace
        interface: InterfaceName,
        /// Addresses assigned to the interface
        addresses: Vec<String>,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Supervised child started inside the namespace
    ChildStarted {
        /// Namespace name
        namespace: NamespaceName,
        /// OS process id of the launched wrapper
        pid: Option<u32>,
        /// User command
        command: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Supervised child terminated
    ChildExited {
        /// Namespace name
        namespace: NamespaceName,
        /// Exit code, `None` when killed by a signal
        exit_code: Option<i32>,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Namespace torn down
    Deflated {
        /// Namespace name
        namespace: NamespaceName,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },

    /// Error occurred
    Error {
        /// Namespace name
        namespace: NamespaceName,
        /// Error message
        message: String,
        /// Timestamp
        #[serde(with = "systemtime_serde")]
        timestamp: SystemTime,
    },
}

impl NamespaceEvent {
    /// Get the namespace from any event
    #[must_use]
    pub const fn namespace(&self) -> &NamespaceName {
        match self {
            Self::Inflated { namespace, .. }
            | Self::ChildStarted { namespace, .. }
            | Self::ChildExited { namespace, .. }
            | Self::Deflated { namespace, .. }
            | Self::Error { namespace, .. } => namespace,
        }
    }

    /// Get the timestamp from any event
    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        match self {
            Self::Inflated { timestamp, .. }
            | Self::ChildStarted { timestamp, .. }
            | Self::ChildExited { timestamp, .. }
            | Self::Deflated { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Check if this is a critical event
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Inflated {
                namespace,
                interface,
                addresses,
                ..
            } => {
                tracing::info!(
                    namespace = %namespace,
                    interface = %interface,
                    addresses = ?addresses,
                    event = "inflated",
                    "Namespace inflated"
                );
            }
            Self::ChildStarted {
                namespace,
                pid,
                command,
                ..
            } => {
                tracing::info!(
                    namespace = %namespace,
                    pid = ?pid,
                    command = %command,
                    event = "child_started",
                    "Child started"
                );
            }
            Self::ChildExited {
                namespace,
                exit_code,
                ..
            } => {
                tracing::info!(
                    namespace = %namespace,
                    exit_code = ?exit_code,
                    event = "child_exited",
                    "Child exited"
                );
            }
            Self::Deflated { namespace, .. } => {
                tracing::info!(
                    namespace = %namespace,
                    event = "deflated",
                    "Namespace deflated"
                );
            }
            Self::Error {
                namespace, message, ..
            } => {
                tracing::error!(
                    namespace = %namespace,
                    message = %message,
                    event = "error",
                    "Namespace error"
                );
            }
        }
    }
}

impl fmt::Display for NamespaceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inflated {
                namespace,
                interface,
                ..
            } => write!(f, "Namespace {namespace} inflated with interface {interface}"),
            Self::ChildStarted {
                namespace, command, ..
            } => write!(f, "Namespace {namespace} started `{command}`"),
            Self::ChildExited {
                namespace,
                exit_code: Some(code),
                ..
            } => write!(f, "Namespace {namespace} child exited with code {code}"),
            Self::ChildExited { namespace, .. } => {
                write!(f, "Namespace {namespace} child killed by signal")
            }
            Self::Deflated { namespace, .. } => write!(f, "Namespace {namespace} deflated"),
            Self::Error {
                namespace, message, ..
            } => write!(f, "Namespace {namespace} error: {message}"),
        }
    }
}

// Custom SystemTime serialization
mod systemtime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(since_epoch.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + std::time::Duration::from_secs(secs))
    }
}
