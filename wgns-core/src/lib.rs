//! wgns Core - Foundation types, events, and errors
//!
//! This crate provides the identifiers, lifecycle events and error taxonomy
//! shared by the namespace engine and the CLI.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::NamespaceEvent;
pub use types::{InterfaceName, NamespaceName};
