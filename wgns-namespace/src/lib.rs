//! WireGuard network namespace lifecycle
//!
//! This crate confines a child process to a single WireGuard tunnel:
//! - Config translation - wg-quick files reduced to what `wg setconf` accepts
//! - Inflation - namespace, interface, addresses, routes and resolver
//! - Deflation - namespace and resolver directory removal
//! - Supervision - child launch, output forwarding, auto-deflate on exit
//!
//! Every privileged step goes through a [`CommandRunner`], so the whole
//! sequence can be driven against [`MockRunner`] without root.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod deflate;
pub mod inflate;
pub mod manager;
pub mod runner;
pub mod supervisor;
pub mod translate;

pub use config::{Elevation, Settings, UserSwitch, invoking_user};
pub use deflate::Deflator;
pub use inflate::{InflateOptions, Inflator, Namespace};
pub use manager::{LaunchOptions, NamespaceManager};
pub use runner::{
    CommandRunner, CommandScope, CommandSpec, ExecContext, ExecutionResult, Invocation,
    MockRunner, SystemRunner, shell_quote,
};
pub use supervisor::{
    ExitReport, OutputLine, OutputSink, ProcessBinding, Stream, SupervisedProcess, Supervisor,
    Terminator,
};
pub use translate::{
    GeneratedResolver, ParsedConfig, ResolverSpec, TranslatedConfig, UNSUPPORTED_DIRECTIVES, parse,
    translate,
};
