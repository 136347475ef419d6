//! Namespace deflation

use std::sync::Arc;
use wgns_core::{NamespaceName, Result};

use crate::runner::{CommandRunner, CommandSpec, ExecContext};

/// Tears down a namespace created by [`Inflator`](crate::Inflator)
#[derive(Clone)]
pub struct Deflator {
    runner: Arc<dyn CommandRunner>,
}

impl Deflator {
    /// Create a deflator on top of `runner`
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Delete the namespace and its resolver directory
    ///
    /// The kernel removes the tunnel interface along with the namespace.
    /// Removing an absent resolver directory is not an error, but deleting
    /// an already deleted namespace is.
    ///
    /// # Errors
    /// Returns a precheck error, before running anything, if `name` is not a
    /// valid namespace name (e.g. contains `/` or `.`); a command error if
    /// either removal fails
    pub async fn deflate(&self, name: &str) -> Result<()> {
        let name = NamespaceName::new(name).inspect_err(|e| {
            tracing::error!(namespace = name, error = %e, "Refusing to deflate");
        })?;

        let settings = self.runner.settings();
        let host = ExecContext::privileged();
        let resolver_dir = settings.resolver_dir(&name);

        tracing::info!(namespace = %name, "Deflating namespace");

        self.runner
            .run(
                &host,
                &CommandSpec::new(&settings.ip_program).args(["netns", "delete", name.as_str()]),
            )
            .await?;

        self.runner
            .run(
                &host,
                &CommandSpec::new(&settings.rm_program)
                    .args(["-rf", "--"])
                    .arg(resolver_dir.to_string_lossy()),
            )
            .await?;

        tracing::info!(namespace = %name, "Namespace deflated");

        Ok(())
    }
}
