//! Namespace lifecycle orchestration
//!
//! [`NamespaceManager`] composes inflation, supervision and deflation. It
//! keeps no registry of live namespaces: the namespace name is the only
//! handle, and [`NamespaceManager::list`] recovers names from the system.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use wgns_core::{NamespaceEvent, NamespaceName, Result};

use crate::config::{Settings, invoking_user};
use crate::deflate::Deflator;
use crate::inflate::{InflateOptions, Inflator, Namespace};
use crate::runner::{CommandRunner, CommandSpec, ExecContext, SystemRunner};
use crate::supervisor::{OutputSink, ProcessBinding, SupervisedProcess, Supervisor, publish};

/// How a child is launched into a namespace
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// User the child runs as, the invoking user when unset
    pub user: Option<String>,
    /// Deflate the namespace when the child terminates
    pub auto_deflate: bool,
    /// Destination of child output
    pub sink: OutputSink,
}

impl LaunchOptions {
    /// Launch as the invoking user without auto-deflate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the child as `user`
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the auto-deflate policy
    #[must_use]
    pub const fn with_auto_deflate(mut self, enable: bool) -> Self {
        self.auto_deflate = enable;
        self
    }

    /// Send child output to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = sink;
        self
    }
}

/// Namespace manager
///
/// Entry point for the whole lifecycle: inflate a namespace from a tunnel
/// config, run a command inside it, tear it down.
#[derive(Clone)]
pub struct NamespaceManager {
    runner: Arc<dyn CommandRunner>,
    inflator: Inflator,
    deflator: Deflator,
    supervisor: Supervisor,
    events: Option<mpsc::Sender<NamespaceEvent>>,
}

impl NamespaceManager {
    /// Create a manager on top of `runner`
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            inflator: Inflator::new(Arc::clone(&runner)),
            deflator: Deflator::new(Arc::clone(&runner)),
            supervisor: Supervisor::new(Arc::clone(&runner)),
            runner,
            events: None,
        }
    }

    /// Create a manager that runs real commands
    #[must_use]
    pub fn system(settings: Settings) -> Self {
        Self::new(Arc::new(SystemRunner::new(settings)))
    }

    /// Add event channel for emitting lifecycle events
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::Sender<NamespaceEvent>) -> Self {
        self.supervisor = self.supervisor.with_events(tx.clone());
        self.events = Some(tx);
        self
    }

    /// Settings commands are built from
    #[must_use]
    pub fn settings(&self) -> &Settings {
        self.runner.settings()
    }

    /// Inflate a namespace for the tunnel in `config`
    pub async fn inflate(&self, config: &Path, options: &InflateOptions) -> Result<Namespace> {
        let result = self.inflator.inflate(config, options).await;

        match &result {
            Ok(namespace) => {
                publish(
                    self.events.as_ref(),
                    NamespaceEvent::Inflated {
                        namespace: namespace.name.clone(),
                        interface: namespace.interface.clone(),
                        addresses: namespace.addresses.clone(),
                        timestamp: SystemTime::now(),
                    },
                );
            }
            Err(e) => {
                if let Some(namespace) = e.partial_namespace() {
                    publish(
                        self.events.as_ref(),
                        NamespaceEvent::Error {
                            namespace: namespace.clone(),
                            message: e.to_string(),
                            timestamp: SystemTime::now(),
                        },
                    );
                }
            }
        }

        result
    }

    /// Deflate the namespace called `name`
    pub async fn deflate(&self, name: &str) -> Result<()> {
        self.deflator.deflate(name).await?;

        // deflate validated the name, so this cannot fail
        if let Ok(namespace) = NamespaceName::new(name) {
            publish(
                self.events.as_ref(),
                NamespaceEvent::Deflated {
                    namespace,
                    timestamp: SystemTime::now(),
                },
            );
        }

        Ok(())
    }

    /// Launch `command` inside an existing namespace
    pub fn launch(
        &self,
        namespace: &NamespaceName,
        command: &str,
        options: LaunchOptions,
    ) -> Result<SupervisedProcess> {
        let user = match options.user {
            Some(user) => user,
            None => invoking_user()?,
        };
        let binding = Arc::new(ProcessBinding::new(
            namespace.clone(),
            options.auto_deflate,
            options.sink,
        ));

        self.supervisor.launch(binding, command, &user)
    }

    /// Inflate a namespace for `config` and launch `command` inside it
    ///
    /// Returns once the child is started. With auto-deflate set, the
    /// namespace goes away when the child terminates; otherwise it stays
    /// until deflated explicitly.
    ///
    /// # Errors
    /// Returns the inflation error, or the launch error. A failed launch
    /// leaves the inflated namespace in place.
    pub async fn run(
        &self,
        config: &Path,
        command: &str,
        inflate: &InflateOptions,
        launch: LaunchOptions,
    ) -> Result<SupervisedProcess> {
        let namespace = self.inflate(config, inflate).await?;

        self.launch(&namespace.name, command, launch)
            .inspect_err(|e| {
                tracing::error!(
                    namespace = %namespace.name,
                    error = %e,
                    "Launch failed; namespace left in place"
                );
            })
    }

    /// Namespaces currently known to the system
    ///
    /// Only names carrying the configured prefix are returned unless `all`
    /// is set. Names that are not valid namespace names are skipped.
    pub async fn list(&self, all: bool) -> Result<Vec<NamespaceName>> {
        let settings = self.settings();
        let output = self
            .runner
            .run(
                &ExecContext::host(),
                &CommandSpec::new(&settings.ip_program).args(["netns", "list"]),
            )
            .await?;

        let names = output
            .stdout_string()
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .filter(|name| all || name.starts_with(settings.name_prefix.as_str()))
            .filter_map(|name| NamespaceName::new(name).ok())
            .collect();

        Ok(names)
    }
}
