//! Namespace inflation
//!
//! Builds a namespace around one WireGuard interface. Each step is a
//! separate privileged command and must succeed before the next one runs.
//! Nothing is rolled back on failure; the error carries the namespace name
//! so it can be deflated by hand.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use wgns_core::{Error, InterfaceName, NamespaceName, Result};

use crate::runner::{CommandRunner, CommandSpec, ExecContext, ExecutionResult, shell_quote};
use crate::translate::{GeneratedResolver, ResolverSpec, translate};

/// Caller overrides for values normally taken from the tunnel config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InflateOptions {
    /// Replace the config's `Address` entries
    pub addresses: Option<Vec<String>>,
    /// Replace the config's `DNS` entries
    pub dns: Option<Vec<String>>,
}

impl InflateOptions {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign these addresses instead of the config's
    #[must_use]
    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = Some(addresses.into_iter().map(Into::into).collect());
        self
    }

    /// Use these DNS entries instead of the config's
    #[must_use]
    pub fn with_dns<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dns = Some(entries.into_iter().map(Into::into).collect());
        self
    }
}

/// A live namespace produced by [`Inflator::inflate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name, the durable handle
    pub name: NamespaceName,
    /// Tunnel interface inside the namespace
    pub interface: InterfaceName,
    /// Addresses assigned to the interface, in order
    pub addresses: Vec<String>,
    /// Resolver installed for the namespace
    pub resolver: Option<ResolverSpec>,
}

/// Drives the privileged command sequence that creates a namespace
#[derive(Clone)]
pub struct Inflator {
    runner: Arc<dyn CommandRunner>,
}

impl Inflator {
    /// Create an inflator on top of `runner`
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Create a namespace for the tunnel described by `config`
    ///
    /// # Errors
    /// Returns a config error if `config` cannot be translated. Once names
    /// are allocated, any failure is wrapped in [`Error::Inflate`] naming the
    /// partially-built namespace.
    pub async fn inflate(&self, config: &Path, options: &InflateOptions) -> Result<Namespace> {
        let settings = self.runner.settings();
        let temp_dir = settings.temp_dir.as_deref();

        let translated = translate(config, temp_dir)?;
        let addresses = options
            .addresses
            .clone()
            .unwrap_or(translated.addresses);
        let resolver = match &options.dns {
            Some(entries) => ResolverSpec::from_entries(entries)
                .map(|spec| {
                    let file = spec.materialize(temp_dir)?;
                    Ok::<_, Error>(GeneratedResolver { spec, file })
                })
                .transpose()?,
            None => translated.resolver,
        };

        let name = NamespaceName::generate(&settings.name_prefix)?;
        let interface = InterfaceName::generate(&settings.interface_prefix)?;

        tracing::info!(
            namespace = %name,
            interface = %interface,
            config = %config.display(),
            "Inflating namespace"
        );

        let resolver_spec = resolver.as_ref().map(|r| r.spec.clone());
        self.build(&name, &interface, &addresses, translated.reduced, resolver)
            .await
            .map_err(|source| {
                tracing::error!(
                    namespace = %name,
                    error = %source,
                    "Inflation aborted; namespace left in place for manual deflation"
                );
                Error::Inflate {
                    namespace: name.clone(),
                    interface: interface.clone(),
                    source: Box::new(source),
                }
            })?;

        tracing::info!(namespace = %name, interface = %interface, "Namespace inflated");

        Ok(Namespace {
            name,
            interface,
            addresses,
            resolver: resolver_spec,
        })
    }

    async fn build(
        &self,
        name: &NamespaceName,
        interface: &InterfaceName,
        addresses: &[String],
        reduced: NamedTempFile,
        resolver: Option<GeneratedResolver>,
    ) -> Result<()> {
        let settings = self.runner.settings();
        let ip = settings.ip_program.as_str();
        let host = ExecContext::privileged();
        let inside = ExecContext::privileged().in_namespace(name.clone());

        self.step(
            "create namespace",
            &host,
            CommandSpec::new(ip).args(["netns", "add", name.as_str()]),
        )
        .await?;

        self.step(
            "create interface",
            &host,
            CommandSpec::new(ip).args(["link", "add", "dev", interface.as_str(), "type", "wireguard"]),
        )
        .await?;

        self.step(
            "move interface",
            &host,
            CommandSpec::new(ip).args(["link", "set", interface.as_str(), "netns", name.as_str()]),
        )
        .await?;

        for address in addresses {
            self.step(
                "assign address",
                &inside,
                CommandSpec::new(ip).args(["address", "add", address.as_str(), "dev", interface.as_str()]),
            )
            .await?;
        }

        let reduced_path = reduced.path().to_string_lossy().into_owned();
        self.step(
            "apply configuration",
            &inside,
            CommandSpec::new(&settings.wg_program).args(["setconf", interface.as_str(), reduced_path.as_str()]),
        )
        .await?;

        // setconf has read it
        reduced.close().map_err(|source| Error::Config {
            path: reduced_path.into(),
            source,
        })?;

        self.step(
            "bring interface up",
            &inside,
            CommandSpec::new(ip).args(["link", "set", interface.as_str(), "up"]),
        )
        .await?;

        self.step(
            "install default route",
            &inside,
            CommandSpec::new(ip).args(["route", "add", "default", "dev", interface.as_str()]),
        )
        .await?;

        if addresses.iter().any(|address| is_ipv6(address)) {
            self.step(
                "install ipv6 default route",
                &inside,
                CommandSpec::new(ip).args(["-6", "route", "add", "default", "dev", interface.as_str()]),
            )
            .await?;
        }

        if let Some(resolver) = resolver {
            let dir = settings.resolver_dir(name);
            let dir = dir.to_string_lossy();
            let target = format!("{dir}/resolv.conf");
            let source = resolver.file.path().to_string_lossy();

            let script = format!(
                "mkdir -p {dir} && mv {source} {target} && chmod 644 {target}",
                dir = shell_quote(&dir),
                source = shell_quote(&source),
                target = shell_quote(&target),
            );
            self.step(
                "install resolver",
                &host,
                CommandSpec::shell(&settings.shell, script),
            )
            .await?;
        }

        Ok(())
    }

    async fn step(
        &self,
        step: &'static str,
        context: &ExecContext,
        command: CommandSpec,
    ) -> Result<ExecutionResult> {
        tracing::debug!(step, command = %command, "Inflation step");
        self.runner.run(context, &command).await
    }
}

/// Whether an `addr[/prefix]` string is IPv6
fn is_ipv6(address: &str) -> bool {
    let host = address.split('/').next().unwrap_or(address);
    matches!(host.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::runner::MockRunner;

    const CONFIG: &str = "\
[Interface]
PrivateKey = aGVsbG8gd29ybGQgaGVsbG8gd29ybGQgaGVsbG8gd28=
Address = 10.0.0.2/24
DNS = 10.0.0.1, example.com
MTU = 1420

[Peer]
PublicKey = d29ybGQgaGVsbG8gd29ybGQgaGVsbG8gd29ybGQgaGU=
AllowedIPs = 0.0.0.0/0
Endpoint = 198.51.100.7:51820
";

    fn setup(runner: MockRunner) -> (tempfile::TempDir, std::path::PathBuf, MockRunner) {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("wg0.conf");
        std::fs::write(&config, CONFIG).unwrap();
        let runner = runner.with_settings(Settings::default().with_temp_dir(dir.path()));
        (dir, config, runner)
    }

    #[tokio::test]
    async fn test_inflate_step_order() {
        let (_dir, config, runner) = setup(MockRunner::new());
        let inflator = Inflator::new(Arc::new(runner.clone()));

        let namespace = inflator
            .inflate(&config, &InflateOptions::new())
            .await
            .unwrap();
        let (ns, iface) = (namespace.name.as_str(), namespace.interface.as_str());

        let commands = runner.commands();
        assert_eq!(commands.len(), 8);
        assert_eq!(commands[0], format!("ip netns add {ns}"));
        assert_eq!(commands[1], format!("ip link add dev {iface} type wireguard"));
        assert_eq!(commands[2], format!("ip link set {iface} netns {ns}"));
        assert_eq!(commands[3], format!("ip address add 10.0.0.2/24 dev {iface}"));
        assert!(commands[4].starts_with(&format!("wg setconf {iface} ")));
        assert_eq!(commands[5], format!("ip link set {iface} up"));
        assert_eq!(commands[6], format!("ip route add default dev {iface}"));
        assert!(commands[7].starts_with("/bin/sh -c 'mkdir -p /etc/netns/"));
        assert!(commands[7].contains(&format!("/etc/netns/{ns}/resolv.conf")));

        let invocations = runner.invocations();
        assert!(invocations.iter().all(|i| i.context.elevate));
        assert!(invocations[..3].iter().all(|i| i.context.namespace.is_none()));
        assert!(
            invocations[3..7]
                .iter()
                .all(|i| i.context.namespace.as_ref() == Some(&namespace.name))
        );
    }

    #[tokio::test]
    async fn test_reduced_config_is_consumed_then_deleted() {
        let (_dir, config, runner) = setup(MockRunner::new());
        let inflator = Inflator::new(Arc::new(runner.clone()));

        inflator
            .inflate(&config, &InflateOptions::new())
            .await
            .unwrap();

        let setconf = runner
            .invocations()
            .into_iter()
            .find(|i| i.command.program() == "wg")
            .unwrap();
        let (path, contents) = &setconf.files[0];

        assert!(contents.starts_with("[Interface]\nPrivateKey"));
        assert!(!contents.contains("Address"));
        assert!(!contents.contains("DNS"));
        assert!(!contents.contains("MTU"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_overrides_replace_config_values() {
        let (_dir, config, runner) = setup(MockRunner::new());
        let inflator = Inflator::new(Arc::new(runner.clone()));

        let options = InflateOptions::new()
            .with_addresses(["10.9.0.2/32", "fd00:9::2/128"])
            .with_dns(["9.9.9.9"]);
        let namespace = inflator.inflate(&config, &options).await.unwrap();

        assert_eq!(namespace.addresses, ["10.9.0.2/32", "fd00:9::2/128"]);
        assert_eq!(
            namespace.resolver,
            Some(ResolverSpec {
                search: Vec::new(),
                nameservers: vec!["9.9.9.9".to_string()],
            })
        );

        let iface = namespace.interface.as_str();
        assert_eq!(runner.count_matching("ip address add"), 2);
        assert_eq!(
            runner.count_matching(&format!("ip -6 route add default dev {iface}")),
            1
        );

        let resolver = runner
            .invocations()
            .into_iter()
            .find(|i| i.command.program() == "/bin/sh")
            .unwrap();
        assert_eq!(resolver.files.len(), 0);
        assert!(resolver.command.get_args()[1].contains("wgns-resolv-"));
    }

    #[tokio::test]
    async fn test_no_dns_skips_resolver() {
        let (_dir, config, runner) = setup(MockRunner::new());
        let inflator = Inflator::new(Arc::new(runner.clone()));

        let options = InflateOptions::new().with_dns(Vec::<String>::new());
        let namespace = inflator.inflate(&config, &options).await.unwrap();

        assert!(namespace.resolver.is_none());
        assert_eq!(runner.count_matching("/bin/sh"), 0);
        assert_eq!(runner.call_count(), 7);
    }

    #[tokio::test]
    async fn test_failure_aborts_and_exposes_namespace() {
        let (_dir, config, runner) = setup(MockRunner::new().fail_on("wg setconf"));
        let inflator = Inflator::new(Arc::new(runner.clone()));

        let err = inflator
            .inflate(&config, &InflateOptions::new())
            .await
            .unwrap_err();

        let namespace = err.partial_namespace().unwrap().clone();
        assert_eq!(runner.commands()[0], format!("ip netns add {namespace}"));
        assert_eq!(runner.call_count(), 5);
        assert_eq!(runner.count_matching("ip netns delete"), 0);
        assert!(err.to_string().contains("wg setconf"));
    }

    #[tokio::test]
    async fn test_unreadable_config_runs_nothing() {
        let runner = MockRunner::new();
        let inflator = Inflator::new(Arc::new(runner.clone()));

        let err = inflator
            .inflate(Path::new("/nonexistent/wg0.conf"), &InflateOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config { .. }));
        assert!(err.partial_namespace().is_none());
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_is_ipv6() {
        assert!(is_ipv6("fd00::2/64"));
        assert!(is_ipv6("::1"));
        assert!(!is_ipv6("10.0.0.2/24"));
        assert!(!is_ipv6("garbage"));
    }
}
