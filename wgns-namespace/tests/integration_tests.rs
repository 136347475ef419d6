use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use wgns_core::{Error, NamespaceName};
use wgns_namespace::*;

const PRIVATE_KEY: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
const PEER_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn tunnel_config(extra: &str) -> NamedTempFile {
    write_config(&format!(
        "[Interface]\n\
         PrivateKey = {PRIVATE_KEY}\n\
         {extra}\n\
         \n\
         [Peer]\n\
         PublicKey = {PEER_KEY}\n\
         AllowedIPs = 0.0.0.0/0, ::/0\n"
    ))
}

#[test]
fn test_concrete_translation_scenario() {
    let config = tunnel_config("Address = 10.0.0.2/24, fd00::2/64\nDNS = 10.0.0.1, example.com");

    let translated = translate(config.path(), None).unwrap();

    assert_eq!(translated.addresses, ["10.0.0.2/24", "fd00::2/64"]);
    let resolver = translated.resolver.unwrap();
    assert_eq!(resolver.spec.nameservers, ["10.0.0.1"]);
    assert_eq!(resolver.spec.search, ["example.com"]);
    assert_eq!(
        std::fs::read_to_string(resolver.file.path()).unwrap(),
        "search example.com\nnameserver 10.0.0.1\n"
    );
}

#[test]
fn test_reduced_config_keeps_supported_directives_in_order() {
    let config = write_config(
        "# exported from provider\n\
         [Interface]\n\
         PrivateKey = abc\n\
         Address = 10.0.0.2/32\n\
         ListenPort = 51820\n\
         MTU = 1400\n\
         PostUp = iptables -A FORWARD\n\
         # peer follows\n\
         [Peer]\n\
         PublicKey = def\n\
         Endpoint = 192.0.2.1:51820\n",
    );

    let translated = translate(config.path(), None).unwrap();
    let reduced = std::fs::read_to_string(translated.reduced.path()).unwrap();

    assert_eq!(
        reduced,
        "[Interface]\nPrivateKey = abc\nListenPort = 51820\n[Peer]\nPublicKey = def\nEndpoint = 192.0.2.1:51820\n"
    );
    assert!(translated.resolver.is_none());
}

#[test]
fn test_every_unsupported_directive_is_dropped() {
    let lines: String = UNSUPPORTED_DIRECTIVES
        .iter()
        .map(|key| format!("{key} = x\n"))
        .collect();

    let parsed = parse(&format!("[Interface]\n{lines}PrivateKey = k\n"));

    assert_eq!(parsed.reduced, "[Interface]\nPrivateKey = k\n");
}

#[test]
fn test_dns_keeps_declaration_order_across_lines() {
    let parsed = parse("DNS = 10.0.0.1, corp.example\nDNS = 10.0.0.2, lab.example\n");
    let resolver = parsed.resolver.unwrap();

    assert_eq!(resolver.nameservers, ["10.0.0.1", "10.0.0.2"]);
    assert_eq!(resolver.search, ["corp.example", "lab.example"]);
}

/// Stand-in for `ip` that keeps a namespace list next to itself
const FAKE_IP: &str = r#"#!/bin/sh
state="$(dirname "$0")/netns.list"
touch "$state"
case "$1 $2" in
  "netns add") echo "$3" >> "$state" ;;
  "netns delete")
    grep -qx "$3" "$state" || exit 1
    grep -vx "$3" "$state" > "$state.new"
    mv "$state.new" "$state" ;;
  "netns list") cat "$state" ;;
esac
"#;

fn fake_ip(dir: &Path) -> PathBuf {
    let source = dir.join("ip.sh");
    std::fs::write(&source, FAKE_IP).unwrap();

    // installed by a child process so no writable handle to it stays open here
    let ip = dir.join("ip");
    let status = std::process::Command::new("install")
        .args(["-m", "755"])
        .arg(&source)
        .arg(&ip)
        .status()
        .unwrap();
    assert!(status.success());
    ip
}

#[tokio::test]
async fn test_round_trip_inflate_deflate() {
    let root = tempfile::tempdir().unwrap();
    let settings = Settings::default()
        .without_elevation()
        .with_ip_program(fake_ip(root.path()).to_string_lossy().into_owned())
        .with_wg_program("true")
        .with_netns_config_dir(root.path().join("netns"))
        .with_temp_dir(root.path());
    let manager = NamespaceManager::system(settings);
    let config = tunnel_config("Address = 10.0.0.2/24\nDNS = 10.0.0.1, example.com");

    let namespace = manager
        .inflate(config.path(), &InflateOptions::new())
        .await
        .unwrap();
    let resolver_dir = manager.settings().resolver_dir(&namespace.name);

    assert_eq!(
        std::fs::read_to_string(resolver_dir.join("resolv.conf")).unwrap(),
        "search example.com\nnameserver 10.0.0.1\n"
    );
    assert_eq!(manager.list(false).await.unwrap(), [namespace.name.clone()]);

    manager.deflate(namespace.name.as_str()).await.unwrap();

    assert!(!resolver_dir.exists());
    assert!(manager.list(false).await.unwrap().is_empty());

    // the namespace is gone, so a second deletion fails
    let again = manager.deflate(namespace.name.as_str()).await;
    assert!(matches!(again, Err(Error::Command { .. })));
}

#[tokio::test]
async fn test_deflate_is_safe_against_traversal() {
    let runner = MockRunner::new();
    let manager = NamespaceManager::new(Arc::new(runner.clone()));

    for name in ["../../etc", "wgns-a/..", ".", "a/b", "wgns.old"] {
        let err = manager.deflate(name).await.unwrap_err();
        assert!(err.is_precheck(), "{name}: {err}");
    }

    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_inflated_addresses_keep_order_and_duplicates() {
    let runner = MockRunner::new();
    let manager = NamespaceManager::new(Arc::new(runner.clone()));
    let config = tunnel_config("Address = 10.0.0.3/32\nAddress = 10.0.0.2/32, 10.0.0.3/32");

    let namespace = manager
        .inflate(config.path(), &InflateOptions::new())
        .await
        .unwrap();

    let assigned: Vec<String> = runner
        .invocations()
        .iter()
        .filter(|i| i.text().starts_with("ip address add"))
        .map(|i| i.command.get_args()[2].clone())
        .collect();
    assert_eq!(assigned, ["10.0.0.3/32", "10.0.0.2/32", "10.0.0.3/32"]);
    assert_eq!(namespace.addresses, assigned);
}

#[tokio::test]
async fn test_repeated_rapid_exits_deflate_once_each() {
    let runner = MockRunner::new();
    let manager = NamespaceManager::new(Arc::new(runner.clone()));
    let namespace = NamespaceName::new("wgns-rapid").unwrap();

    let processes: Vec<_> = (0..8)
        .map(|_| {
            manager
                .launch(
                    &namespace,
                    "exit 0",
                    LaunchOptions::new().with_user("nobody").with_auto_deflate(true),
                )
                .unwrap()
        })
        .collect();

    let mut deflated = 0;
    for process in processes {
        let binding = Arc::clone(process.binding());
        if process.wait().await.unwrap().deflated {
            deflated += 1;
        }
        assert!(binding.is_terminated());
    }

    // one binding per child, one deletion per binding
    assert_eq!(deflated, 8);
    assert_eq!(runner.count_matching("ip netns delete wgns-rapid"), 8);
}

#[tokio::test]
async fn test_partial_namespace_is_exposed() {
    let runner = MockRunner::new().fail_on("ip route add");
    let manager = NamespaceManager::new(Arc::new(runner.clone()));
    let config = tunnel_config("Address = 10.0.0.2/24");

    let err = manager
        .inflate(config.path(), &InflateOptions::new())
        .await
        .unwrap_err();

    let Error::Inflate { namespace, .. } = &err else {
        panic!("expected inflate error, got {err:?}");
    };
    assert_eq!(err.partial_namespace(), Some(namespace));
    assert!(err.to_string().contains(namespace.as_str()));
}

#[tokio::test]
#[ignore] // Requires root, iproute2 and the wireguard module
async fn test_real_round_trip() {
    let settings = Settings::detect();
    let manager = NamespaceManager::system(settings);
    let config = tunnel_config("Address = 10.200.0.2/32\nDNS = 10.200.0.1");

    let namespace = manager
        .inflate(config.path(), &InflateOptions::new())
        .await
        .unwrap();
    assert!(manager.list(false).await.unwrap().contains(&namespace.name));
    assert!(
        manager
            .settings()
            .resolver_dir(&namespace.name)
            .join("resolv.conf")
            .exists()
    );

    manager.deflate(namespace.name.as_str()).await.unwrap();
    assert!(!manager.list(false).await.unwrap().contains(&namespace.name));
    assert!(!manager.settings().resolver_dir(&namespace.name).exists());
}

#[tokio::test]
#[ignore] // Requires root, iproute2 and the wireguard module
async fn test_real_auto_deflate() {
    let manager = NamespaceManager::system(Settings::detect());
    let config = tunnel_config("Address = 10.200.0.3/32");

    let process = manager
        .run(
            config.path(),
            "ip -brief link",
            &InflateOptions::new(),
            LaunchOptions::new().with_auto_deflate(true),
        )
        .await
        .unwrap();
    let namespace = process.binding().namespace().clone();

    let report = process.wait().await.unwrap();
    assert_eq!(report.exit_code, Some(0));
    assert!(report.deflated);
    assert!(!manager.list(true).await.unwrap().contains(&namespace));
}
