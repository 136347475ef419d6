use anyhow::Result;
use std::path::{Path, PathBuf};
use wgns_namespace::Settings;

/// Execute health check command
pub fn execute(settings: &Settings) -> Result<()> {
    println!("\n🏥 wgns Health Check\n");
    println!("{:-<60}", "");

    // Check 1: Network namespaces
    check_namespace_support()?;

    // Check 2: WireGuard
    check_wireguard();

    // Check 3: Required binaries
    check_binaries(settings)?;

    // Check 4: Privileges
    check_privileges(settings)?;

    println!("{:-<60}", "");
    println!("\n✅ All systems operational!\n");

    Ok(())
}

/// Check if network namespaces are available
fn check_namespace_support() -> Result<()> {
    print!("Checking network namespace support... ");

    if !Path::new("/proc/self/ns/net").exists() {
        println!("❌ NOT SUPPORTED");
        anyhow::bail!(
            "Kernel doesn't support network namespaces\n\
             \n\
             Your kernel may be too old or compiled without CONFIG_NET_NS."
        );
    }

    println!("✅ OK");
    Ok(())
}

/// Check if the WireGuard module is loaded
///
/// Not fatal: `ip link add ... type wireguard` loads it on demand when it
/// is built as a module.
fn check_wireguard() {
    print!("Checking WireGuard... ");

    if Path::new("/sys/module/wireguard").exists() {
        println!("✅ OK (module loaded)");
    } else {
        println!("⚠️  NOT LOADED");
        println!("   The module is loaded on first use if available");
        println!("   To check: $ modinfo wireguard");
    }
}

/// Check that the configured programs can be found
fn check_binaries(settings: &Settings) -> Result<()> {
    print!("Checking required binaries... ");

    let mut required = vec![
        settings.ip_program.as_str(),
        settings.wg_program.as_str(),
        settings.shell.as_str(),
        settings.user_switch.program.as_str(),
    ];
    if let Some(elevation) = &settings.elevation {
        required.push(elevation.program.as_str());
    }

    let missing: Vec<&str> = required
        .into_iter()
        .filter(|program| find_program(program).is_none())
        .collect();

    if !missing.is_empty() {
        println!("❌ MISSING");
        println!("   Not found: {}", missing.join(", "));
        anyhow::bail!(
            "Required programs not found\n\
             \n\
             wgns needs iproute2 (ip), wireguard-tools (wg) and sudo."
        );
    }

    println!("✅ OK");
    Ok(())
}

/// Check that privileged commands can run
fn check_privileges(settings: &Settings) -> Result<()> {
    print!("Checking privileges... ");

    if nix::unistd::geteuid().is_root() {
        println!("✅ OK (root)");
        return Ok(());
    }

    match &settings.elevation {
        Some(elevation) => {
            println!("✅ OK (via {})", elevation.program);
            Ok(())
        }
        None => {
            println!("❌ NOT ROOT");
            anyhow::bail!(
                "Elevation is disabled and wgns is not running as root\n\
                 \n\
                 Drop --no-elevate, or try: sudo wgns ..."
            );
        }
    }
}

/// Resolve `program` the way the shell would
fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|path| path.is_file())
    })
}
