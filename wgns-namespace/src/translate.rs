//! wg-quick config translation
//!
//! `wg setconf` only understands the tunnel part of a wg-quick file. The
//! interface-management directives are either extracted (`Address`, `DNS`)
//! or dropped (see [`UNSUPPORTED_DIRECTIVES`]).

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use tempfile::NamedTempFile;
use wgns_core::{Error, Result};

/// wg-quick directives that have no meaning for `wg setconf` and are dropped
pub const UNSUPPORTED_DIRECTIVES: [&str; 7] = [
    "MTU",
    "Table",
    "PreUp",
    "PostUp",
    "PreDown",
    "PostDown",
    "SaveConfig",
];

/// Resolver configuration derived from `DNS` directives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSpec {
    /// Search domains, in declaration order
    pub search: Vec<String>,
    /// Nameserver addresses, in declaration order
    pub nameservers: Vec<String>,
}

impl ResolverSpec {
    /// Build from raw `DNS` entries, `None` if there are none
    #[must_use]
    pub fn from_entries<I, S>(entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut spec = Self::default();
        for entry in entries {
            spec.push_entry(entry.as_ref());
        }
        (!spec.is_empty()).then_some(spec)
    }

    /// Classify one entry as nameserver or search domain
    pub fn push_entry(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }

        if is_nameserver(entry) {
            self.nameservers.push(entry.to_string());
        } else {
            self.search.push(entry.to_string());
        }
    }

    /// Check if no entries were collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.nameservers.is_empty()
    }

    /// Contents of the `resolv.conf` file
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::new();

        if !self.search.is_empty() {
            text.push_str("search ");
            text.push_str(&self.search.join(" "));
            text.push('\n');
        }

        for nameserver in &self.nameservers {
            text.push_str("nameserver ");
            text.push_str(nameserver);
            text.push('\n');
        }

        text
    }

    /// Write the rendered file to a fresh temporary file
    pub fn materialize(&self, temp_dir: Option<&Path>) -> Result<NamedTempFile> {
        write_temp("wgns-resolv-", &self.render(), temp_dir)
    }
}

/// A nameserver is an IP address; anything with letters that isn't one is a domain
fn is_nameserver(entry: &str) -> bool {
    entry.parse::<IpAddr>().is_ok() || !entry.chars().any(char::is_alphabetic)
}

/// Generated resolver file and the entries it was rendered from
#[derive(Debug)]
pub struct GeneratedResolver {
    /// Parsed entries
    pub spec: ResolverSpec,
    /// Temporary `resolv.conf`
    pub file: NamedTempFile,
}

/// Output of [`translate`]
#[derive(Debug)]
pub struct TranslatedConfig {
    /// Temporary file holding only what `wg setconf` accepts
    pub reduced: NamedTempFile,
    /// Interface addresses, in declaration order
    pub addresses: Vec<String>,
    /// Resolver file, when the config declares DNS entries
    pub resolver: Option<GeneratedResolver>,
}

/// In-memory result of splitting a wg-quick file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedConfig {
    /// Lines forwarded to `wg setconf`, newline terminated
    pub reduced: String,
    /// Interface addresses, in declaration order
    pub addresses: Vec<String>,
    /// Resolver entries, if any `DNS` directive contributed one
    pub resolver: Option<ResolverSpec>,
}

/// Split `Key = Value`, trimming both sides
fn directive(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim(), value.trim()))
}

/// Comma-separated values, ignoring a trailing comment
fn split_values(value: &str) -> impl Iterator<Item = &str> {
    value
        .split('#')
        .next()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Split wg-quick text into the reduced config, addresses and resolver
#[must_use]
pub fn parse(text: &str) -> ParsedConfig {
    let mut parsed = ParsedConfig::default();
    let mut resolver = ResolverSpec::default();

    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }

        match directive(line) {
            Some(("Address", value)) => {
                parsed.addresses.extend(split_values(value).map(String::from));
            }
            Some(("DNS", value)) => {
                for entry in split_values(value) {
                    resolver.push_entry(entry);
                }
            }
            Some((key, _)) if UNSUPPORTED_DIRECTIVES.contains(&key) => {
                tracing::debug!(directive = key, "Dropping unsupported directive");
            }
            _ => {
                parsed.reduced.push_str(line);
                parsed.reduced.push('\n');
            }
        }
    }

    parsed.resolver = (!resolver.is_empty()).then_some(resolver);
    parsed
}

/// Translate the wg-quick file at `path`
///
/// Generated files land in `temp_dir`, or the system temp dir if `None`.
///
/// # Errors
/// Returns a config error if `path` cannot be read or a generated file
/// cannot be written
pub fn translate(path: &Path, temp_dir: Option<&Path>) -> Result<TranslatedConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        tracing::error!(path = %path.display(), error = %source, "Failed to read tunnel config");
        Error::Config {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let parsed = parse(&text);
    tracing::debug!(
        path = %path.display(),
        addresses = ?parsed.addresses,
        dns = parsed.resolver.is_some(),
        "Translated tunnel config"
    );

    let reduced = write_temp("wgns-", &parsed.reduced, temp_dir)?;
    let resolver = parsed
        .resolver
        .map(|spec| {
            let file = spec.materialize(temp_dir)?;
            Ok::<_, Error>(GeneratedResolver { spec, file })
        })
        .transpose()?;

    Ok(TranslatedConfig {
        reduced,
        addresses: parsed.addresses,
        resolver,
    })
}

fn write_temp(prefix: &str, contents: &str, temp_dir: Option<&Path>) -> Result<NamedTempFile> {
    let dir = temp_dir.map_or_else(std::env::temp_dir, Path::to_path_buf);
    let config_error = |source: std::io::Error| Error::Config {
        path: dir.clone(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".conf")
        .tempfile_in(&dir)
        .map_err(config_error)?;
    file.write_all(contents.as_bytes()).map_err(config_error)?;
    file.flush().map_err(config_error)?;

    Ok(file)
}
