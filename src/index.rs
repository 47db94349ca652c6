//! Package index records and the `Packages` file parser.

use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use log::warn;

use crate::compress::{Compression, PACKAGES_PREFERENCE};
use crate::parser::parse_stanzas;
use crate::release::RepoFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "required" => Priority::Required,
            "important" => Priority::Important,
            "standard" => Priority::Standard,
            "optional" => Priority::Optional,
            "extra" => Priority::Extra,
            other => return Err(anyhow!("unrecognized priority: {}", other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiArch {
    Same,
    Foreign,
    Allowed,
    None,
}

impl FromStr for MultiArch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "same" => MultiArch::Same,
            "foreign" => MultiArch::Foreign,
            "allowed" => MultiArch::Allowed,
            other => return Err(anyhow!("unrecognized Multi-Arch value: {}", other)),
        })
    }
}

impl Default for MultiArch {
    fn default() -> Self {
        MultiArch::None
    }
}

/// An immutable record parsed from a `Packages` index stanza.
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub name: String,
    pub filename: String,
    pub version: String,
    pub priority: Priority,
    pub sha256: String,
    pub depends: Vec<String>,
    pub pre_depends: Vec<String>,
    pub multi_arch: MultiArch,
    pub architecture: String,
}

/// Splits a `Depends`/`Pre-Depends` value on `,` and takes the first
/// whitespace-separated token of each clause — the first alternative of a
/// `a | b` disjunction is the one that's pulled in, per §4.5.
fn split_dependency_clause(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|clause| clause.split_whitespace().next())
        .map(|name| name.to_string())
        .collect()
}

fn field<'a>(stanza: &HashMap<&'a [u8], &'a [u8]>, key: &str) -> Option<&'a str> {
    stanza
        .get(key.as_bytes())
        .and_then(|v| std::str::from_utf8(v).ok())
}

fn parse_record(stanza: &HashMap<&[u8], &[u8]>) -> Result<PackageRecord> {
    let name = field(stanza, "Package").ok_or_else(|| anyhow!("stanza missing Package"))?;
    let filename = field(stanza, "Filename").ok_or_else(|| anyhow!("stanza missing Filename"))?;
    let version = field(stanza, "Version").ok_or_else(|| anyhow!("stanza missing Version"))?;
    let priority = field(stanza, "Priority").ok_or_else(|| anyhow!("stanza missing Priority"))?;
    let sha256 = field(stanza, "SHA256").ok_or_else(|| anyhow!("stanza missing SHA256"))?;
    let architecture =
        field(stanza, "Architecture").ok_or_else(|| anyhow!("stanza missing Architecture"))?;
    let depends = field(stanza, "Depends")
        .map(split_dependency_clause)
        .unwrap_or_default();
    let pre_depends = field(stanza, "Pre-Depends")
        .map(split_dependency_clause)
        .unwrap_or_default();
    let multi_arch = field(stanza, "Multi-Arch")
        .map(MultiArch::from_str)
        .transpose()?
        .unwrap_or_default();

    Ok(PackageRecord {
        name: name.to_string(),
        filename: filename.to_string(),
        version: version.to_string(),
        priority: Priority::from_str(priority)?,
        sha256: sha256.to_string(),
        depends,
        pre_depends,
        multi_arch,
        architecture: architecture.to_string(),
    })
}

/// Parses a whole `Packages` file body into a name-keyed map.
///
/// Malformed stanzas (missing a required field, unrecognized priority) are
/// logged and skipped rather than aborting the whole index — a single junk
/// record in an upstream mirror shouldn't take down the build, and the
/// stanza is useless to the resolver either way.
pub fn parse_index(body: &[u8]) -> Result<HashMap<String, PackageRecord>> {
    let (_, stanzas) =
        parse_stanzas(body).map_err(|e| anyhow!("malformed package index: {}", e))?;

    let mut out = HashMap::new();
    for stanza in &stanzas {
        match parse_record(stanza) {
            Ok(record) => {
                out.insert(record.name.clone(), record);
            }
            Err(err) => warn!("skipping unparseable index stanza: {}", err),
        }
    }

    Ok(out)
}

/// Fetches and parses one suite's package index for `architecture`, trying
/// the `Packages{.xz,.gz,""}` variants in that fixed preference order and
/// using the first one the suite's `Release` manifest actually lists.
pub async fn fetch_suite_index(
    repo: &mut RepoFetcher<'_>,
    architecture: &str,
) -> Result<HashMap<String, PackageRecord>> {
    for suffix in PACKAGES_PREFERENCE {
        let path = format!("main/binary-{}/Packages{}", architecture, suffix);
        if !repo.has(&path) {
            continue;
        }

        let bytes = repo.fetch(&path).await?;
        let mut decompressed = Vec::new();
        Compression::from_packages_suffix(suffix)?
            .wrap(&bytes[..])?
            .read_to_end(&mut decompressed)?;
        return parse_index(&decompressed);
    }

    Err(anyhow!(
        "no Packages index for architecture {} listed in Release",
        architecture
    ))
}

/// Merges a later suite's index into the running map; later suites win.
pub fn merge_index(
    into: &mut HashMap<String, PackageRecord>,
    from: HashMap<String, PackageRecord>,
) {
    into.extend(from);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"Package: apt\nFilename: pool/main/a/apt/apt_2.6.0_amd64.deb\nVersion: 2.6.0\nPriority: important\nSHA256: abc123\nDepends: libc6 (>= 2.15), gpgv | gpgv2\nArchitecture: amd64\n\n";

    #[test]
    fn parses_single_record() {
        let index = parse_index(SAMPLE).unwrap();
        let apt = &index["apt"];
        assert_eq!(apt.priority, Priority::Important);
        assert_eq!(apt.depends, vec!["libc6", "gpgv"]);
        assert_eq!(apt.multi_arch, MultiArch::None);
    }

    #[test]
    fn later_suite_overwrites_earlier() {
        let mut first = parse_index(SAMPLE).unwrap();
        let second = parse_index(b"Package: apt\nFilename: f\nVersion: 3.0\nPriority: required\nSHA256: def456\nArchitecture: amd64\n\n").unwrap();
        merge_index(&mut first, second);
        assert_eq!(first["apt"].version, "3.0");
        assert_eq!(first["apt"].priority, Priority::Required);
    }

    #[test]
    fn skips_malformed_stanza_without_failing_whole_index() {
        let body = b"Package: broken\n\nPackage: apt\nFilename: f\nVersion: 1\nPriority: required\nSHA256: x\nArchitecture: amd64\n\n";
        let index = parse_index(body).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains_key("apt"));
    }
}
