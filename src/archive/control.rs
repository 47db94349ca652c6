//! `control.tar` handling: package identity and the synthesized dpkg info
//! files under `var/lib/dpkg/info/`, per §4.7.

use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tar::Archive;

use crate::index::MultiArch;
use crate::parser::single_package_map;

/// Package identity derived from `control.tar`'s `./control` stanza, and
/// the per-package dpkg info-file prefix derived from it.
pub struct ControlInfo {
    pub identity: String,
    pub info_prefix: String,
}

fn identify(control_text: &[u8]) -> Result<ControlInfo> {
    let (_, fields) = single_package_map(control_text)
        .map_err(|e| anyhow!("malformed control stanza: {}", e))?;

    let package = fields
        .get(&b"Package"[..])
        .ok_or_else(|| anyhow!("control stanza missing Package"))?;
    let package = std::str::from_utf8(package)?;
    let architecture = fields
        .get(&b"Architecture"[..])
        .ok_or_else(|| anyhow!("control stanza missing Architecture"))?;
    let architecture = std::str::from_utf8(architecture)?;
    let multi_arch = fields
        .get(&b"Multi-Arch"[..])
        .map(|v| std::str::from_utf8(v))
        .transpose()?
        .map(MultiArch::from_str)
        .transpose()?
        .unwrap_or_default();

    let identity = if multi_arch == MultiArch::Same {
        format!("{}:{}", package, architecture)
    } else {
        package.to_string()
    };

    Ok(ControlInfo {
        info_prefix: format!("var/lib/dpkg/info/{}.", identity),
        identity,
    })
}

/// Parses a decompressed `control.tar`, returning the package identity
/// plus a basename→bytes map covering the synthesized `control` (original
/// text plus the `Status:` line) and every other non-directory member.
pub fn parse_control_archive(control_tar: &[u8]) -> Result<(ControlInfo, HashMap<String, Vec<u8>>)> {
    let mut archive = Archive::new(control_tar);
    let mut control_text: Option<Vec<u8>> = None;
    let mut extra_files: HashMap<String, Vec<u8>> = HashMap::new();

    for entry in archive.entries().context("reading control.tar entries")? {
        let mut entry = entry.context("reading control.tar entry header")?;
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let path = entry.path()?.into_owned();
        let name = path.to_string_lossy();
        let name = name.strip_prefix("./").unwrap_or(&name).to_string();

        let mut body = Vec::new();
        entry.read_to_end(&mut body)?;

        if name == "control" {
            control_text = Some(body);
        } else {
            let basename = path
                .file_name()
                .ok_or_else(|| anyhow!("control.tar member has no basename: {}", name))?
                .to_string_lossy()
                .to_string();
            extra_files.insert(basename, body);
        }
    }

    let control_text =
        control_text.ok_or_else(|| anyhow!("control.tar has no ./control member"))?;
    let info = identify(&control_text)?;

    let mut rendered_control = control_text;
    rendered_control.extend_from_slice(b"Status: install ok unpacked\n");
    extra_files.insert("control".to_string(), rendered_control);

    Ok((info, extra_files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_just_package_name_without_multi_arch_same() {
        let info = identify(b"Package: apt\nVersion: 2.6.0\nArchitecture: amd64\n\n").unwrap();
        assert_eq!(info.identity, "apt");
        assert_eq!(info.info_prefix, "var/lib/dpkg/info/apt.");
    }

    #[test]
    fn multi_arch_same_appends_architecture_to_identity() {
        let info = identify(
            b"Package: libc6\nVersion: 2.36\nArchitecture: amd64\nMulti-Arch: same\n\n",
        )
        .unwrap();
        assert_eq!(info.identity, "libc6:amd64");
        assert_eq!(info.info_prefix, "var/lib/dpkg/info/libc6:amd64.");
    }

    #[test]
    fn multi_arch_foreign_does_not_qualify_identity() {
        let info = identify(
            b"Package: libc6\nVersion: 2.36\nArchitecture: amd64\nMulti-Arch: foreign\n\n",
        )
        .unwrap();
        assert_eq!(info.identity, "libc6");
    }
}
