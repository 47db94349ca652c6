//! Package archive unpacking: the outer `ar` container plus its inner
//! `control.tar`/`data.tar` members, per §4.7.

mod control;
mod outer;

use std::io::Read;
use std::path::Path;

use anyhow::Result;
use tar::Archive;

use crate::fsmodel::{ArchiveEntry, EntryKind, Filesystem};

/// Maps a tar entry type onto the model's [`EntryKind`]. A hard link
/// (`tar::EntryType::Link`) gets its own variant rather than falling into
/// `Regular` — it carries no data blocks of its own, only a `link_target`
/// naming the file it aliases, and collapsing it into `Regular` would both
/// stamp a spurious zero-byte file over the real content and still leave a
/// dangling link name the tar writer has no business attaching to a
/// `Regular` entry.
fn entry_kind(entry_type: tar::EntryType) -> EntryKind {
    match entry_type {
        tar::EntryType::Directory => EntryKind::Directory,
        tar::EntryType::Symlink => EntryKind::Symlink,
        tar::EntryType::Link => EntryKind::HardLink,
        tar::EntryType::Char => EntryKind::CharDevice,
        tar::EntryType::Block => EntryKind::BlockDevice,
        tar::EntryType::Fifo => EntryKind::Fifo,
        _ => EntryKind::Regular,
    }
}

/// Unpacks the `.deb` at `path` into `fs`: every `data.tar` entry under its
/// canonical name, plus the synthesized `var/lib/dpkg/info/*` files derived
/// from `control.tar` and the data-archive manifest.
pub fn unpack_package(fs: &mut Filesystem, path: &Path) -> Result<()> {
    let members = outer::read_deb_members(path)?;

    let mut control_tar = Vec::new();
    members
        .control_compression
        .wrap(&members.control[..])?
        .read_to_end(&mut control_tar)?;
    let (info, info_files) = control::parse_control_archive(&control_tar)?;

    let mut data_tar = Vec::new();
    members
        .data_compression
        .wrap(&members.data[..])?
        .read_to_end(&mut data_tar)?;

    let mut manifest = String::new();
    let mut archive = Archive::new(&data_tar[..]);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = entry.header().clone();

        let raw_name = entry.path()?.to_string_lossy().into_owned();
        let name = raw_name.strip_prefix("./").unwrap_or(&raw_name).to_string();

        if name.is_empty() {
            manifest.push_str("/.\n");
        } else {
            manifest.push('/');
            manifest.push_str(&name);
            manifest.push('\n');
        }

        let kind = entry_kind(header.entry_type());
        let link_target = entry.link_name()?.map(|p| p.to_string_lossy().into_owned());

        let mut content = None;
        if kind == EntryKind::Regular {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            content = Some(buf);
        }

        fs.add(
            ArchiveEntry {
                name,
                mode: header.mode()?,
                uid: header.uid()?,
                gid: header.gid()?,
                size: header.size()?,
                kind,
                link_target,
                dev_major: header.device_major()?.unwrap_or(0),
                dev_minor: header.device_minor()?.unwrap_or(0),
                mtime: header.mtime()?,
            },
            content,
        )?;
    }

    for (basename, body) in info_files {
        fs.file(&format!("{}{}", info.info_prefix, basename), body, None)?;
    }
    fs.file(&format!("{}list", info.info_prefix), manifest.into_bytes(), None)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_link_entries_keep_their_own_kind_and_carry_no_content() {
        assert_eq!(entry_kind(tar::EntryType::Link), EntryKind::HardLink);
        assert_ne!(entry_kind(tar::EntryType::Link), EntryKind::Regular);
    }

    #[test]
    fn unrecognized_entry_types_still_default_to_regular() {
        assert_eq!(entry_kind(tar::EntryType::Regular), EntryKind::Regular);
        assert_eq!(entry_kind(tar::EntryType::Continuous), EntryKind::Regular);
    }
}
