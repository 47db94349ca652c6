//! Deterministic tar emission, per §4.9.
//!
//! Headers are built with `tar::Header`'s field setters directly rather than
//! `tar::Builder`, since the writer must keep an excluded directory's entry
//! while dropping its non-directory descendants, and must force
//! numeric-only ownership — both fall outside `Builder`'s one-shot
//! append-and-forget API.

use std::io::Write;

use anyhow::Result;
use tar::{EntryType, Header};

use crate::fsmodel::{ArchiveEntry, EntryKind, Filesystem};

const BLOCK_SIZE: u64 = 512;

/// `usr/share/doc/`, `usr/share/man/`, and `usr/share/locale/*/LC_MESSAGES/*.mo`
/// are dropped for non-directory entries, per §4.9.
fn is_excluded(name: &str) -> bool {
    name.starts_with("usr/share/doc/") || name.starts_with("usr/share/man/") || is_locale_mo(name)
}

fn is_locale_mo(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("usr/share/locale/") else {
        return false;
    };
    let Some((_lang, rest)) = rest.split_once('/') else {
        return false;
    };
    let Some(basename) = rest.strip_prefix("LC_MESSAGES/") else {
        return false;
    };
    basename.ends_with(".mo") && !basename.contains('/')
}

fn entry_type(kind: EntryKind) -> EntryType {
    match kind {
        EntryKind::Regular => EntryType::Regular,
        EntryKind::Directory => EntryType::Directory,
        EntryKind::Symlink => EntryType::Symlink,
        EntryKind::HardLink => EntryType::Link,
        EntryKind::CharDevice => EntryType::Char,
        EntryKind::BlockDevice => EntryType::Block,
        EntryKind::Fifo => EntryType::Fifo,
    }
}

fn build_header(entry: &ArchiveEntry) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_path(&entry.name)?;
    header.set_mode(entry.mode);
    header.set_uid(entry.uid);
    header.set_gid(entry.gid);
    header.set_size(entry.size);
    header.set_mtime(entry.mtime);
    header.set_entry_type(entry_type(entry.kind));
    if let Some(target) = &entry.link_target {
        header.set_link_name(target)?;
    }
    if matches!(entry.kind, EntryKind::CharDevice | EntryKind::BlockDevice) {
        header.set_device_major(entry.dev_major)?;
        header.set_device_minor(entry.dev_minor)?;
    }
    header.set_cksum();
    Ok(header)
}

fn pad_to_block<W: Write>(out: &mut W, written: u64) -> Result<()> {
    let remainder = written % BLOCK_SIZE;
    if remainder != 0 {
        let zeros = [0u8; BLOCK_SIZE as usize];
        out.write_all(&zeros[..(BLOCK_SIZE - remainder) as usize])?;
    }
    Ok(())
}

/// Writes every entry of `fs` to `out` in ascending canonical-path order.
/// No end-of-archive marker is written; the runtime's `import` consumes a
/// raw stream and needs none.
pub fn write_deterministic_tar<W: Write>(fs: &Filesystem, out: &mut W) -> Result<()> {
    for (entry, content) in fs.iter() {
        if entry.kind != EntryKind::Directory && is_excluded(&entry.name) {
            continue;
        }

        let header = build_header(entry)?;
        out.write_all(header.as_bytes())?;

        if entry.kind == EntryKind::Regular {
            let body = content.unwrap_or(&[]);
            out.write_all(body)?;
            pad_to_block(out, body.len() as u64)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_link_entries_round_trip_as_link_type_with_their_target() {
        let mut fs = Filesystem::new();
        fs.file("usr/bin/real-tool", b"binary".to_vec(), Some(0o755))
            .unwrap();
        fs.add(
            ArchiveEntry {
                name: "usr/bin/aliased-tool".to_string(),
                mode: 0o755,
                uid: 0,
                gid: 0,
                size: 0,
                kind: EntryKind::HardLink,
                link_target: Some("usr/bin/real-tool".to_string()),
                dev_major: 0,
                dev_minor: 0,
                mtime: 0,
            },
            None,
        )
        .unwrap();

        let mut out = Vec::new();
        write_deterministic_tar(&fs, &mut out).unwrap();

        let mut archive = tar::Archive::new(&out[..]);
        let aliased = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().to_string_lossy() == "usr/bin/aliased-tool")
            .unwrap();
        assert_eq!(aliased.header().entry_type(), EntryType::Link);
        assert_eq!(
            aliased.link_name().unwrap().unwrap().to_string_lossy(),
            "usr/bin/real-tool"
        );
    }

    #[test]
    fn doc_and_man_are_excluded_but_locale_po_is_not() {
        assert!(is_excluded("usr/share/doc/apt/changelog.gz"));
        assert!(is_excluded("usr/share/man/man1/apt.1.gz"));
        assert!(is_excluded("usr/share/locale/de/LC_MESSAGES/apt.mo"));
        assert!(!is_excluded("usr/share/locale/de/LC_MESSAGES/apt.po"));
        assert!(!is_excluded("usr/bin/apt"));
    }

    #[test]
    fn excluded_directories_are_kept_but_their_files_are_not() {
        let mut fs = Filesystem::new();
        fs.mkdir("usr/share/doc").unwrap();
        fs.mkdir("usr/share/doc/apt").unwrap();
        fs.file("usr/share/doc/apt/changelog.gz", b"x".to_vec(), None)
            .unwrap();
        fs.file("usr/bin/apt", b"bin".to_vec(), None).unwrap();

        let mut out = Vec::new();
        write_deterministic_tar(&fs, &mut out).unwrap();

        let mut names = Vec::new();
        let mut archive = tar::Archive::new(&out[..]);
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
        }

        assert!(names.contains(&"usr/share/doc".to_string()));
        assert!(names.contains(&"usr/share/doc/apt".to_string()));
        assert!(!names.iter().any(|n| n.contains("changelog.gz")));
        assert!(names.contains(&"usr/bin/apt".to_string()));
    }

    #[test]
    fn entries_are_emitted_in_lexicographic_order() {
        let mut fs = Filesystem::new();
        fs.mkdir("z").unwrap();
        fs.mkdir("a").unwrap();
        fs.mkdir("m").unwrap();

        let mut out = Vec::new();
        write_deterministic_tar(&fs, &mut out).unwrap();

        let mut names = Vec::new();
        let mut archive = tar::Archive::new(&out[..]);
        for entry in archive.entries().unwrap() {
            names.push(entry.unwrap().path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["a", "m", "z"]);
    }
}
