//! In-memory virtual filesystem model, per §4.8.
//!
//! Entries are keyed by canonical path in a `BTreeMap`, which keeps them in
//! the lexicographic order `tarwriter` needs for free — no separate sort
//! pass before emission.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::error::BuildError;

const MAX_SYMLINK_HOPS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    HardLink,
    CharDevice,
    BlockDevice,
    Fifo,
}

/// A tar-level record. `mtime` is deliberately excluded from the "useful
/// attributes" compared on merge (see [`ArchiveEntry::useful_attrs_match`]);
/// it's the one field a re-add is allowed to bump.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub kind: EntryKind,
    pub link_target: Option<String>,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub mtime: u64,
}

impl ArchiveEntry {
    fn useful_attrs_match(&self, other: &ArchiveEntry) -> bool {
        self.name == other.name
            && self.mode == other.mode
            && self.uid == other.uid
            && self.gid == other.gid
            && self.size == other.size
            && self.kind == other.kind
            && self.link_target == other.link_target
            && self.dev_major == other.dev_major
            && self.dev_minor == other.dev_minor
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Joins `target` onto `parent` (the directory a symlink lives in) and
/// collapses `.`/`..`/empty segments, the way a kernel path lookup would.
fn join_and_normalize(parent: &str, target: &str) -> String {
    let mut stack: Vec<&str> = if target.starts_with('/') {
        Vec::new()
    } else {
        parent.split('/').filter(|s| !s.is_empty()).collect()
    };

    for component in target.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }

    stack.join("/")
}

pub struct Filesystem {
    entries: BTreeMap<String, (ArchiveEntry, Option<Vec<u8>>)>,
}

impl Filesystem {
    pub fn new() -> Self {
        Filesystem {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, canonical_name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(canonical_name).map(|(entry, _)| entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArchiveEntry, Option<&[u8]>)> {
        self.entries
            .values()
            .map(|(entry, content)| (entry, content.as_deref()))
    }

    /// Resolves `path` left-to-right against symlinks currently recorded in
    /// the model, per §4.8: each successive prefix is checked, and a
    /// symlinked prefix is rewritten to its (recursively resolved) target
    /// before the remaining components are appended.
    fn canonicalize(&self, path: &str) -> Result<String> {
        let mut resolved = String::new();

        for component in path.split('/').filter(|s| !s.is_empty()) {
            let mut candidate = if resolved.is_empty() {
                component.to_string()
            } else {
                format!("{}/{}", resolved, component)
            };

            let mut hops = 0;
            while let Some((entry, _)) = self.entries.get(&candidate) {
                if entry.kind != EntryKind::Symlink {
                    break;
                }
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    anyhow::bail!("symlink resolution did not converge at {}", candidate);
                }
                let target = entry.link_target.clone().unwrap_or_default();
                candidate = join_and_normalize(parent_of(&candidate), &target);
            }

            resolved = candidate;
        }

        Ok(resolved)
    }

    /// Adds (or idempotently merges) `entry` with optional `content`.
    ///
    /// An entry whose canonical name already exists with the same useful
    /// attributes is a no-op except that the stored mtime becomes the
    /// maximum of the two; a mismatch on any other attribute is fatal.
    /// Entries that canonicalize to the empty path are silently dropped.
    pub fn add(&mut self, mut entry: ArchiveEntry, content: Option<Vec<u8>>) -> Result<()> {
        if entry.name.is_empty() {
            return Ok(());
        }

        let canonical = self.canonicalize(&entry.name)?;
        if canonical.is_empty() {
            return Ok(());
        }
        entry.name = canonical.clone();

        match self.entries.get_mut(&canonical) {
            None => {
                self.entries.insert(canonical, (entry, content));
            }
            Some((existing, _)) => {
                if !existing.useful_attrs_match(&entry) {
                    return Err(BuildError::MergeConflict { path: canonical }.into());
                }
                existing.mtime = existing.mtime.max(entry.mtime);
            }
        }

        Ok(())
    }

    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        self.add(
            ArchiveEntry {
                name: name.to_string(),
                mode: 0o755,
                uid: 0,
                gid: 0,
                size: 0,
                kind: EntryKind::Directory,
                link_target: None,
                dev_major: 0,
                dev_minor: 0,
                mtime: 0,
            },
            None,
        )
    }

    pub fn symlink(&mut self, name: &str, target: &str) -> Result<()> {
        self.add(
            ArchiveEntry {
                name: name.to_string(),
                mode: 0o777,
                uid: 0,
                gid: 0,
                size: 0,
                kind: EntryKind::Symlink,
                link_target: Some(target.to_string()),
                dev_major: 0,
                dev_minor: 0,
                mtime: 0,
            },
            None,
        )
    }

    pub fn file(&mut self, name: &str, content: Vec<u8>, mode: Option<u32>) -> Result<()> {
        let size = content.len() as u64;
        self.add(
            ArchiveEntry {
                name: name.to_string(),
                mode: mode.unwrap_or(0o644),
                uid: 0,
                gid: 0,
                size,
                kind: EntryKind::Regular,
                link_target: None,
                dev_major: 0,
                dev_minor: 0,
                mtime: 0,
            },
            Some(content),
        )
    }

    pub fn mknod(&mut self, name: &str, kind: EntryKind, major: u32, minor: u32) -> Result<()> {
        self.add(
            ArchiveEntry {
                name: name.to_string(),
                mode: 0o660,
                uid: 0,
                gid: 0,
                size: 0,
                kind,
                link_target: None,
                dev_major: major,
                dev_minor: minor,
                mtime: 0,
            },
            None,
        )
    }

    /// Pre-seeds the directory/symlink skeleton and the top-level `init`
    /// script that packages unpack on top of, per §4.8.
    pub fn seed(&mut self, init_script: Vec<u8>) -> Result<()> {
        const STANDARD_DIRS: [&str; 6] = [
            "usr/bin", "usr/sbin", "usr/lib", "usr/lib32", "usr/lib64", "usr/libx32",
        ];

        for dir in STANDARD_DIRS {
            self.mkdir(dir)?;
        }
        for leaf in ["bin", "sbin", "lib", "lib32", "lib64", "libx32"] {
            self.symlink(leaf, &format!("usr/{}", leaf))?;
        }

        self.file("init", init_script, Some(0o755))
    }
}

impl Default for Filesystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_string(),
            mode: 0o755,
            uid: 0,
            gid: 0,
            size: 0,
            kind: EntryKind::Directory,
            link_target: None,
            dev_major: 0,
            dev_minor: 0,
            mtime: 0,
        }
    }

    #[test]
    fn symlinked_prefix_redirects_writes() {
        let mut fs = Filesystem::new();
        fs.mkdir("usr/bin").unwrap();
        fs.symlink("bin", "usr/bin").unwrap();

        fs.file("bin/foo", b"binary".to_vec(), Some(0o755)).unwrap();

        assert!(fs.get("usr/bin/foo").is_some());
        assert!(fs.get("bin/foo").is_none());
    }

    #[test]
    fn identical_readd_takes_max_mtime() {
        let mut fs = Filesystem::new();
        let mut first = dir("etc");
        first.mtime = 10;
        fs.add(first, None).unwrap();

        let mut second = dir("etc");
        second.mtime = 50;
        fs.add(second, None).unwrap();

        assert_eq!(fs.get("etc").unwrap().mtime, 50);
    }

    #[test]
    fn mismatched_readd_is_a_merge_conflict() {
        let mut fs = Filesystem::new();
        fs.add(dir("etc"), None).unwrap();

        let mut different_mode = dir("etc");
        different_mode.mode = 0o700;
        let err = fs.add(different_mode, None).unwrap_err();
        assert!(err.to_string().contains("merge conflict"));
    }

    #[test]
    fn empty_name_is_silently_dropped() {
        let mut fs = Filesystem::new();
        fs.add(dir(""), None).unwrap();
        assert_eq!(fs.iter().count(), 0);
    }

    #[test]
    fn chained_symlinks_resolve_to_fixed_point() {
        let mut fs = Filesystem::new();
        fs.mkdir("real").unwrap();
        fs.symlink("a", "real").unwrap();
        fs.symlink("b", "a").unwrap();

        fs.file("b/leaf", b"x".to_vec(), None).unwrap();
        assert!(fs.get("real/leaf").is_some());
    }
}
