//! Output filter: post-processes the runtime's exported tar to restore
//! determinism, per §4.11.
//!
//! Entry copying follows `containers-bootc`'s `tar::write::copy_entry`
//! idiom: clone the header, mutate what needs mutating, and dispatch to
//! `append_link` for symlinks (reading the target through
//! `entry.link_name()`, not `header.link_name()`, since the header's link
//! field can't hold a GNU long link name) or `append_data` for everything
//! else. `Builder::finish` supplies the trailing two zero blocks for free.

use std::io::Write;

use anyhow::{anyhow, Context, Result};
use faster_hex::hex_string;
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};

use crate::fsmodel::Filesystem;

const DROPPED: [&str; 2] = [".dockerenv", "etc/resolv.conf"];
const RESOLV_CONF_TARGET: &str = "/run/systemd/resolve/stub-resolv.conf";

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Re-processes `export_stream` (the runtime's raw `export` output) into
/// `out`: drops runtime-injected entries, normalizes mtimes against `fs`
/// (0 for anything `fs` doesn't track), and appends the synthetic
/// `etc/resolv.conf` symlink. Returns the hex sha256 of the bytes written.
pub fn filter_exported_tar<W: Write>(export_stream: &[u8], fs: &Filesystem, out: W) -> Result<String> {
    let hashing = HashingWriter {
        inner: out,
        hasher: Sha256::new(),
    };
    let mut builder = Builder::new(hashing);

    let mut archive = tar::Archive::new(export_stream);
    for entry in archive.entries().context("reading exported tar entries")? {
        let mut entry = entry.context("reading exported tar entry header")?;

        let path = entry.path()?.into_owned();
        let name = path.to_string_lossy();
        let name = name.trim_end_matches('/');
        if DROPPED.contains(&name) {
            continue;
        }

        let mtime = fs.get(name).map(|e| e.mtime).unwrap_or(0);
        let mut header = entry.header().clone();
        header.set_mtime(mtime);
        header.set_cksum();

        match header.entry_type() {
            EntryType::Link | EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| anyhow!("{}: symlink with no target", path.display()))?
                    .into_owned();
                builder.append_link(&mut header, &path, &target)?;
            }
            _ => {
                builder.append_data(&mut header, &path, &mut entry)?;
            }
        }
    }

    let mut resolv_conf = Header::new_gnu();
    resolv_conf.set_path("etc/resolv.conf")?;
    resolv_conf.set_entry_type(EntryType::Symlink);
    resolv_conf.set_link_name(RESOLV_CONF_TARGET)?;
    resolv_conf.set_mode(0o777);
    resolv_conf.set_uid(0);
    resolv_conf.set_gid(0);
    resolv_conf.set_size(0);
    resolv_conf.set_mtime(0);
    resolv_conf.set_cksum();
    builder.append_link(&mut resolv_conf, "etc/resolv.conf", RESOLV_CONF_TARGET)?;

    let hashing = builder.into_inner().context("finishing output filter tar")?;
    let HashingWriter { mut inner, hasher } = hashing;
    inner.flush()?;

    Ok(hex_string(&hasher.finalize()))
}
