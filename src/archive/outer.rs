//! Outer `ar` container handling: locates the `control.tar*` and
//! `data.tar*` members of a `.deb` package, per §4.7.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ar::Archive;

use crate::compress::Compression;

pub struct DebMembers {
    pub control: Vec<u8>,
    pub control_compression: Compression,
    pub data: Vec<u8>,
    pub data_compression: Compression,
}

/// Reads `path`'s outer `ar` container, extracting the raw (still
/// compressed) bytes of its `control.tar*` and `data.tar*` members. Any
/// other outer member is ignored.
pub fn read_deb_members(path: &Path) -> Result<DebMembers> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut archive = Archive::new(file);

    let mut control: Option<(Vec<u8>, Compression)> = None;
    let mut data: Option<(Vec<u8>, Compression)> = None;

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.context("reading ar member header")?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();

        if name.starts_with("control.tar") {
            let compression = Compression::from_name(&name)?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            control = Some((buf, compression));
        } else if name.starts_with("data.tar") {
            let compression = Compression::from_name(&name)?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            data = Some((buf, compression));
        }
    }

    let (control, control_compression) =
        control.ok_or_else(|| anyhow!("{}: no control.tar member", path.display()))?;
    let (data, data_compression) =
        data.ok_or_else(|| anyhow!("{}: no data.tar member", path.display()))?;

    Ok(DebMembers {
        control,
        control_compression,
        data,
        data_compression,
    })
}
