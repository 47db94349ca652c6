//! Shared compression-format dispatch.
//!
//! Both the package index fetch (`Packages.xz` / `.gz` / plain) and the
//! archive unpacker (`data.tar.gz` / `.xz` / `.zst`) pick a decoder purely
//! from a filename suffix, so the dispatch lives in one place.

use std::io::Read;

use anyhow::{anyhow, Result};
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Xz,
    Gzip,
    Zstd,
    None,
}

impl Compression {
    /// Selects a codec from a member/file name's suffix.
    pub fn from_name(name: &str) -> Result<Self> {
        if name.ends_with(".xz") {
            Ok(Compression::Xz)
        } else if name.ends_with(".gz") {
            Ok(Compression::Gzip)
        } else if name.ends_with(".zst") {
            Ok(Compression::Zstd)
        } else {
            Ok(Compression::None)
        }
    }

    /// Like [`from_name`](Self::from_name), but requires an extension to be
    /// present (used by the `Packages{.xz,.gz,""}` preference order, where
    /// the empty suffix is itself one of the three valid choices).
    pub fn from_packages_suffix(suffix: &str) -> Result<Self> {
        match suffix {
            ".xz" => Ok(Compression::Xz),
            ".gz" => Ok(Compression::Gzip),
            "" => Ok(Compression::None),
            other => Err(anyhow!("unknown Packages suffix: {}", other)),
        }
    }

    pub fn wrap<'a, R: Read + 'a>(self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            Compression::None => Box::new(reader),
        })
    }
}

/// The order in which index variants are tried, per §4.5.
pub const PACKAGES_PREFERENCE: [&str; 3] = [".xz", ".gz", ""];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_suffix() {
        assert_eq!(Compression::from_name("data.tar.gz").unwrap(), Compression::Gzip);
        assert_eq!(Compression::from_name("data.tar.xz").unwrap(), Compression::Xz);
        assert_eq!(Compression::from_name("data.tar.zst").unwrap(), Compression::Zstd);
        assert_eq!(Compression::from_name("data.tar").unwrap(), Compression::None);
    }
}
