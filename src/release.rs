//! Repository client: fetches and authenticates a suite's `Release` file,
//! then hands back a checksum-verifying fetcher for everything else under
//! that suite, per §4.4.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use faster_hex::hex_string;
use sha2::{Digest, Sha256};
use url::Url;

use crate::cache::DiskCache;
use crate::error::BuildError;
use crate::http::Fetcher;
use crate::verify;

/// The checksum section of a parsed `Release` file.
pub struct ReleaseManifest {
    checksums: HashMap<String, String>,
}

impl ReleaseManifest {
    pub fn expected_sha256(&self, path: &str) -> Option<&str> {
        self.checksums.get(path).map(|s| s.as_str())
    }
}

/// Parses the `SHA256:` section: the literal header line, then indented
/// `<hex> <size> <path>` lines until the first non-indented line.
pub fn parse_sha256_section(release_body: &[u8]) -> Result<ReleaseManifest> {
    let text = std::str::from_utf8(release_body)?;
    let mut lines = text.lines();
    let mut checksums = HashMap::new();

    let found_header = lines.by_ref().any(|line| line == "SHA256:");
    if !found_header {
        return Ok(ReleaseManifest { checksums });
    }

    for line in lines {
        if !line.starts_with(' ') {
            break;
        }
        let mut parts = line.split_whitespace();
        let (Some(checksum), Some(_size), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        checksums.insert(path.to_string(), checksum.to_string());
    }

    Ok(ReleaseManifest { checksums })
}

/// A verified fetcher for repository-relative paths under one suite.
pub struct RepoFetcher<'a> {
    fetcher: &'a mut Fetcher,
    cache: &'a DiskCache,
    host: String,
    archive_path: String,
    base_url: String,
    dist_path: String,
    manifest: ReleaseManifest,
}

impl<'a> RepoFetcher<'a> {
    /// Reports whether `path` is listed in the suite's `Release` manifest,
    /// without fetching it.
    pub fn has(&self, path: &str) -> bool {
        self.manifest.expected_sha256(path).is_some()
    }

    /// Fetches `path` relative to the suite's distribution directory,
    /// verifying its sha256 against the release manifest. Absent manifest
    /// entries are fatal.
    pub async fn fetch(&mut self, path: &str) -> Result<Vec<u8>> {
        let expected = self
            .manifest
            .expected_sha256(path)
            .ok_or_else(|| anyhow!("{}{} not listed in Release", self.dist_path, path))?
            .to_string();

        let rel_path = format!("{}{}", self.dist_path, path);
        let cache_path = join_archive_path(&self.archive_path, &rel_path);
        let url = format!("{}{}", self.base_url, rel_path);
        let bytes = self
            .cache
            .fetch(self.fetcher, &self.host, &cache_path, &url)
            .await?;

        let actual = hex_string(&Sha256::digest(&bytes));
        if actual != expected {
            return Err(BuildError::ChecksumMismatch {
                path: rel_path,
                expected,
                actual,
            }
            .into());
        }

        Ok(bytes)
    }
}

/// Splits `archive_url` into its `host[:port]` authority (the cache-key
/// component shared with the `.deb` download layer), its own path
/// component (e.g. `debian`, empty for a root-hosted archive — also folded
/// into every cache key so two distributions sharing a host but mounted
/// under different paths never collide), and a scheme-qualified base URL.
pub fn archive_authority(archive_url: &str) -> Result<(String, String, String)> {
    let parsed = Url::parse(archive_url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("archive_url has no host: {}", archive_url))?
        .to_string();
    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    };
    let archive_path = parsed.path().trim_matches('/').to_string();
    let base_url = if archive_path.is_empty() {
        format!("{}://{}", parsed.scheme(), authority)
    } else {
        format!("{}://{}/{}", parsed.scheme(), authority, archive_path)
    };
    Ok((authority, archive_path, base_url))
}

/// Prefixes `archive_path` (the archive URL's own path component) onto a
/// repository-relative path for use as an on-disk cache key, per §6's
/// `<cache_root>/<host>/<archive_path>/<path>` layout.
pub fn join_archive_path(archive_path: &str, rel_path: &str) -> String {
    if archive_path.is_empty() {
        rel_path.to_string()
    } else {
        format!("{}/{}", archive_path, rel_path)
    }
}

/// Fetches, verifies, and parses `dists/<suite>/Release`, returning a
/// [`RepoFetcher`] scoped to that suite.
pub async fn get_release_fetcher<'a>(
    fetcher: &'a mut Fetcher,
    cache: &'a DiskCache,
    keyring_path: &Path,
    archive_url: &str,
    suite: &str,
) -> Result<RepoFetcher<'a>> {
    let (authority, archive_path, base_url) = archive_authority(archive_url)?;
    let dist_path = format!("dists/{}/", suite);

    let release_rel = format!("{}Release", dist_path);
    let release_cache_path = join_archive_path(&archive_path, &release_rel);
    let release_url = format!("{}/{}", base_url, release_rel);
    let release = cache
        .fetch(fetcher, &authority, &release_cache_path, &release_url)
        .await?;

    let gpg_rel = format!("{}Release.gpg", dist_path);
    let gpg_cache_path = join_archive_path(&archive_path, &gpg_rel);
    let gpg_url = format!("{}/{}", base_url, gpg_rel);
    let release_gpg = cache
        .fetch(fetcher, &authority, &gpg_cache_path, &gpg_url)
        .await?;

    verify::gpg_verify(keyring_path, &release_rel, &release_gpg, &release).await?;

    let manifest = parse_sha256_section(&release)?;

    Ok(RepoFetcher {
        fetcher,
        cache,
        host: authority,
        archive_path,
        base_url: format!("{}/", base_url),
        dist_path,
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sha256_section_until_next_unindented_line() {
        let body = b"Origin: Debian\nLabel: Debian\nSHA256:\n 0123 100 main/binary-amd64/Packages\n 4567 200 main/binary-amd64/Packages.gz\nSHA512:\n junk here\n";
        let manifest = parse_sha256_section(body).unwrap();
        assert_eq!(
            manifest.expected_sha256("main/binary-amd64/Packages"),
            Some("0123")
        );
        assert_eq!(
            manifest.expected_sha256("main/binary-amd64/Packages.gz"),
            Some("4567")
        );
        assert_eq!(manifest.expected_sha256("not/listed"), None);
    }

    #[test]
    fn missing_sha256_section_yields_empty_manifest() {
        let manifest = parse_sha256_section(b"Origin: Debian\n").unwrap();
        assert_eq!(manifest.expected_sha256("anything"), None);
    }

    #[test]
    fn archive_authority_splits_host_and_path() {
        let (host, archive_path, base_url) = archive_authority("http://mirror/debian").unwrap();
        assert_eq!(host, "mirror");
        assert_eq!(archive_path, "debian");
        assert_eq!(base_url, "http://mirror/debian");
    }

    #[test]
    fn archive_authority_handles_root_hosted_archive() {
        let (host, archive_path, base_url) = archive_authority("http://mirror/").unwrap();
        assert_eq!(host, "mirror");
        assert_eq!(archive_path, "");
        assert_eq!(base_url, "http://mirror");
    }

    #[test]
    fn distinct_archive_paths_on_one_host_yield_distinct_cache_keys() {
        let debian = join_archive_path("debian", "dists/bookworm/Release");
        let security = join_archive_path("debian-security", "dists/bookworm/Release");
        assert_ne!(debian, security);
    }
}
