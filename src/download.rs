//! Concurrent package downloader, per §4.6.
//!
//! Bounded to [`MAX_CONCURRENT_DOWNLOADS`] in-flight requests via a
//! `tokio::sync::Semaphore` permit per task, driven through a
//! `FuturesUnordered` — the same `futures` crate the teacher already
//! depends on for its task-union plumbing in `main.rs`, adapted here to
//! drain completions in whatever order they finish rather than submission
//! order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use faster_hex::hex_string;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::debug;
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::error::BuildError;
use crate::http::Fetcher;
use crate::index::PackageRecord;

const MAX_CONCURRENT_DOWNLOADS: usize = 8;

/// Downloads every package in `packages` into
/// `<cache_root>/<host>/<archive_path>/<pool path>`, returning the
/// destination of each in completion order (not submission order).
///
/// `archive_path` is the archive URL's own path component (e.g. `debian` in
/// `http://mirror/debian`), empty for a root-hosted archive; it must be
/// folded into the cache key so two distributions sharing a host but
/// mounted under different paths (`/debian` vs `/debian-security`) never
/// collide on the same cached `.deb`, per §6.
///
/// A package already on disk is trusted outright and never re-verified or
/// re-fetched, even if its recorded digest has since changed upstream.
pub async fn download_all(
    archive_url: &str,
    host: &str,
    archive_path: &str,
    cache_root: &Path,
    packages: &[&PackageRecord],
) -> Result<Vec<PathBuf>> {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS));
    let mut tasks = FuturesUnordered::new();

    for pkg in packages.iter().copied().cloned() {
        let semaphore = semaphore.clone();
        let archive_url = archive_url.to_string();
        let host = host.to_string();
        let archive_path = archive_path.to_string();
        let cache_root = cache_root.to_path_buf();
        tasks.push(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("download semaphore never closes");
            download_one(&archive_url, &host, &archive_path, &cache_root, &pkg).await
        });
    }

    let mut destinations = Vec::with_capacity(packages.len());
    while let Some(result) = tasks.next().await {
        destinations.push(result?);
    }

    Ok(destinations)
}

async fn download_one(
    archive_url: &str,
    host: &str,
    archive_path: &str,
    cache_root: &Path,
    pkg: &PackageRecord,
) -> Result<PathBuf> {
    let mut destination = cache_root.join(host);
    if !archive_path.is_empty() {
        destination = destination.join(archive_path);
    }
    let destination = destination.join(&pkg.filename);

    if tokio::fs::try_exists(&destination).await? {
        debug!("{} already on disk, trusting existing copy", pkg.filename);
        return Ok(destination);
    }

    let dir = destination
        .parent()
        .ok_or_else(|| anyhow!("download path has no parent: {}", destination.display()))?
        .to_path_buf();
    tokio::fs::create_dir_all(&dir).await?;

    let tmp_path = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let tmp = Builder::new().prefix(".rootstrap-").tempfile_in(&dir)?;
        Ok(tmp.into_temp_path().keep()?)
    })
    .await??;

    let url = format!("{}/{}", archive_url.trim_end_matches('/'), pkg.filename);
    let mut fetcher = Fetcher::new()?;
    let mut resp = fetcher.get_checked(&url, None).await?;

    let mut hasher = Sha256::new();
    {
        let mut file = File::create(&tmp_path).await?;
        while let Some(chunk) = resp.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
    }

    let actual = hex_string(&hasher.finalize());
    if actual != pkg.sha256 {
        tokio::fs::remove_file(&tmp_path).await.ok();
        return Err(BuildError::ChecksumMismatch {
            path: pkg.filename.clone(),
            expected: pkg.sha256.clone(),
            actual,
        }
        .into());
    }

    tokio::fs::hard_link(&tmp_path, &destination).await?;
    tokio::fs::remove_file(&tmp_path).await.ok();
    debug!("downloaded {} ({} bytes hashed ok)", pkg.filename, actual.len() / 2);
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MultiArch;
    use tempfile::tempdir;

    fn record(filename: &str) -> PackageRecord {
        PackageRecord {
            name: "apt".to_string(),
            filename: filename.to_string(),
            version: "1.0".to_string(),
            priority: crate::index::Priority::Required,
            sha256: "0".repeat(64),
            depends: Vec::new(),
            pre_depends: Vec::new(),
            multi_arch: MultiArch::None,
            architecture: "amd64".to_string(),
        }
    }

    #[tokio::test]
    async fn existing_destination_is_trusted_without_a_request() {
        let dir = tempdir().unwrap();
        let host_dir = dir.path().join("deb.example.org");
        tokio::fs::create_dir_all(host_dir.join("pool")).await.unwrap();
        tokio::fs::write(host_dir.join("pool/apt.deb"), b"already here")
            .await
            .unwrap();

        let pkg = record("pool/apt.deb");
        let result = download_one("http://deb.example.org", "deb.example.org", "", dir.path(), &pkg)
            .await
            .unwrap();
        assert_eq!(result, host_dir.join("pool/apt.deb"));
        assert_eq!(
            tokio::fs::read(&result).await.unwrap(),
            b"already here".to_vec()
        );
    }

    #[tokio::test]
    async fn archive_path_is_folded_into_the_cache_destination() {
        let dir = tempdir().unwrap();
        let pool_dir = dir.path().join("deb.example.org/debian-security/pool");
        tokio::fs::create_dir_all(&pool_dir).await.unwrap();
        tokio::fs::write(pool_dir.join("apt.deb"), b"already here")
            .await
            .unwrap();

        let pkg = record("pool/apt.deb");
        let result = download_one(
            "http://deb.example.org/debian-security",
            "deb.example.org",
            "debian-security",
            dir.path(),
            &pkg,
        )
        .await
        .unwrap();
        assert_eq!(result, pool_dir.join("apt.deb"));
    }
}
