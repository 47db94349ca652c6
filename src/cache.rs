//! Content-addressed disk cache for repository files, keyed by host+path.
//!
//! Mirrors the conditional-GET pattern the teacher already uses for its
//! cross-site database sync (`sync.rs`'s `If-None-Match`/`ETag` dance), but
//! keyed on `If-Modified-Since`/`Date` per §4.2, and generalized from "one
//! well-known file" to "any repository-relative path".

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::debug;
use reqwest::StatusCode;
use tempfile::NamedTempFile;
use tokio::task::spawn_blocking;

use crate::http::Fetcher;

pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskCache { root: root.into() }
    }

    pub fn path_for(&self, host: &str, path: &str) -> PathBuf {
        self.root.join(host).join(path.trim_start_matches('/'))
    }

    /// Fetches `url` (whose repository-relative identity is `host`/`path`),
    /// consulting and updating the on-disk cache.
    pub async fn fetch(
        &self,
        fetcher: &mut Fetcher,
        host: &str,
        path: &str,
        url: &str,
    ) -> Result<Vec<u8>> {
        let destination = self.path_for(host, path);

        let if_modified_since = match tokio::fs::metadata(&destination).await {
            Ok(meta) => {
                let mtime = meta.modified()?;
                Some(httpdate::fmt_http_date(mtime))
            }
            Err(_) => None,
        };

        let resp = fetcher
            .get_checked(url, if_modified_since.as_deref())
            .await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            debug!("HTTP 304 for {}, using cached copy", url);
            let bytes = tokio::fs::read(&destination)
                .await
                .with_context(|| format!("reading cached {}", destination.display()))?;
            return Ok(bytes);
        }

        let date_header = resp
            .header_str("date")
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("200 response for {} has no Date header", url))?;
        let bytes = resp.bytes().await?.to_vec();

        let dir = destination
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cache path has no parent: {}", destination.display()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mtime_secs = httpdate::parse_http_date(&date_header)?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        spawn_blocking(move || -> Result<()> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            std::io::Write::write_all(&mut tmp, &bytes)?;
            tmp.persist(&destination)?;
            let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(mtime_secs);
            filetime::set_file_mtime(&destination, filetime::FileTime::from_system_time(mtime))?;
            Ok(())
        })
        .await??;

        Ok(tokio::fs::read(&self.path_for(host, path)).await?)
    }
}
