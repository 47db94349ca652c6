use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info};
use tempfile::NamedTempFile;
use tokio::task::block_in_place;

mod archive;
mod cache;
mod cli;
mod compress;
mod config;
mod download;
mod error;
mod fsmodel;
mod http;
mod index;
mod outfilter;
mod parser;
mod release;
mod resolve;
mod runtime;
mod script;
mod tarwriter;
mod verify;

use cache::DiskCache;
use config::DistributionSpec;
use http::Fetcher;
use index::PackageRecord;

/// Everything the build reads from or writes to disk lives under here:
/// repository files and `.deb`s at `<CACHE_ROOT>/<host>/...`; the final
/// image lands at `root.tar` in the working directory, per `spec.md` §6.
const CACHE_ROOT: &str = "cache";

/// Formats a duration the way the original debootstrap driver's
/// `pretty_time` does for its per-phase `Timer` instrumentation: µs below
/// a millisecond, ms below a second, s otherwise.
fn pretty_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 0.001 {
        format!("{:.2} \u{b5}s", secs * 1_000_000.0)
    } else if secs < 1.0 {
        format!("{:.2} ms", secs * 1_000.0)
    } else {
        format!("{:.2} s", secs)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args: cli::Rootstrap = argh::from_env();

    let spec = config::load_definition(&args.name)?;
    let digest = build_image(&spec).await?;
    println!("sha256:{}", digest);

    Ok(())
}

/// Fetches every configured suite's index concurrently (one worker per
/// suite, per `spec.md` §5), then merges them in suite order so a later
/// suite's records overwrite an earlier one's under the same package name.
async fn fetch_merged_index(
    spec: &DistributionSpec,
    cache: &Arc<DiskCache>,
) -> Result<HashMap<String, PackageRecord>> {
    let keyring_path = spec.keyring_path();
    let mut tasks = Vec::with_capacity(spec.suites.len());

    for suite in &spec.suites {
        let cache = cache.clone();
        let keyring_path = keyring_path.clone();
        let archive_url = spec.archive_url.clone();
        let suite = suite.clone();
        let architecture = spec.architecture.clone();

        tasks.push(tokio::spawn(async move {
            let mut fetcher = Fetcher::new()?;
            let mut repo =
                release::get_release_fetcher(&mut fetcher, &cache, &keyring_path, &archive_url, &suite)
                    .await
                    .with_context(|| format!("authenticating suite {}", suite))?;
            index::fetch_suite_index(&mut repo, &architecture)
                .await
                .with_context(|| format!("fetching package index for suite {}", suite))
        }));
    }

    let mut merged = HashMap::new();
    for task in tasks {
        let suite_index = task.await.context("joining suite index task")??;
        index::merge_index(&mut merged, suite_index);
    }

    Ok(merged)
}

async fn build_image(spec: &DistributionSpec) -> Result<String> {
    let cache = Arc::new(DiskCache::new(CACHE_ROOT));

    info!("Fetching package indices for {} suite(s)", spec.suites.len());
    let packages = fetch_merged_index(spec, &cache).await?;
    info!("{} package(s) known across all suites", packages.len());

    let closure = resolve::resolve_closure(&packages);
    info!("{} package(s) in the resolved closure", closure.len());

    let (host, archive_path, base_url) = release::archive_authority(&spec.archive_url)?;
    info!("Downloading {} package(s)", closure.len());
    let deb_paths = download::download_all(
        &base_url,
        &host,
        &archive_path,
        Path::new(CACHE_ROOT),
        &closure,
    )
    .await?;

    info!("Assembling filesystem from {} unpacked package(s)", deb_paths.len());
    let init_script = script::render_init_script(&spec.archive_url, &spec.suites)?;
    let fs = block_in_place(|| -> Result<fsmodel::Filesystem> {
        let mut fs = fsmodel::Filesystem::new();
        fs.seed(init_script)?;
        for deb in &deb_paths {
            archive::unpack_package(&mut fs, deb)
                .with_context(|| format!("unpacking {}", deb.display()))?;
        }
        Ok(fs)
    })?;

    info!("Writing deterministic tar");
    let write_started = Instant::now();
    let tar_bytes = block_in_place(|| -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        tarwriter::write_deterministic_tar(&fs, &mut buf)?;
        Ok(buf)
    })?;
    debug!("tar writing took {}", pretty_duration(write_started.elapsed()));

    info!("Importing image into container runtime");
    let image_id = runtime::import_image(&tar_bytes).await?;

    info!("Running second stage");
    let container_id = runtime::run_second_stage(&image_id).await?;

    info!("Exporting filesystem and filtering output");
    let export_bytes = runtime::export_filesystem(&container_id).await?;

    let filter_started = Instant::now();
    let digest = block_in_place(|| -> Result<String> {
        let mut tmp = NamedTempFile::new_in(".").context("creating temporary root.tar")?;
        let digest = outfilter::filter_exported_tar(&export_bytes, &fs, &mut tmp)?;
        tmp.persist("root.tar").context("installing root.tar")?;
        Ok(digest)
    })?;
    debug!("output filtering took {}", pretty_duration(filter_started.elapsed()));

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_duration_picks_the_right_unit() {
        assert!(pretty_duration(Duration::from_micros(5)).ends_with("\u{b5}s"));
        assert!(pretty_duration(Duration::from_millis(5)).ends_with("ms"));
        assert!(pretty_duration(Duration::from_secs(5)).ends_with(" s"));
    }
}
