//! Container runtime bridge, per §4.10.
//!
//! `start`'s stdout and stderr are merged onto one pipe by duplicating a
//! single write end into both child descriptors before spawning (the same
//! trick the original debootstrap driver uses by handing one file object to
//! both `stdout=` and `stderr=`), rather than the `pre_exec`+`dup2` approach
//! `verify.rs` uses for `gpgv` — here there's no second payload descriptor
//! to juggle, just the one combined stream.

use std::os::fd::{FromRawFd, IntoRawFd};
use std::process::Stdio as StdStdio;

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use nix::fcntl::{fcntl, FcntlArg};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Command, Stdio};

use crate::error::BuildError;

const RUNTIME_BIN: &str = "docker";

fn runtime_command(args: &[&str]) -> Command {
    let mut cmd = Command::new(RUNTIME_BIN);
    cmd.args(args);
    cmd.kill_on_drop(true);
    cmd
}

/// Opens a pipe and duplicates its write end, returning a `Stdio` for each
/// child descriptor plus a tokio-wrapped reader for the single shared read
/// end.
fn merged_output_pipe() -> Result<(Stdio, Stdio, tokio::fs::File)> {
    let (read_fd, write_fd) = nix::unistd::pipe().context("creating combined output pipe")?;
    let read_fd = read_fd.into_raw_fd();
    let write_fd = write_fd.into_raw_fd();
    let write_fd2 = fcntl(write_fd, FcntlArg::F_DUPFD(0)).context("duplicating output pipe write end")?;

    let stdout = unsafe { Stdio::from(StdStdio::from_raw_fd(write_fd)) };
    let stderr = unsafe { Stdio::from(StdStdio::from_raw_fd(write_fd2)) };
    let reader = tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(read_fd) });

    Ok((stdout, stderr, reader))
}

/// `import -`: feeds `tar_stream` on stdin, returns the resulting image id.
pub async fn import_image(tar_stream: &[u8]) -> Result<String> {
    let mut cmd = runtime_command(&["import", "-"]);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    let mut child = cmd.spawn().context("spawning runtime import")?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("runtime import stdin was not piped"))?;

    let (write_result, output) = tokio::join!(
        async {
            stdin.write_all(tar_stream).await?;
            stdin.flush().await?;
            drop(stdin);
            Ok::<(), std::io::Error>(())
        },
        child.wait_with_output(),
    );
    write_result.context("streaming tar into runtime import")?;
    let output = output.context("waiting for runtime import")?;

    if !output.status.success() {
        return Err(BuildError::RuntimeFailed {
            stage: "import",
            status: output.status.code(),
        }
        .into());
    }

    let image_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    info!("imported base image {}", image_id);
    Ok(image_id)
}

/// `create --net=none <image_id> /init` then `start -a <container_id>`,
/// dumping the merged stdout+stderr to `error!` only on failure. Returns the
/// container id so the caller can `export` it afterward.
pub async fn run_second_stage(image_id: &str) -> Result<String> {
    let create_output = runtime_command(&["create", "--net=none", image_id, "/init"])
        .output()
        .await
        .context("spawning runtime create")?;
    if !create_output.status.success() {
        return Err(BuildError::RuntimeFailed {
            stage: "create",
            status: create_output.status.code(),
        }
        .into());
    }
    let container_id = String::from_utf8_lossy(&create_output.stdout).trim().to_string();

    let (stdout, stderr, mut reader) = merged_output_pipe()?;
    let mut cmd = runtime_command(&["start", "-a", container_id.as_str()]);
    cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
    let mut child = cmd.spawn().context("spawning runtime start")?;

    let mut combined = Vec::new();
    let (read_result, status) = tokio::join!(reader.read_to_end(&mut combined), child.wait());
    read_result.context("reading second-stage combined output")?;
    let status = status.context("waiting for runtime start")?;

    if !status.success() {
        error!(
            "second stage failed in {}, dumping combined output:\n{}",
            container_id,
            String::from_utf8_lossy(&combined)
        );
        return Err(BuildError::RuntimeFailed {
            stage: "start",
            status: status.code(),
        }
        .into());
    }

    Ok(container_id)
}

/// `export <container_id>`, returning the resulting tar stream in full.
pub async fn export_filesystem(container_id: &str) -> Result<Vec<u8>> {
    let output = runtime_command(&["export", container_id])
        .output()
        .await
        .context("running runtime export")?;

    if !output.status.success() {
        return Err(BuildError::RuntimeFailed {
            stage: "export",
            status: output.status.code(),
        }
        .into());
    }

    Ok(output.stdout)
}
