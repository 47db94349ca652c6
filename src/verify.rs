//! Adapter over the external `gpgv` signature verifier, per §4.3.
//!
//! The verifier needs a signature and a signed-content stream that stay
//! open until it reads them, while the parent must close its own ends to
//! avoid deadlocking on a pipe whose reader is waiting for EOF. This is the
//! same fd-forwarding problem `containers-bootc`'s `cmdext.rs` solves for
//! `skopeo`/`container-image-proxy`, via an unsafe `pre_exec` + `dup2`
//! closure; this module does the same thing directly rather than pulling
//! in a generic trait for a single call site.

use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use log::debug;
use nix::unistd::{close, dup2, pipe};
use std::os::fd::IntoRawFd;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::BuildError;

const STATUS_PREFIX: &str = "[GNUPG:] ";
const SIG_TARGET_FD: i32 = 3;
const CONTENT_TARGET_FD: i32 = 4;

/// Forwards `source_fd` into the child as `target_fd`, leaking it across
/// the exec (the child's copy is what the verifier reads from).
fn forward_fd(cmd: &mut std::process::Command, source_fd: i32, target_fd: i32) {
    unsafe {
        cmd.pre_exec(move || {
            dup2(source_fd, target_fd).map_err(std::io::Error::from)?;
            Ok(())
        });
    }
}

async fn write_and_close(fd: i32, payload: &[u8]) -> Result<()> {
    use std::os::unix::io::FromRawFd;
    let file = unsafe { std::fs::File::from_raw_fd(fd) };
    let mut file = tokio::fs::File::from_std(file);
    file.write_all(payload).await?;
    file.flush().await?;
    // dropping `file` here closes the fd
    Ok(())
}

/// Verifies `signature` over `content` using the keyring at `keyring_path`.
///
/// `name` is used only for log context (it names the file being verified,
/// e.g. a suite's `Release`).
pub async fn gpg_verify(keyring_path: &Path, name: &str, signature: &[u8], content: &[u8]) -> Result<()> {
    let (sig_r, sig_w) = pipe().context("creating signature pipe")?;
    let (cont_r, cont_w) = pipe().context("creating content pipe")?;
    let (sig_r, sig_w) = (sig_r.into_raw_fd(), sig_w.into_raw_fd());
    let (cont_r, cont_w) = (cont_r.into_raw_fd(), cont_w.into_raw_fd());

    let mut cmd = std::process::Command::new("gpgv");
    cmd.arg("-q")
        .arg("--status-fd")
        .arg("1")
        .arg("--keyring")
        .arg(keyring_path)
        .arg(format!("/dev/fd/{}", SIG_TARGET_FD))
        .arg(format!("/dev/fd/{}", CONTENT_TARGET_FD))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    forward_fd(&mut cmd, sig_r, SIG_TARGET_FD);
    forward_fd(&mut cmd, cont_r, CONTENT_TARGET_FD);

    let mut cmd = Command::from(cmd);
    cmd.kill_on_drop(true);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(BuildError::VerifierMissing.into())
        }
        Err(err) => return Err(err).context("spawning gpgv"),
    };

    // The child has its own copies of the read ends now; the parent's
    // must be closed so that closing the write ends below is actually
    // observed as EOF by gpgv rather than kept alive by our dangling fds.
    close(sig_r).ok();
    close(cont_r).ok();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("gpgv stdout was not piped"))?;

    let (write_result, sig_info) = tokio::join!(
        async {
            let sig = write_and_close(sig_w, signature).await;
            let cont = write_and_close(cont_w, content).await;
            sig.and(cont)
        },
        parse_status_stream(stdout),
    );
    write_result.context("writing to gpgv")?;

    let status = child.wait().await.context("waiting for gpgv")?;
    debug!("gpgv for '{}' exited with {}", name, status);

    match sig_info? {
        Some(info) => {
            debug!("gpg verification succeeded for '{}': {:?}", name, info.keys().collect::<Vec<_>>());
            Ok(())
        }
        None => Err(BuildError::VerificationFailed {
            name: name.to_string(),
        }
        .into()),
    }
}

type StatusAccumulator = HashMap<String, String>;

fn both_present(acc: &StatusAccumulator) -> bool {
    acc.contains_key("GOODSIG") && acc.contains_key("VALIDSIG")
}

/// Parses the `--status-fd` stream per §4.3's NEWSIG-boundary rule: at each
/// `NEWSIG`, if the accumulator built so far satisfies both GOODSIG and
/// VALIDSIG, that accumulator is the verified result (an *earlier*
/// accumulator can win this way even if a later one doesn't qualify). The
/// same check runs once more after the stream ends.
async fn parse_status_stream<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
) -> Result<Option<StatusAccumulator>> {
    let mut lines = BufReader::new(reader).lines();
    let mut acc: StatusAccumulator = HashMap::new();
    let mut satisfied: Option<StatusAccumulator> = None;

    while let Some(line) = lines.next_line().await? {
        let Some(op) = line.strip_prefix(STATUS_PREFIX) else {
            continue;
        };

        if op == "NEWSIG" {
            if both_present(&acc) {
                satisfied = Some(std::mem::take(&mut acc));
            }
            acc.clear();
            continue;
        }

        if let Some((opcode, rest)) = op.split_once(' ') {
            acc.insert(opcode.to_string(), rest.to_string());
        } else {
            acc.insert(op.to_string(), String::new());
        }
    }

    if both_present(&acc) {
        satisfied = Some(acc);
    }

    Ok(satisfied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_reader(lines: &[&str]) -> impl tokio::io::AsyncRead + Unpin {
        std::io::Cursor::new(lines.join("\n").into_bytes())
    }

    #[tokio::test]
    async fn final_accumulator_wins_when_it_satisfies_both() {
        let reader = lines_reader(&[
            "[GNUPG:] NEWSIG",
            "[GNUPG:] GOODSIG 0123 Example <e@example.com>",
            "[GNUPG:] VALIDSIG abcd",
        ]);
        let result = parse_status_stream(reader).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn earlier_accumulator_wins_at_newsig_boundary() {
        let reader = lines_reader(&[
            "[GNUPG:] NEWSIG",
            "[GNUPG:] GOODSIG 0123 Example <e@example.com>",
            "[GNUPG:] VALIDSIG abcd",
            "[GNUPG:] NEWSIG",
            "[GNUPG:] GOODSIG 4567 Other <o@example.com>",
        ]);
        let result = parse_status_stream(reader).await.unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap()["GOODSIG"], "0123 Example <e@example.com>");
    }

    #[tokio::test]
    async fn unsatisfied_stream_fails() {
        let reader = lines_reader(&["[GNUPG:] NEWSIG", "[GNUPG:] GOODSIG 0123"]);
        let result = parse_status_stream(reader).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn non_status_lines_are_ignored() {
        let reader = lines_reader(&[
            "gpgv: Signature made Mon Jan  1 00:00:00 2024 UTC",
            "[GNUPG:] NEWSIG",
            "[GNUPG:] GOODSIG 0123",
            "[GNUPG:] VALIDSIG abcd",
        ]);
        let result = parse_status_stream(reader).await.unwrap();
        assert!(result.is_some());
    }
}
