// (c) 2025 Ross Younger

//! Whole-file conveniences layered on the session
//!
//! These wire the streaming handles to the local filesystem and add the
//! retry-on-timeout policy for downloads. FSP has no partial-file resume,
//! so a stalled download starts again from offset zero with a fresh
//! destination file.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::PAYLOAD_SPACE;
use crate::session::Session;

fn local_io(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::LocalIo {
        path: path.to_path_buf(),
        source,
    }
}

/// Base name of an FSP path.
fn remote_base(remote: &str) -> &str {
    remote.rsplit('/').next().unwrap_or(remote)
}

impl Session {
    /// Downloads `remote` to `local`, restarting from scratch up to
    /// `retries` times if the transfer times out.
    ///
    /// `local` may be an existing directory (or end in a path separator), in
    /// which case the remote base name is appended. Parent directories are
    /// created as needed.
    pub async fn download_file(
        &mut self,
        remote: &str,
        local: impl AsRef<Path>,
        retries: u32,
    ) -> Result<()> {
        let info = self.stat(remote).await?;
        let dest = resolve_destination(remote, local.as_ref());
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(local_io(&dest))?;
        }
        self.start_transfer(u64::try_from(info.size()).unwrap_or(0));
        let mut remaining = retries;
        loop {
            match self.fetch_to(remote, &dest).await {
                Ok(()) => break,
                Err(e) if e.is_timeout() && remaining > 0 => {
                    remaining -= 1;
                    debug!("download of {remote} stalled, restarting ({remaining} retries left)");
                }
                Err(e) => return Err(e),
            }
        }
        self.finish_transfer();
        Ok(())
    }

    /// One complete transfer attempt: (re)create the destination and stream
    /// the remote file into it.
    async fn fetch_to(&mut self, remote: &str, dest: &Path) -> Result<()> {
        let mut out = tokio::fs::File::create(dest)
            .await
            .map_err(local_io(dest))?;
        let mut reader = self.open_read(remote)?;
        let mut buf = vec![0u8; PAYLOAD_SPACE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await.map_err(local_io(dest))?;
        }
        out.flush().await.map_err(local_io(dest))?;
        Ok(())
    }

    /// Uploads the local file at `local` to `remote`.
    ///
    /// An empty `remote`, or one ending in `/`, takes the local base name.
    pub async fn upload_file(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<()> {
        let local = local.as_ref();
        let base = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Argument(format!("no file name in {}", local.display())))?;
        let remote = if remote.is_empty() {
            base.to_string()
        } else if remote.ends_with('/') {
            format!("{remote}{base}")
        } else {
            remote.to_string()
        };
        debug!("uploading {} to {remote}", local.display());
        let mut source = tokio::fs::File::open(local).await.map_err(local_io(local))?;
        let mut writer = self.open_write(&remote)?;
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match source.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return Err(local_io(local)(e)),
            };
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
        }
        writer.close().await
    }

    /// Primes the transfer meter for a transfer of `total` bytes.
    pub fn start_transfer(&mut self, total: u64) {
        self.meter.start(total);
    }

    /// Emits the closing throughput line for the current transfer.
    pub fn finish_transfer(&self) {
        self.meter.finish();
    }
}

/// Where a download should land: into a directory when the target looks
/// like one, at the named path otherwise.
fn resolve_destination(remote: &str, local: &Path) -> PathBuf {
    if local.as_os_str().is_empty() {
        return PathBuf::from(remote_base(remote));
    }
    let looks_like_dir = local
        .to_str()
        .is_some_and(|s| s.ends_with(std::path::MAIN_SEPARATOR) || s.ends_with('/'));
    if looks_like_dir || local.is_dir() {
        local.join(remote_base(remote))
    } else {
        local.to_path_buf()
    }
}
