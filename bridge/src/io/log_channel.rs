//! Watermark-tracked reader for the shared completion log.
//!
//! The agent appends to the file; the bridge only reads bytes past its
//! watermark, so every byte is reported at most once. The file is written by
//! the bridge only in [`LogChannel::reset`].

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Upper bound on bytes returned by one poll; the rest is read next time.
const MAX_POLL_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug)]
pub struct LogChannel {
    path: PathBuf,
    watermark: u64,
    parent_ready: bool,
}

impl LogChannel {
    /// Channel starting at offset 0. Does not touch the filesystem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            watermark: 0,
            parent_ready: false,
        }
    }

    /// Channel whose watermark starts at the file's current end, so content
    /// already present can never be reported.
    pub fn attach_at_end(path: impl Into<PathBuf>) -> Result<Self> {
        let mut channel = Self::new(path);
        channel.watermark = match fs::metadata(&channel.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("stat log channel {}", channel.path.display()));
            }
        };
        debug!(path = %channel.path.display(), watermark = channel.watermark, "attached at end");
        Ok(channel)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Truncate the backing file if it exists and rewind the watermark.
    ///
    /// Idempotent. A missing file (or missing parent directory) is fine and
    /// nothing is created.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn reset(&mut self) -> Result<()> {
        match OpenOptions::new().write(true).truncate(true).open(&self.path) {
            Ok(_) => debug!("truncated log channel"),
            Err(err) if err.kind() == ErrorKind::NotFound => debug!("log channel absent"),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("truncate log channel {}", self.path.display()));
            }
        }
        self.watermark = 0;
        Ok(())
    }

    /// Return bytes appended since the last poll, advancing the watermark.
    ///
    /// An absent file yields nothing (the parent directory is created so the
    /// agent can append). A file that shrank below the watermark was replaced
    /// or truncated by someone else; reading restarts from offset 0.
    pub fn poll_once(&mut self) -> Result<Vec<u8>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.ensure_parent()?;
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("open log channel {}", self.path.display()));
            }
        };
        let meta = file
            .metadata()
            .with_context(|| format!("stat log channel {}", self.path.display()))?;
        if !meta.is_file() {
            return Err(anyhow!(
                "log channel {} is not a regular file",
                self.path.display()
            ));
        }

        let len = meta.len();
        if len < self.watermark {
            warn!(
                path = %self.path.display(),
                len,
                watermark = self.watermark,
                "log channel shrank, rereading from start"
            );
            self.watermark = 0;
        }
        if len == self.watermark {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.watermark))
            .with_context(|| format!("seek log channel {}", self.path.display()))?;
        let want = (len - self.watermark).min(MAX_POLL_BYTES);
        let mut buf = Vec::with_capacity(usize::try_from(want).unwrap_or(0));
        file.take(want)
            .read_to_end(&mut buf)
            .with_context(|| format!("read log channel {}", self.path.display()))?;
        // Advance only by what was actually read; a short read is finished next poll.
        self.watermark += buf.len() as u64;
        debug!(read = buf.len(), watermark = self.watermark, "log channel grew");
        Ok(buf)
    }

    fn ensure_parent(&mut self) -> Result<()> {
        if self.parent_ready {
            return Ok(());
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log channel dir {}", parent.display()))?;
        }
        self.parent_ready = true;
        Ok(())
    }
}
