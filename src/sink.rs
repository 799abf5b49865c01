//! Write destinations for downloaded bodies.
//!
//! A [`SinkHandle`] is either a discard target or a `.part` file that is
//! promoted to its final name on [`commit`](SinkHandle::commit) and removed on
//! [`rollback`](SinkHandle::rollback). A handle moves through
//! open → closed → committed | rolled back exactly once; every download attempt
//! opens a fresh one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};

/// Write buffer size for file sinks.
const WRITE_BUFFER_SIZE: usize = 1 << 20;

/// Returns the `.part` path for a given final path.
#[must_use]
pub fn part_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Lifecycle state of a [`SinkHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Accepting writes.
    Open,
    /// Writer flushed and closed; no further writes.
    Closed,
    /// Final artifact is in place.
    Committed,
    /// Temporary artifact has been removed.
    RolledBack,
}

enum Target<'a, F: FileSystem + ?Sized> {
    Discard,
    File {
        fs: &'a F,
        final_path: PathBuf,
        part_path: PathBuf,
        writer: Option<BufWriter<tokio::fs::File>>,
    },
}

/// One in-flight write target.
pub struct SinkHandle<'a, F: FileSystem + ?Sized = TokioFileSystem> {
    target: Target<'a, F>,
    state: SinkState,
}

impl<'a, F: FileSystem + ?Sized> SinkHandle<'a, F> {
    /// Opens a sink that drops everything written to it.
    #[must_use]
    pub const fn open_discard() -> Self {
        Self {
            target: Target::Discard,
            state: SinkState::Open,
        }
    }

    /// Opens `{dir}/{name}.part` for writing, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filesystem`] if the directory cannot be created or the
    /// temporary file cannot be opened.
    pub async fn open_file(fs: &'a F, dir: &Path, name: &str) -> Result<Self> {
        fs.create_dir_all(dir)
            .await
            .map_err(|e| Error::filesystem(dir, e))?;

        let final_path = dir.join(name);
        let part_path = part_path(&final_path);
        let file = fs
            .create_file(&part_path)
            .await
            .map_err(|e| Error::filesystem(&part_path, e))?;

        Ok(Self {
            target: Target::File {
                fs,
                final_path,
                part_path,
                writer: Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file)),
            },
            state: SinkState::Open,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SinkState {
        self.state
    }

    /// Returns true for discard sinks.
    #[must_use]
    pub const fn is_discard(&self) -> bool {
        matches!(self.target, Target::Discard)
    }

    /// Final artifact path, or `None` for discard sinks.
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        match &self.target {
            Target::Discard => None,
            Target::File { final_path, .. } => Some(final_path),
        }
    }

    /// Temporary artifact path, or `None` for discard sinks.
    #[must_use]
    pub fn temp_path(&self) -> Option<&Path> {
        match &self.target {
            Target::Discard => None,
            Target::File { part_path, .. } => Some(part_path),
        }
    }

    fn error_path(&self) -> PathBuf {
        self.temp_path()
            .map_or_else(|| PathBuf::from("<discard>"), Path::to_path_buf)
    }

    fn state_error(&self, what: &str) -> Error {
        Error::filesystem(
            self.error_path(),
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("cannot {what}: sink is {:?}", self.state),
            ),
        )
    }

    /// Appends `buf` to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filesystem`] if the sink is not open or the write fails.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.state != SinkState::Open {
            return Err(self.state_error("write"));
        }
        match &mut self.target {
            Target::Discard => Ok(()),
            Target::File {
                part_path, writer, ..
            } => match writer.as_mut() {
                Some(w) => w
                    .write_all(buf)
                    .await
                    .map_err(|e| Error::filesystem(part_path.as_path(), e)),
                None => Err(Error::filesystem(
                    part_path.as_path(),
                    std::io::Error::new(ErrorKind::InvalidInput, "writer already closed"),
                )),
            },
        }
    }

    /// Flushes and closes the writer. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filesystem`] if flushing or syncing the file fails.
    /// The handle is closed either way.
    pub async fn close(&mut self) -> Result<()> {
        if self.state != SinkState::Open {
            return Ok(());
        }
        self.state = SinkState::Closed;
        if let Target::File {
            part_path, writer, ..
        } = &mut self.target
            && let Some(mut w) = writer.take()
        {
            w.flush()
                .await
                .map_err(|e| Error::filesystem(part_path.as_path(), e))?;
            w.into_inner()
                .sync_all()
                .await
                .map_err(|e| Error::filesystem(part_path.as_path(), e))?;
        }
        Ok(())
    }

    /// Promotes the temporary artifact to its final name, closing first if
    /// the handle is still open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filesystem`] if closing or renaming fails, or if the
    /// handle was already rolled back. After a failed commit the handle can
    /// still be rolled back.
    pub async fn commit(&mut self) -> Result<()> {
        match self.state {
            SinkState::Committed => return Ok(()),
            SinkState::RolledBack => return Err(self.state_error("commit")),
            SinkState::Open => self.close().await?,
            SinkState::Closed => {}
        }
        if let Target::File {
            fs,
            final_path,
            part_path,
            ..
        } = &self.target
        {
            fs.rename_file(part_path, final_path)
                .await
                .map_err(|e| Error::filesystem(final_path.as_path(), e))?;
        }
        self.state = SinkState::Committed;
        Ok(())
    }

    /// Discards the temporary artifact. A temp file that is already gone
    /// counts as success; rolling back a committed handle changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Filesystem`] if the temp file exists but cannot be removed.
    pub async fn rollback(&mut self) -> Result<()> {
        match self.state {
            SinkState::Committed | SinkState::RolledBack => return Ok(()),
            SinkState::Open | SinkState::Closed => {}
        }
        self.state = SinkState::Closed;
        if let Target::File {
            fs,
            part_path,
            writer,
            ..
        } = &mut self.target
        {
            drop(writer.take());
            match fs.remove_file(part_path.as_path()).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::filesystem(part_path.as_path(), e)),
            }
        }
        self.state = SinkState::RolledBack;
        Ok(())
    }
}

impl<F: FileSystem + ?Sized> Drop for SinkHandle<'_, F> {
    fn drop(&mut self) {
        if matches!(self.state, SinkState::Committed | SinkState::RolledBack) {
            return;
        }
        // Reached when an attempt future is dropped mid-flight (cancellation).
        // Drop cannot await, and the temp file must be gone once the handle
        // is; a single unlink on the runtime thread is the accepted cost.
        if let Target::File {
            part_path, writer, ..
        } = &mut self.target
        {
            drop(writer.take());
            if let Err(e) = std::fs::remove_file(&*part_path)
                && e.kind() != ErrorKind::NotFound
            {
                log::warn!("Failed to remove {}: {e}", part_path.display());
            }
        }
    }
}

impl<F: FileSystem + ?Sized> std::fmt::Debug for SinkHandle<'_, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("destination", &self.destination())
            .field("state", &self.state)
            .finish()
    }
}
