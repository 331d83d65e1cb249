// src/archive.rs

//! Tar and tar.gz creation for build contexts.
//!
//! Every write goes through [`CancelableWriter`]: once the token fires, the
//! next write fails and nothing more reaches the underlying writer.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{Result, RolloutError};

/// Writer that refuses to write once `cancel` has fired.
pub struct CancelableWriter<W> {
    inner: W,
    cancel: CancellationToken,
}

impl<W: Write> CancelableWriter<W> {
    pub fn new(inner: W, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CancelableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("archive write cancelled"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("archive write cancelled"));
        }
        self.inner.flush()
    }
}

/// Write an uncompressed tar of `paths` (relative to `root`, or absolute
/// below it) to `w`.
pub fn create_tar<W: Write>(
    cancel: &CancellationToken,
    w: W,
    root: &Path,
    paths: &[PathBuf],
) -> Result<()> {
    let out = CancelableWriter::new(w, cancel.clone());
    let mut builder = tar::Builder::new(out);
    builder.follow_symlinks(false);

    info!(files = paths.len(), root = %root.display(), "creating tar");
    append_paths(cancel, &mut builder, root, paths)?;
    builder.into_inner().map_err(|e| io_error(cancel, e))?;
    Ok(())
}

/// [`create_tar`] through a gzip encoder.
pub fn create_tar_gz<W: Write>(
    cancel: &CancellationToken,
    w: W,
    root: &Path,
    paths: &[PathBuf],
) -> Result<()> {
    let out = CancelableWriter::new(w, cancel.clone());
    let mut gz = GzEncoder::new(out, Compression::default());
    create_tar(cancel, &mut gz, root, paths)?;
    gz.finish().map_err(|e| io_error(cancel, e))?;
    Ok(())
}

fn append_paths<W: Write>(
    cancel: &CancellationToken,
    builder: &mut tar::Builder<W>,
    root: &Path,
    paths: &[PathBuf],
) -> Result<()> {
    let batch = (paths.len() / 10).max(5);
    for (i, path) in paths.iter().enumerate() {
        let full = root.join(path);
        let rel = full.strip_prefix(root).unwrap_or(path.as_path());
        let name = slash_name(rel);
        add_entry(cancel, builder, &full, &name)?;

        if (i + 1) % batch == 0 {
            debug!(added = i + 1, total = paths.len(), "tar progress");
        }
    }
    Ok(())
}

fn add_entry<W: Write>(
    cancel: &CancellationToken,
    builder: &mut tar::Builder<W>,
    src: &Path,
    name: &str,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RolloutError::Cancelled);
    }

    let meta = fs::symlink_metadata(src)?;
    let file_type = meta.file_type();

    if is_socket(&file_type) {
        debug!(path = %src.display(), "skipping socket");
        return Ok(());
    }

    if file_type.is_symlink() {
        let target = fs::read_link(src)?;
        if target.is_absolute() {
            warn!(path = %src.display(), "skipping symlink; only relative symlinks are supported");
            return Ok(());
        }
    }

    if file_type.is_dir() {
        builder
            .append_dir(name, src)
            .map_err(|e| io_error(cancel, e))?;
    } else {
        builder
            .append_path_with_name(src, name)
            .map_err(|e| io_error(cancel, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn is_socket(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_socket()
}

#[cfg(not(unix))]
fn is_socket(_file_type: &fs::FileType) -> bool {
    false
}

fn slash_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn io_error(cancel: &CancellationToken, err: io::Error) -> RolloutError {
    if cancel.is_cancelled() {
        RolloutError::Cancelled
    } else {
        RolloutError::IoError(err)
    }
}
