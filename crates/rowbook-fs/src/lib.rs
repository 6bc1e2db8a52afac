//! Disk helpers for rowbook workbooks.
//!
//! Workbooks are replaced whole: bytes are staged in a hidden temp file next to the
//! destination, synced, then persisted over the old file in one rename. Readers either see
//! the previous workbook or the new one, never a truncated zip.
//!
//! The sidecar and backup naming (`<name>.data.xlsx`, `<name>.bak.<millis>`) also lives here so
//! the store and the CLI agree on where derived files go.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const STAGING_PREFIX: &str = ".rowbook-";
const STAGING_SUFFIX: &str = ".tmp";

/// Failure from [`atomic_write`], keeping the caller's own error type intact.
#[derive(Debug, thiserror::Error)]
pub enum AtomicWriteError<E> {
    #[error("could not stage or replace the file: {0}")]
    Io(#[from] io::Error),
    #[error("could not produce the file contents: {0}")]
    Writer(#[source] E),
}

/// Directory a staging file for `dest` must live in so the final rename stays on one device.
fn staging_dir(dest: &Path) -> &Path {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Replace `dest` with whatever `write_fn` puts into a fresh file.
///
/// Missing parent directories are created. When `write_fn` fails the staged file is discarded
/// and `dest` keeps its previous contents.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>> {
    let dest = dest.as_ref();
    let dir = staging_dir(dest);
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)?;
    let value = write_fn(staged.as_file_mut()).map_err(AtomicWriteError::Writer)?;

    let file = staged.as_file_mut();
    file.flush()?;
    file.sync_all()?;

    // `persist` renames with replace semantics on every platform and removes the staged
    // file if the rename fails.
    staged.persist(dest).map_err(|err| err.error)?;
    sync_dir(dir);

    log::debug!("replaced {}", dest.display());
    Ok(value)
}

/// [`atomic_write`] for contents that are already in memory.
pub fn atomic_write_bytes(dest: impl AsRef<Path>, bytes: &[u8]) -> io::Result<()> {
    match atomic_write(dest, |file| file.write_all(bytes)) {
        Ok(()) => Ok(()),
        Err(AtomicWriteError::Io(err) | AtomicWriteError::Writer(err)) => Err(err),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    // The rename already happened; a directory that refuses fsync is not a failed write.
    if let Err(err) = File::open(dir).and_then(|handle| handle.sync_all()) {
        log::debug!("directory sync skipped for {}: {err}", dir.display());
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// `book.xlsm` + `.data.xlsx` gives `book.xlsm.data.xlsx`, in the same directory.
pub fn sibling_path_with_suffix(path: impl AsRef<Path>, suffix: &str) -> PathBuf {
    let path = path.as_ref();
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn mtime(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Whether `derived` exists and its mtime is not older than `source`'s.
///
/// A missing `derived` is simply stale. A missing `source` is an error.
pub fn is_at_least_as_new(derived: &Path, source: &Path) -> io::Result<bool> {
    let source_time = mtime(source)?;
    match mtime(derived) {
        Ok(derived_time) => Ok(derived_time >= source_time),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Copy `path` to `<path>.bak.<unix-millis>` and return where the copy went.
pub fn backup_copy(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let path = path.as_ref();
    let stamp = chrono::Utc::now().timestamp_millis();
    let backup = sibling_path_with_suffix(path, &format!(".bak.{stamp}"));
    fs::copy(path, &backup)?;
    log::info!("backed up {} to {}", path.display(), backup.display());
    Ok(backup)
}
