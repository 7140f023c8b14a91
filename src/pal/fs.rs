//! `FS`: POSIX-style file and directory operations, plus the zero-copy
//! file-to-socket primitive used by the RETR fast path. Grounded in
//! spec.md §4's PAL layer and §4.3.5's zero-copy pipeline.

use crate::error::{Error, ErrorKind};
use crate::pal::Caps;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::SystemTime;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Metadata needed to answer SIZE/MDTM/LIST/STAT and to classify RETR targets.
#[derive(Debug, Clone)]
pub struct Stat {
    /// File length in bytes.
    pub len: u64,
    /// True if this entry is a directory.
    pub is_dir: bool,
    /// Last-modified time.
    pub modified: SystemTime,
}

/// A single directory entry as needed by LIST/NLST/MLSD.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Base name (no path prefix).
    pub name: String,
    /// Metadata, when it could be obtained (absent in safe-mode listings).
    pub stat: Option<Stat>,
}

/// The zero-copy / stream-only capabilities of this backend. The local
/// filesystem backend supports `sendfile`-based zero copy on every platform
/// this crate targets, so there's no `STREAM_ONLY` bit here — that bit
/// exists for the hypothetical self-ELF-decoder stream spec.md §9
/// describes, which this crate does not implement.
pub fn capabilities() -> Caps {
    Caps::ZERO_COPY
}

/// `stat()`.
pub async fn stat(path: &str) -> Result<Stat, Error> {
    let meta = fs::metadata(path).await.map_err(stat_err)?;
    Ok(Stat {
        len: meta.len(),
        is_dir: meta.is_dir(),
        modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    })
}

fn stat_err(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::with_source(ErrorKind::NotFound, e),
        io::ErrorKind::PermissionDenied => Error::with_source(ErrorKind::Permission, e),
        _ => Error::with_source(ErrorKind::FileStat, e),
    }
}

/// Opens a file for reading and seeks it to `offset`.
pub async fn open_for_read(path: &str, offset: u64) -> Result<File, Error> {
    let mut f = File::open(path).await.map_err(|e| Error::with_source(ErrorKind::FileOpen, e))?;
    if offset > 0 {
        f.seek(io::SeekFrom::Start(offset)).await.map_err(|e| Error::with_source(ErrorKind::FileOpen, e))?;
    }
    Ok(f)
}

/// Opens a file for STOR/APPE semantics.
///
/// `truncate` selects `O_TRUNC` (plain STOR with no restart offset);
/// `append` selects `O_APPEND` (APPE with no restart offset). When `offset`
/// is non-zero the file is opened without either flag and seeked instead,
/// per spec.md §4.3.5.
pub async fn open_for_write(path: &str, offset: u64, append: bool, truncate: bool) -> Result<File, Error> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if offset == 0 {
        if truncate {
            opts.truncate(true);
        }
        if append {
            opts.append(true);
        }
    }
    let mut f = opts.open(path).await.map_err(|e| Error::with_source(ErrorKind::FileOpen, e))?;
    if offset > 0 {
        f.seek(io::SeekFrom::Start(offset)).await.map_err(|e| Error::with_source(ErrorKind::FileOpen, e))?;
    }
    Ok(f)
}

/// `fsync()` — required before closing an uploaded file so it survives unmount/power loss.
pub async fn sync(f: &mut File) -> io::Result<()> {
    f.sync_all().await
}

/// Reads one chunk into `buf`, returning the number of bytes read (0 = EOF).
pub async fn read_chunk(f: &mut File, buf: &mut [u8]) -> Result<usize, Error> {
    f.read(buf).await.map_err(|e| Error::with_source(ErrorKind::FileRead, e))
}

/// Writes all of `buf` to `f`.
pub async fn write_all(f: &mut File, buf: &[u8]) -> Result<(), Error> {
    f.write_all(buf).await.map_err(|e| Error::with_source(ErrorKind::FileWrite, e))
}

/// Enumerates a directory, skipping `.` and `..` (which `read_dir` never yields
/// in the first place, but the skip is kept explicit to match spec.md §4.3.7).
pub async fn list_dir(path: &str) -> Result<Vec<DirEntry>, Error> {
    let mut rd = fs::read_dir(path).await.map_err(|e| Error::with_source(ErrorKind::DirOpen, e))?;
    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| Error::with_source(ErrorKind::DirOpen, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        let stat = entry.metadata().await.ok().map(|m| Stat {
            len: m.len(),
            is_dir: m.is_dir(),
            modified: m.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
        out.push(DirEntry { name, stat });
    }
    Ok(out)
}

/// Enumerates a directory using only the directory-entry type hint (no
/// per-entry `stat()`), for safe-mode listings under virtual filesystems
/// where stat-ing every entry can hang or misbehave (spec.md §4.3.7).
pub async fn list_dir_typed(path: &str) -> Result<Vec<DirEntry>, Error> {
    let mut rd = fs::read_dir(path).await.map_err(|e| Error::with_source(ErrorKind::DirOpen, e))?;
    let mut out = Vec::new();
    while let Some(entry) = rd.next_entry().await.map_err(|e| Error::with_source(ErrorKind::DirOpen, e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "." || name == ".." {
            continue;
        }
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        out.push(DirEntry {
            name,
            stat: Some(Stat { len: 0, is_dir, modified: SystemTime::UNIX_EPOCH }),
        });
    }
    Ok(out)
}

/// `unlink()`.
pub async fn remove_file(path: &str) -> Result<(), Error> {
    fs::remove_file(path).await.map_err(stat_err_as_write)
}

/// `rmdir()`.
pub async fn remove_dir(path: &str) -> Result<(), Error> {
    fs::remove_dir(path).await.map_err(stat_err_as_write)
}

/// `mkdir()`.
pub async fn create_dir(path: &str) -> Result<(), Error> {
    fs::create_dir(path).await.map_err(stat_err_as_write)
}

/// `rename()`.
pub async fn rename(from: &str, to: &str) -> Result<(), Error> {
    fs::rename(from, to).await.map_err(stat_err_as_write)
}

fn stat_err_as_write(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => Error::with_source(ErrorKind::NotFound, e),
        io::ErrorKind::PermissionDenied => Error::with_source(ErrorKind::Permission, e),
        _ => Error::with_source(ErrorKind::FileWrite, e),
    }
}

/// Transfers `count` bytes from `file` to `socket` via the kernel `sendfile`
/// primitive, retrying on `EINTR`, starting at `offset` and advancing it.
/// Runs on a blocking-pool thread since `sendfile(2)` is not cancel-safe and
/// has no async wrapper worth inventing for a syscall that already blocks in
/// the kernel for the duration of the copy.
pub async fn zero_copy_send(socket_fd: RawFd, file: &File, offset: &mut u64, count: u64) -> io::Result<u64> {
    let file_fd = file.as_raw_fd();
    let start_offset = *offset;
    let (sent, new_offset) = tokio::task::spawn_blocking(move || send_loop(socket_fd, file_fd, start_offset, count))
        .await
        .expect("zero-copy sendfile task panicked")?;
    *offset = new_offset;
    Ok(sent)
}

// `nix::sys::sendfile::sendfile` takes `BorrowedFd`, not a raw descriptor,
// so the spawn_blocking handoff (which needs `'static`, raw `RawFd` values)
// has to reconstruct borrows here. Both fds outlive this call: `socket_fd`
// and `file_fd` are borrowed from `&File`/the caller's socket for the
// duration of `zero_copy_send`'s `.await`, and this function never closes
// either. The crate otherwise denies unsafe code; this is its one exception.
#[allow(unsafe_code)]
fn send_loop(socket_fd: RawFd, file_fd: RawFd, start_offset: u64, count: u64) -> io::Result<(u64, u64)> {
    let mut remaining = count;
    let mut pos = start_offset as i64;
    let mut total = 0u64;
    while remaining > 0 {
        let mut off = pos;
        match nix::sys::sendfile::sendfile(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(socket_fd) },
            unsafe { std::os::fd::BorrowedFd::borrow_raw(file_fd) },
            Some(&mut off),
            remaining as usize,
        ) {
            Ok(0) => break,
            Ok(n) => {
                total += n as u64;
                remaining -= n as u64;
                pos = off;
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from(e)),
        }
    }
    Ok((total, pos as u64))
}

/// True if `path` looks like a virtual filesystem mount that a safe-mode
/// listing should avoid stat-ing entry by entry (spec.md §4.3.7).
pub fn is_virtual_fs_path(path: &str) -> bool {
    ["/dev", "/proc", "/sys"].iter().any(|p| path == *p || path.starts_with(&format!("{p}/")))
}
