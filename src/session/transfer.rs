//! RETR/STOR/APPE transfer pipelines and the LIST/NLST/MLSD directory
//! listing handlers. Grounded in spec.md §4.3.5 and §4.3.7.

use super::{Session, SessionState};
use crate::error::{Error, ErrorKind};
use crate::pal::{self, fs as pal_fs, Caps};
use crate::proto::{Reply, ReplyCode};
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// `RETR`: downloads a file, choosing the zero-copy kernel path when the
/// backend supports it and the cipher is inactive, else the buffered XOR
/// path. The choice is made once per transfer and never changes mid-stream
/// (spec.md §9).
pub async fn retr(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = match session.resolve(arg) {
        Ok(p) => p,
        Err(e) => {
            session.clear_restart_offset();
            return Err(e);
        }
    };
    let stat = match pal_fs::stat(&resolved).await {
        Ok(s) if s.is_dir => {
            session.clear_restart_offset();
            session.send_reply(&Reply::new(ReplyCode::FileUnavailable, "Not a plain file.")).await?;
            return Ok(());
        }
        Ok(s) => s,
        Err(e) => {
            session.clear_restart_offset();
            return Err(e);
        }
    };
    let offset = session.restart_offset;
    if offset > stat.len {
        session.clear_restart_offset();
        session.send_reply(&Reply::new(ReplyCode::FileUnavailable, "Invalid offset.")).await?;
        return Ok(());
    }
    let mut file = match pal_fs::open_for_read(&resolved, offset).await {
        Ok(f) => f,
        Err(e) => {
            session.clear_restart_offset();
            return Err(e);
        }
    };

    session.send_reply(&Reply::new(ReplyCode::DataConnectionOpenStarting, "Opening data connection for transfer.")).await?;
    if session.open_data().await.is_err() {
        session.clear_restart_offset();
        session.send_reply(&Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection.")).await?;
        return Ok(());
    }
    session.state.store(SessionState::Transferring);

    let remaining = stat.len - offset;
    let use_zero_copy = pal_fs::capabilities().contains(Caps::ZERO_COPY) && !session.crypto.is_active();
    let result = if use_zero_copy {
        transfer_zero_copy(session, &file, offset, remaining).await
    } else {
        transfer_buffered_read(session, &mut file, remaining).await
    };

    session.close_data();
    session.state.store(SessionState::Authenticated);

    match result {
        Ok(sent) => {
            session.stats.bytes_sent.fetch_add(sent, Ordering::Relaxed);
            session.stats.files_sent.fetch_add(1, Ordering::Relaxed);
            crate::metrics::add_bytes_sent(sent);
            session.send_reply(&Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete.")).await?;
        }
        Err(e) => {
            session.send_reply(&Reply::new(ReplyCode::ConnectionClosed, format!("Transfer failed: {e}."))).await?;
        }
    }
    Ok(())
}

async fn transfer_zero_copy(session: &mut Session, file: &tokio::fs::File, offset: u64, remaining: u64) -> Result<u64, Error> {
    let socket = session.data_channel.as_ref().ok_or_else(|| Error::new(ErrorKind::SocketSend))?;
    pal::net::set_cork(socket, true);
    let fd = socket.as_raw_fd();
    let mut off = offset;
    let result = pal_fs::zero_copy_send(fd, file, &mut off, remaining).await;
    if let Some(socket) = session.data_channel.as_ref() {
        pal::net::set_cork(socket, false);
    }
    result.map_err(|e| Error::with_source(ErrorKind::SocketSend, e))
}

async fn transfer_buffered_read(session: &mut Session, file: &mut tokio::fs::File, mut remaining: u64) -> Result<u64, Error> {
    let slot = session.bufpool.acquire().ok_or_else(|| Error::new(ErrorKind::OutOfMemory))?;
    if let Some(socket) = session.data_channel.as_ref() {
        pal::net::set_cork(socket, true);
    }
    let mut total = 0u64;
    while remaining > 0 {
        let mut guard = slot.lock().await;
        let cap = (guard.len() as u64).min(remaining) as usize;
        let n = pal_fs::read_chunk(file, &mut guard[..cap]).await?;
        if n == 0 {
            break;
        }
        if session.crypto.is_active() {
            session.crypto.xor(&mut guard[..n]);
        }
        let socket = session.data_channel.as_mut().ok_or_else(|| Error::new(ErrorKind::SocketSend))?;
        socket.write_all(&guard[..n]).await.map_err(|e| Error::with_source(ErrorKind::SocketSend, e))?;
        drop(guard);
        total += n as u64;
        remaining -= n as u64;
    }
    if let Some(socket) = session.data_channel.as_ref() {
        pal::net::set_cork(socket, false);
    }
    Ok(total)
}

/// `STOR`/`APPE`: uploads a file. STOR truncates (unless resuming); APPE
/// appends (unless resuming, in which case both seek to the restart
/// offset instead). Grounded in spec.md §4.3.5.
pub async fn stor(session: &mut Session, arg: &str) -> Result<(), Error> {
    stor_or_appe(session, arg, false).await
}

/// See [`stor`].
pub async fn appe(session: &mut Session, arg: &str) -> Result<(), Error> {
    stor_or_appe(session, arg, true).await
}

async fn stor_or_appe(session: &mut Session, arg: &str, append: bool) -> Result<(), Error> {
    let resolved = match session.resolve(arg) {
        Ok(p) => p,
        Err(e) => {
            session.clear_restart_offset();
            return Err(e);
        }
    };
    let offset = session.restart_offset;
    let truncate = offset == 0 && !append;
    let mut file = match pal_fs::open_for_write(&resolved, offset, append, truncate).await {
        Ok(f) => f,
        Err(e) => {
            session.clear_restart_offset();
            return Err(e);
        }
    };

    session.send_reply(&Reply::new(ReplyCode::DataConnectionOpenStarting, "Opening data connection for transfer.")).await?;
    if session.open_data().await.is_err() {
        session.clear_restart_offset();
        session.send_reply(&Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection.")).await?;
        return Ok(());
    }
    session.state.store(SessionState::Transferring);

    let result = transfer_buffered_write(session, &mut file).await;

    session.close_data();
    session.state.store(SessionState::Authenticated);

    match result {
        Ok(received) => match pal_fs::sync(&mut file).await {
            Ok(()) => {
                session.stats.bytes_received.fetch_add(received, Ordering::Relaxed);
                session.stats.files_received.fetch_add(1, Ordering::Relaxed);
                crate::metrics::add_bytes_received(received);
                session.send_reply(&Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete.")).await?;
            }
            Err(e) => {
                session.send_reply(&Reply::new(ReplyCode::ConnectionClosed, format!("Transfer failed (fsync): {e}."))).await?;
            }
        },
        Err((e, stage)) => {
            session.send_reply(&Reply::new(ReplyCode::ConnectionClosed, format!("Transfer failed ({stage}): {e}."))).await?;
        }
    }
    Ok(())
}

async fn transfer_buffered_write(session: &mut Session, file: &mut tokio::fs::File) -> Result<u64, (Error, &'static str)> {
    let slot = session.bufpool.acquire().ok_or((Error::new(ErrorKind::OutOfMemory), "no_buffer"))?;
    let mut total = 0u64;
    loop {
        let mut guard = slot.lock().await;
        let n = {
            let socket = session.data_channel.as_mut().ok_or((Error::new(ErrorKind::SocketRecv), "recv_error"))?;
            socket.read(&mut guard).await.map_err(|e| (Error::with_source(ErrorKind::SocketRecv, e), "recv_error"))?
        };
        if n == 0 {
            break;
        }
        if session.crypto.is_active() {
            session.crypto.xor(&mut guard[..n]);
        }
        pal_fs::write_all(file, &guard[..n]).await.map_err(|e| (e, "write_error"))?;
        drop(guard);
        total += n as u64;
    }
    Ok(total)
}

/// What a listing command should render per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// `LIST`/`MLSD`: the detailed `perms 1 ftp ftp SIZE DATE NAME` line.
    Detail,
    /// `NLST`: bare `NAME`.
    Name,
}

/// `LIST`/`NLST`/`MLSD`: enumerates a directory over the data channel.
/// Grounded in spec.md §4.3.7, including the safe-mode fast path that
/// skips per-entry `stat()` under virtual filesystem mounts.
pub async fn list(session: &mut Session, arg: &str, kind: ListKind) -> Result<(), Error> {
    let target = if arg.is_empty() { "." } else { arg };
    let resolved = match session.resolve(target) {
        Ok(p) => p,
        Err(e) => return Err(e),
    };
    let safe_mode = session.config.safe_mode && pal_fs::is_virtual_fs_path(&resolved);
    let entries = if safe_mode {
        pal_fs::list_dir_typed(&resolved).await?
    } else {
        pal_fs::list_dir(&resolved).await?
    };

    session.send_reply(&Reply::new(ReplyCode::DataConnectionOpenStarting, "Here comes the directory listing.")).await?;
    if session.open_data().await.is_err() {
        session.send_reply(&Reply::new(ReplyCode::CantOpenDataConnection, "Can't open data connection.")).await?;
        return Ok(());
    }
    session.state.store(SessionState::Transferring);

    let mut ok = true;
    for entry in &entries {
        let line = match kind {
            ListKind::Name => format!("{}\r\n", entry.name),
            ListKind::Detail => format_detail_line(entry),
        };
        let mut bytes = line.into_bytes();
        if session.crypto.is_active() {
            session.crypto.xor(&mut bytes);
        }
        let Some(socket) = session.data_channel.as_mut() else {
            ok = false;
            break;
        };
        if socket.write_all(&bytes).await.is_err() {
            ok = false;
            break;
        }
    }

    session.close_data();
    session.state.store(SessionState::Authenticated);

    if ok {
        session.send_reply(&Reply::new(ReplyCode::ClosingDataConnection, "Directory send OK.")).await?;
    } else {
        session.send_reply(&Reply::new(ReplyCode::LocalError, "Directory send failed.")).await?;
    }
    Ok(())
}

fn format_detail_line(entry: &pal_fs::DirEntry) -> String {
    let Some(stat) = &entry.stat else {
        return format!("-rw-r--r-- 1 ftp ftp {:>10} Jan 01 00:00 {}\r\n", 0, entry.name);
    };
    let perm_char = if stat.is_dir { 'd' } else { '-' };
    let rwx = if stat.is_dir { "rwxr-xr-x" } else { "rw-r--r--" };
    let datetime: chrono::DateTime<chrono::Utc> = stat.modified.into();
    let date = datetime.format("%b %d %H:%M");
    format!("{perm_char}{rwx} 1 ftp ftp {:>10} {date} {}\r\n", stat.len, entry.name)
}
