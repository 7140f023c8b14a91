//! The per-command handlers invoked by [`super::dispatch::run`]'s command
//! loop. Transfer and listing handlers live in [`super::transfer`]; PORT/PASV
//! plumbing lives in [`super::data`]. Grounded in spec.md §4.3.8 and the
//! SUPPLEMENTED FEATURES section of SPEC_FULL.md (ABOR/ALLO/OPTS/HELP).

use super::{transfer, Session, SessionState};
use crate::error::Error;
use crate::proto::command::COMMAND_TABLE;
use crate::proto::{Reply, ReplyCode};
use std::net::IpAddr;
use zeroize::Zeroize;

/// Dispatches a parsed, argument-validated command to its handler.
///
/// Clears `rename_from` for every command except `RNFR`/`RNTO` before
/// dispatching, per spec.md §3's pairing invariant.
pub async fn dispatch(session: &mut Session, name: &str, arg: &str) -> Result<(), Error> {
    if name != "RNFR" && name != "RNTO" {
        session.rename_from = None;
    }
    match name {
        "USER" => user(session, arg).await,
        "PASS" => pass(session, arg).await,
        "QUIT" => quit(session).await,
        "NOOP" => session.send_reply(&Reply::new(ReplyCode::CommandOk, "NOOP ok.")).await,
        "CWD" => cwd(session, arg).await,
        "CDUP" => cwd(session, "..").await,
        "PWD" => pwd(session).await,
        "LIST" => transfer::list(session, arg, transfer::ListKind::Detail).await,
        "NLST" => transfer::list(session, arg, transfer::ListKind::Name).await,
        "MLSD" => transfer::list(session, arg, transfer::ListKind::Detail).await,
        "MLST" => session.send_reply(&Reply::new(ReplyCode::CommandNotImplemented, "MLST not fully implemented.")).await,
        "RETR" => transfer::retr(session, arg).await,
        "STOR" => transfer::stor(session, arg).await,
        "APPE" => transfer::appe(session, arg).await,
        "REST" => rest(session, arg).await,
        "DELE" => dele(session, arg).await,
        "RMD" => rmd(session, arg).await,
        "MKD" => mkd(session, arg).await,
        "RNFR" => rnfr(session, arg).await,
        "RNTO" => rnto(session, arg).await,
        "PORT" => port(session, arg).await,
        "PASV" => pasv(session).await,
        "SIZE" => size(session, arg).await,
        "MDTM" => mdtm(session, arg).await,
        "STAT" => session.send_reply(&Reply::new(ReplyCode::SystemStatus, "Server status OK.")).await,
        "SYST" => session.send_reply(&Reply::new(ReplyCode::SystemType, "UNIX Type: L8")).await,
        "FEAT" => feat(session).await,
        "HELP" => help(session, arg).await,
        "TYPE" => r#type(session, arg).await,
        "MODE" => mode(session, arg).await,
        "STRU" => stru(session, arg).await,
        "AUTH" => auth(session, arg).await,
        "ABOR" => session.send_reply(&Reply::new(ReplyCode::DataConnectionOpen, "No transfer in progress.")).await,
        "ALLO" => session.send_reply(&Reply::new(ReplyCode::Superfluous, "Superfluous command.")).await,
        "OPTS" => opts(session, arg).await,
        _ => unreachable!("dispatched command not in COMMAND_TABLE: {name}"),
    }
}

async fn user(session: &mut Session, arg: &str) -> Result<(), Error> {
    if arg.eq_ignore_ascii_case("anonymous") || arg.eq_ignore_ascii_case("ftp") {
        session.user_ok = true;
        session
            .send_reply(&Reply::new(ReplyCode::UsernameOkNeedPassword, "Guest login ok, send your complete e-mail address as password."))
            .await
    } else {
        session.user_ok = false;
        bump_auth_failure(session).await
    }
}

async fn pass(session: &mut Session, _arg: &str) -> Result<(), Error> {
    if !session.user_ok {
        return bump_auth_failure(session).await;
    }
    session.authenticated = true;
    session.auth_attempts = 0;
    session.state.store(SessionState::Authenticated);
    session.send_reply(&Reply::new(ReplyCode::UserLoggedIn, "Login successful.")).await
}

/// Shared lockout path for USER and PASS failures (SPEC_FULL.md's Open
/// Question resolution 2: both count against `auth_attempts`).
async fn bump_auth_failure(session: &mut Session) -> Result<(), Error> {
    session.auth_attempts = session.auth_attempts.saturating_add(1);
    tokio::time::sleep(session.config.auth_delay).await;
    if session.auth_attempts >= session.config.max_auth_attempts {
        session.send_reply(&Reply::new(ReplyCode::NotLoggedIn, "Too many login attempts.")).await?;
        session.quit = true;
        Ok(())
    } else {
        session.send_reply(&Reply::new(ReplyCode::NotLoggedIn, "Login incorrect.")).await
    }
}

async fn quit(session: &mut Session) -> Result<(), Error> {
    session.send_reply(&Reply::new(ReplyCode::ClosingControlConnection, "Goodbye.")).await?;
    session.quit = true;
    Ok(())
}

async fn cwd(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    let stat = crate::pal::fs::stat(&resolved).await?;
    if !stat.is_dir {
        session.send_reply(&Reply::new(ReplyCode::FileUnavailable, "Not a directory.")).await?;
        return Ok(());
    }
    session.cwd = resolved;
    session.send_reply(&Reply::new(ReplyCode::FileActionOk, "Directory changed.")).await
}

async fn pwd(session: &mut Session) -> Result<(), Error> {
    let msg = format!("\"{}\" is current directory.", session.cwd);
    session.send_reply(&Reply::new(ReplyCode::PathCreated, msg)).await
}

async fn rest(session: &mut Session, arg: &str) -> Result<(), Error> {
    match arg.parse::<u64>() {
        Ok(n) => {
            session.restart_offset = n;
            session.send_reply(&Reply::new(ReplyCode::RequestedFileActionPending, format!("Restarting at {n}."))).await
        }
        Err(_) => session.send_reply(&Reply::new(ReplyCode::InvalidParameters, "Invalid REST parameter.")).await,
    }
}

async fn dele(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    crate::pal::fs::remove_file(&resolved).await?;
    session.send_reply(&Reply::new(ReplyCode::FileActionOk, "File deleted.")).await
}

async fn rmd(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    crate::pal::fs::remove_dir(&resolved).await?;
    session.send_reply(&Reply::new(ReplyCode::FileActionOk, "Directory removed.")).await
}

async fn mkd(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    crate::pal::fs::create_dir(&resolved).await?;
    let msg = format!("\"{resolved}\" created.");
    session.send_reply(&Reply::new(ReplyCode::PathCreated, msg)).await
}

async fn rnfr(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    crate::pal::fs::stat(&resolved).await?;
    session.rename_from = Some(resolved);
    session.send_reply(&Reply::new(ReplyCode::RequestedFileActionPending, "Ready for RNTO.")).await
}

async fn rnto(session: &mut Session, arg: &str) -> Result<(), Error> {
    let Some(from) = session.rename_from.take() else {
        session.send_reply(&Reply::new(ReplyCode::BadSequenceOfCommands, "RNFR required first.")).await?;
        return Ok(());
    };
    let to = session.resolve(arg)?;
    crate::pal::fs::rename(&from, &to).await?;
    session.send_reply(&Reply::new(ReplyCode::FileActionOk, "Rename successful.")).await
}

async fn size(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    let stat = crate::pal::fs::stat(&resolved).await?;
    if stat.is_dir {
        session.send_reply(&Reply::new(ReplyCode::FileUnavailable, "SIZE not allowed on directories.")).await?;
        return Ok(());
    }
    session.send_reply(&Reply::new(ReplyCode::FileStatus, stat.len.to_string())).await
}

async fn mdtm(session: &mut Session, arg: &str) -> Result<(), Error> {
    let resolved = session.resolve(arg)?;
    let stat = crate::pal::fs::stat(&resolved).await?;
    let datetime: chrono::DateTime<chrono::Utc> = stat.modified.into();
    session.send_reply(&Reply::new(ReplyCode::FileStatus, datetime.format("%Y%m%d%H%M%S").to_string())).await
}

async fn port(session: &mut Session, arg: &str) -> Result<(), Error> {
    match session.handle_port(arg) {
        Ok(()) => session.send_reply(&Reply::new(ReplyCode::CommandOk, "PORT command successful.")).await,
        Err(_) => session.send_reply(&Reply::new(ReplyCode::InvalidParameters, "Illegal PORT command.")).await,
    }
}

async fn pasv(session: &mut Session) -> Result<(), Error> {
    match session.handle_pasv().await {
        Ok(addr) => {
            let octets = match addr.ip() {
                IpAddr::V4(v4) => v4.octets(),
                IpAddr::V6(_) => [0, 0, 0, 0],
            };
            let port = addr.port();
            let msg = format!(
                "Entering Passive Mode ({},{},{},{},{},{}).",
                octets[0],
                octets[1],
                octets[2],
                octets[3],
                port >> 8,
                port & 0xff
            );
            session.send_reply(&Reply::new(ReplyCode::EnteringPassiveMode, msg)).await
        }
        Err(_) => session.send_reply(&Reply::new(ReplyCode::LocalError, "Couldn't open passive connection.")).await,
    }
}

async fn feat(session: &mut Session) -> Result<(), Error> {
    let mut lines = vec!["Features:".to_string(), " SIZE".to_string(), " MDTM".to_string(), " REST STREAM".to_string(), " APPE".to_string(), " UTF8".to_string(), " MLSD".to_string(), " MLST".to_string()];
    if session.config.psk.is_some() {
        lines.push(" XCRYPT".to_string());
    }
    lines.push("End".to_string());
    session.send_reply(&Reply::multi(ReplyCode::SystemStatus, lines)).await
}

async fn help(session: &mut Session, arg: &str) -> Result<(), Error> {
    if arg.is_empty() {
        let names: Vec<String> = COMMAND_TABLE.iter().map(|c| format!(" {}", c.name)).collect();
        let mut lines = vec!["The following commands are recognized.".to_string()];
        lines.extend(names);
        lines.push("Help OK.".to_string());
        session.send_reply(&Reply::multi(ReplyCode::HelpMessage, lines)).await
    } else {
        let upper = arg.to_ascii_uppercase();
        match crate::proto::command::lookup(&upper) {
            Some(spec) => session.send_reply(&Reply::new(ReplyCode::HelpMessage, format!("Syntax: {} {{arg}}", spec.name))).await,
            None => session.send_reply(&Reply::new(ReplyCode::CommandNotImplemented, "Unknown command.")).await,
        }
    }
}

/// `TYPE A`/`TYPE I`: accepted and stored, but — per SPEC_FULL.md's Open
/// Question resolution 3 — no ASCII translation is ever performed; `TYPE A`
/// is semantically identical to `TYPE I` here.
async fn r#type(session: &mut Session, arg: &str) -> Result<(), Error> {
    use super::TransferType;
    if arg.eq_ignore_ascii_case("a") {
        session.transfer_type = TransferType::Ascii;
        session.send_reply(&Reply::new(ReplyCode::CommandOk, "Type set to A (no ASCII translation is performed).")).await
    } else if arg.eq_ignore_ascii_case("i") {
        session.transfer_type = TransferType::Image;
        session.send_reply(&Reply::new(ReplyCode::CommandOk, "Type set to I.")).await
    } else {
        session.send_reply(&Reply::new(ReplyCode::CommandNotImplementedForParameter, "Unsupported TYPE.")).await
    }
}

async fn mode(session: &mut Session, arg: &str) -> Result<(), Error> {
    if arg.eq_ignore_ascii_case("s") {
        session.send_reply(&Reply::new(ReplyCode::CommandOk, "Mode set to S.")).await
    } else {
        session.send_reply(&Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only MODE S is supported.")).await
    }
}

async fn stru(session: &mut Session, arg: &str) -> Result<(), Error> {
    if arg.eq_ignore_ascii_case("f") {
        session.send_reply(&Reply::new(ReplyCode::CommandOk, "Structure set to F.")).await
    } else {
        session.send_reply(&Reply::new(ReplyCode::CommandNotImplementedForParameter, "Only STRU F is supported.")).await
    }
}

async fn opts(session: &mut Session, arg: &str) -> Result<(), Error> {
    if arg.eq_ignore_ascii_case("utf8 on") {
        session.send_reply(&Reply::new(ReplyCode::CommandOk, "UTF8 enabled.")).await
    } else {
        session.send_reply(&Reply::new(ReplyCode::InvalidParameters, "Unknown OPTS parameter.")).await
    }
}

/// `AUTH XCRYPT`: disabled entirely (absent from FEAT, unrecognized here)
/// unless `Config::psk` was set (SPEC_FULL.md's Open Question resolution 4
/// — there is no compiled-in default PSK).
async fn auth(session: &mut Session, arg: &str) -> Result<(), Error> {
    let Some(psk) = session.config.psk else {
        session.send_reply(&Reply::new(ReplyCode::CommandNotImplementedForParameter, "XCRYPT is not available.")).await?;
        return Ok(());
    };
    if !arg.eq_ignore_ascii_case("xcrypt") {
        session.send_reply(&Reply::new(ReplyCode::CommandNotImplementedForParameter, "Unknown AUTH mechanism.")).await?;
        return Ok(());
    }
    if session.crypto.is_active() {
        session.send_reply(&Reply::new(ReplyCode::BadSequenceOfCommands, "XCRYPT already active.")).await?;
        return Ok(());
    }

    let mut nonce = [0u8; 12];
    if getrandom::fill(&mut nonce).is_err() {
        nonce = fallback_nonce();
    }
    let mut key = crate::crypto::derive_key(&psk, &nonce);

    // The 234 reply carries the nonce in cleartext; the cipher must not
    // activate until after it's on the wire, or the client can never
    // bootstrap the keystream (spec.md §4.3.8, §6).
    let hex: String = nonce.iter().map(|b| format!("{b:02x}")).collect();
    session.send_reply(&Reply::new(ReplyCode::ChannelCipherReady, format!("XCRYPT {hex}"))).await?;

    session.crypto.init(&key, &nonce);
    key.zeroize();
    Ok(())
}

/// Nonce fallback when OS entropy is unavailable: a linear-congruential
/// generator seeded from the monotonic clock (spec.md §4.3.8).
fn fallback_nonce() -> [u8; 12] {
    let seed = std::time::Instant::now().elapsed().as_nanos() as u64 ^ 0x9E37_79B9_7F4A_7C15;
    let mut state = seed | 1;
    let mut out = [0u8; 12];
    for chunk in out.chunks_mut(4) {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        let bytes = ((state >> 32) as u32).to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bufpool::BufferPool;
    use crate::config::Config;
    use crate::session::{AtomicSessionState, SessionStats};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn session() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_sock, peer) = listener.accept().await.unwrap();
        let config = Arc::new(Config::builder(addr, "/tmp").build());
        let bufpool = Arc::new(BufferPool::new(1, 1024));
        (Session::new(1, server_sock, peer, Arc::new(AtomicSessionState::default()), Arc::new(SessionStats::default()), config, bufpool), client)
    }

    #[tokio::test]
    async fn user_accepts_anonymous_and_ftp() {
        let (mut s, _c) = session().await;
        user(&mut s, "anonymous").await.unwrap();
        assert!(s.user_ok);
    }

    #[tokio::test]
    async fn rnto_without_rnfr_is_bad_sequence() {
        let (mut s, mut c) = session().await;
        rnto(&mut s, "/x").await.unwrap();
        let mut buf = [0u8; 64];
        let n = c.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("503"));
    }

    #[tokio::test]
    async fn auth_unavailable_without_psk() {
        let (mut s, mut c) = session().await;
        auth(&mut s, "XCRYPT").await.unwrap();
        let mut buf = [0u8; 64];
        let n = c.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("504"));
    }

    #[tokio::test]
    async fn auth_activates_cipher_when_psk_configured() {
        let (mut s, mut c) = session().await;
        s.config = Arc::new(Config::builder(s.config.bind_addr, "/tmp").psk([5u8; 32]).build());
        auth(&mut s, "xcrypt").await.unwrap();
        assert!(s.crypto.is_active());
        let mut buf = [0u8; 64];
        let n = c.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("234 XCRYPT "));
    }
}
