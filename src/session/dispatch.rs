//! The per-connection command loop: greeting, read-parse-dispatch-reply,
//! and the error-to-reply mapping shared by every handler. Grounded in
//! spec.md §4.2 (the control-channel state machine) and the teacher's
//! `server/controlchan/mod.rs` event loop.

use super::{handlers, Session, SessionState};
use crate::error::ErrorKind;
use crate::proto::command::{self, ArgRequirement};
use crate::proto::{Reply, ReplyCode};
use tracing::{info, warn};

/// Drives one client connection to completion: sends the greeting, then
/// loops reading a line, parsing it, validating and dispatching the
/// command, and replying, until the client disconnects, `QUIT`s, or the
/// control channel errors out.
pub async fn run(mut session: Session) {
    let sid = session.session_id;
    let ip = session.client_ip.clone();
    info!(sid, ip = %ip, evt = "connect", "session started");

    let greeting = session.config.greeting.clone();
    if session.send_reply(&Reply::new(ReplyCode::ServiceReady, greeting)).await.is_err() {
        finish(session, "greeting_failed").await;
        return;
    }
    session.state.store(SessionState::Connected);

    loop {
        let line = match session.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(_) => break,
        };
        session.touch();

        let parsed = match command::parse(&line) {
            Ok(p) => p,
            Err(_) => {
                session.record_error();
                if session.send_reply(&Reply::new(ReplyCode::CommandUnrecognized, "Syntax error.")).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let Some(spec) = command::lookup(&parsed.name) else {
            session.record_error();
            if session.send_reply(&Reply::new(ReplyCode::CommandUnrecognized, format!("'{}' not understood.", parsed.name))).await.is_err() {
                break;
            }
            continue;
        };

        if !command::validate_args(spec.args, &parsed.arg) {
            session.record_error();
            let msg = match spec.args {
                ArgRequirement::Required => "Argument required.",
                ArgRequirement::None => "No argument expected.",
                ArgRequirement::Optional => unreachable!("optional args always validate"),
            };
            if session.send_reply(&Reply::new(ReplyCode::InvalidParameters, msg)).await.is_err() {
                break;
            }
            continue;
        }

        if requires_login(&parsed.name) && !session.authenticated {
            session.record_error();
            if session.send_reply(&Reply::new(ReplyCode::NotLoggedIn, "Please login with USER and PASS.")).await.is_err() {
                break;
            }
            continue;
        }

        session.record_command();
        if let Err(e) = handlers::dispatch(&mut session, &parsed.name, &parsed.arg).await {
            session.record_error();
            warn!(sid, evt = "cmd_error", cmd = %parsed.name, res = ?e.kind(), "command failed");
            let reply = error_reply(e.kind());
            if session.send_reply(&reply).await.is_err() {
                break;
            }
        }

        if session.quit {
            break;
        }
    }

    finish(session, "closed").await;
}

/// Commands that require a successfully completed `USER`/`PASS` exchange.
/// Everything else (including `USER`/`PASS`/`QUIT`/`NOOP`/`FEAT`/`SYST`/
/// `HELP`/`AUTH`) is reachable pre-authentication.
fn requires_login(name: &str) -> bool {
    matches!(
        name,
        "CWD" | "CDUP"
            | "PWD"
            | "LIST"
            | "NLST"
            | "MLSD"
            | "MLST"
            | "RETR"
            | "STOR"
            | "APPE"
            | "REST"
            | "DELE"
            | "RMD"
            | "MKD"
            | "RNFR"
            | "RNTO"
            | "PORT"
            | "PASV"
            | "SIZE"
            | "MDTM"
    )
}

/// Maps an internal [`ErrorKind`] to the reply spec.md §7 prescribes.
fn error_reply(kind: ErrorKind) -> Reply {
    match kind {
        ErrorKind::NotFound => Reply::new(ReplyCode::FileUnavailable, "File or directory not found."),
        ErrorKind::Permission => Reply::new(ReplyCode::FileUnavailable, "Permission denied."),
        ErrorKind::PathInvalid | ErrorKind::PathTooLong => Reply::new(ReplyCode::FileUnavailable, "Invalid path."),
        ErrorKind::Timeout => Reply::new(ReplyCode::ServiceNotAvailable, "Operation timed out."),
        ErrorKind::OutOfMemory => Reply::new(ReplyCode::LocalError, "Server temporarily out of resources."),
        ErrorKind::InvalidParam => Reply::new(ReplyCode::InvalidParameters, "Invalid parameter."),
        _ => Reply::new(ReplyCode::LocalError, "Requested action aborted: local error."),
    }
}

async fn finish(mut session: Session, reason: &'static str) {
    session.state.store(SessionState::Terminating);
    info!(
        sid = session.session_id,
        evt = "disconnect",
        reason,
        bytes_sent = session.stats.bytes_sent.load(std::sync::atomic::Ordering::Relaxed),
        bytes_received = session.stats.bytes_received.load(std::sync::atomic::Ordering::Relaxed),
        "session ended"
    );
    session.crypto.reset();
}
