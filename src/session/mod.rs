//! `SESSION`: per-client state, control-channel I/O, data-channel lifecycle,
//! transfer loops, and the simple one-line command handlers. Grounded in
//! spec.md §3 (data model) and §4.3.

mod control;
mod data;
mod dispatch;
mod handlers;
mod transfer;

pub use dispatch::run;

use crate::crypto::ChaCha20;
use crate::error::Error;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};

/// The lifecycle state of a session slot, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Init = 0,
    Connected = 1,
    Authenticated = 2,
    Transferring = 3,
    Terminating = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Init,
            1 => SessionState::Connected,
            2 => SessionState::Authenticated,
            3 => SessionState::Transferring,
            _ => SessionState::Terminating,
        }
    }
}

/// An atomically-observable session state cell, shared between the owning
/// worker task and the server's pool scanner.
#[derive(Debug, Default)]
pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(state: SessionState) -> Self {
        AtomicSessionState(AtomicU8::new(state as u8))
    }
    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }
    pub fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
    /// Atomically transitions from INIT or TERMINATING to CONNECTED, the
    /// allocation primitive the server's pool scan relies on.
    pub fn try_allocate(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                let s = SessionState::from_u8(v);
                matches!(s, SessionState::Init | SessionState::Terminating).then_some(SessionState::Connected as u8)
            })
            .is_ok()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Init
    }
}

/// Which data-connection mode, if any, is currently armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    #[default]
    None,
    Active,
    Passive,
}

/// `TYPE`: A and I are accepted but semantically identical (no ASCII
/// translation is performed — see SPEC_FULL.md's Open Question 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    #[default]
    Image,
    Ascii,
}

/// Atomic counters aggregated by the server supervisor. Shared (`Arc`)
/// between the session's worker and the server so `stats()` can sum live
/// sessions without locking.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub files_sent: AtomicU64,
    pub files_received: AtomicU64,
    pub commands_processed: AtomicU64,
    pub errors: AtomicU64,
}

impl SessionStats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// The central long-lived per-connection entity (spec.md §3).
pub struct Session {
    pub session_id: u64,
    pub state: Arc<AtomicSessionState>,
    pub ctrl: tokio::io::BufReader<TcpStream>,
    pub ctrl_peer: SocketAddr,
    pub data_channel: Option<TcpStream>,
    pub pasv_listener: Option<TcpListener>,
    pub data_mode: DataMode,
    pub data_peer_addr: Option<SocketAddr>,
    pub transfer_type: TransferType,
    pub restart_offset: u64,
    pub root: String,
    pub cwd: String,
    pub rename_from: Option<String>,
    pub auth_attempts: u8,
    pub user_ok: bool,
    pub authenticated: bool,
    pub crypto: ChaCha20,
    pub client_ip: String,
    pub client_port: u16,
    pub stats: Arc<SessionStats>,
    pub connect_time: u64,
    pub last_activity: u64,
    pub config: Arc<crate::config::Config>,
    pub bufpool: Arc<crate::bufpool::BufferPool>,
    pub quit: bool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: u64,
        ctrl: TcpStream,
        ctrl_peer: SocketAddr,
        state: Arc<AtomicSessionState>,
        stats: Arc<SessionStats>,
        config: Arc<crate::config::Config>,
        bufpool: Arc<crate::bufpool::BufferPool>,
    ) -> Self {
        let now = unix_now();
        Session {
            session_id,
            state,
            ctrl: tokio::io::BufReader::new(ctrl),
            ctrl_peer,
            data_channel: None,
            pasv_listener: None,
            data_mode: DataMode::None,
            data_peer_addr: None,
            transfer_type: TransferType::Image,
            restart_offset: 0,
            root: config.root.to_string_lossy().into_owned(),
            cwd: config.root.to_string_lossy().into_owned(),
            rename_from: None,
            auth_attempts: 0,
            user_ok: false,
            authenticated: false,
            crypto: ChaCha20::new(),
            client_ip: ctrl_peer.ip().to_string(),
            client_port: ctrl_peer.port(),
            stats,
            connect_time: now,
            last_activity: now,
            config,
            bufpool,
            quit: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = unix_now();
    }

    pub fn record_command(&self) {
        SessionStats::bump(&self.stats.commands_processed, 1);
    }

    pub fn record_error(&self) {
        SessionStats::bump(&self.stats.errors, 1);
    }

    pub fn resolve(&self, input: &str) -> Result<String, Error> {
        crate::path::resolve(&self.cwd, input, &self.root, self.config.path_max)
    }

    /// Clears REST's single-shot offset; called on every transfer
    /// completion/failure and on resolve/validate failure (spec.md §3 invariant).
    pub fn clear_restart_offset(&mut self) {
        self.restart_offset = 0;
    }

    pub fn cipher_active(&self) -> bool {
        self.crypto.is_active()
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_state_allocation_only_succeeds_from_init_or_terminating() {
        let s = AtomicSessionState::new(SessionState::Init);
        assert!(s.try_allocate());
        assert_eq!(s.load(), SessionState::Connected);
        // Already Connected: can't allocate again.
        assert!(!s.try_allocate());

        s.store(SessionState::Terminating);
        assert!(s.try_allocate());
        assert_eq!(s.load(), SessionState::Connected);
    }
}
