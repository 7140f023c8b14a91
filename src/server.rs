//! `SERVER`: the top-level supervisor — listens for control connections,
//! allocates a session slot per connection, spawns one Tokio task per
//! session, and folds each session's final statistics into the server-wide
//! aggregate. Grounded in spec.md §3/§5 and the teacher's
//! `server/ftpserver/listen.rs` accept loop, adapted from "OS thread per
//! session" to "Tokio task per session" per SPEC_FULL.md's concurrency
//! model mapping.

use crate::bufpool::BufferPool;
use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::notification::{Notifier, TracingNotifier};
use crate::pal::net;
use crate::session::{AtomicSessionState, Session, SessionState, SessionStats};
use crate::{metrics, session};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A snapshot of the server-wide counters, for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateStats {
    pub active_sessions: usize,
    pub total_connections: u64,
    pub total_errors: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

/// One slot in the fixed-size session pool: the atomically-observable
/// lifecycle state plus the per-session counters folded in when the
/// session's task completes.
struct Slot {
    state: Arc<AtomicSessionState>,
    stats: Arc<SessionStats>,
}

/// The long-lived server supervisor. Build one with [`Server::init`], then
/// drive it with [`Server::serve`].
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
    pool: Vec<Slot>,
    /// Serializes slot allocation, matching spec.md §5's "mutex protecting
    /// session slot allocation" even though the underlying CAS is already
    /// race-free on its own — belt and suspenders, not a correctness
    /// requirement.
    alloc_lock: tokio::sync::Mutex<()>,
    active_sessions: Arc<AtomicUsize>,
    total_connections: AtomicU64,
    total_errors: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
    next_session_id: AtomicU64,
    cancel: CancellationToken,
    bufpool: Arc<BufferPool>,
    notifier: Arc<dyn Notifier>,
}

impl Server {
    /// Binds the listening socket and builds the fixed-capacity session
    /// pool. Does not start accepting connections yet; call [`Server::serve`].
    pub async fn init(config: Config) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| Error::with_source(ErrorKind::SocketBind, e))?;
        let pool = (0..config.max_sessions)
            .map(|_| Slot {
                state: Arc::new(AtomicSessionState::new(SessionState::Init)),
                stats: Arc::new(SessionStats::default()),
            })
            .collect();
        let bufpool = Arc::new(BufferPool::new(config.max_sessions.min(32), config.stream_buffer_size));
        Ok(Server {
            config: Arc::new(config),
            listener,
            pool,
            alloc_lock: tokio::sync::Mutex::new(()),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            total_connections: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            next_session_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            bufpool,
            notifier: Arc::new(TracingNotifier),
        })
    }

    /// Overrides the notification sink used for best-effort lifecycle
    /// announcements (spec.md §6).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The address actually bound (useful when `Config::bind_addr`'s port was 0).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until [`Server::stop`] is called or cancellation
    /// is otherwise requested. Each accepted connection is allocated a
    /// session slot and handed its own Tokio task; a pool with no free slot
    /// is rejected with a `421` before the control connection's task is
    /// ever spawned.
    pub async fn serve(&self) {
        info!(port = self.config.bind_addr.port(), max_sessions = self.config.max_sessions, "server listening");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.handle_accept(stream, peer).await,
                        Err(e) => warn!(error = %e, "accept() failed"),
                    }
                }
            }
        }
    }

    async fn handle_accept(&self, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        metrics::inc_session();

        let Some(slot_index) = self.allocate_slot().await else {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
            metrics::inc_errors();
            warn!(ip = %peer.ip(), "max sessions reached, rejecting connection");
            let mut stream = stream;
            let _ = reject_no_slot(&mut stream).await;
            metrics::dec_session();
            return;
        };

        if let Err(e) = net::configure_latency(&stream, self.config.sndbuf, self.config.rcvbuf, self.config.keepidle, self.config.keepintvl, self.config.keepcnt) {
            warn!(error = %e, "failed to configure control socket options");
        }

        let slot = &self.pool[slot_index];
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(session_id, stream, peer, slot.state.clone(), slot.stats.clone(), self.config.clone(), self.bufpool.clone());

        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.notifier.notify(&format!("session {session_id} connected from {}", peer.ip()));

        let state = slot.state.clone();
        let active_sessions = self.active_sessions.clone();
        tokio::spawn(run_and_release(session, state, active_sessions));
    }

    /// Finds a free slot via the pool-wide allocation lock, then performs
    /// the atomic INIT/TERMINATING → CONNECTED transition on it.
    async fn allocate_slot(&self) -> Option<usize> {
        let _guard = self.alloc_lock.lock().await;
        self.pool.iter().position(|slot| slot.state.try_allocate())
    }

    /// Requests the accept loop to stop and marks every session's state as
    /// terminating so their next interaction cycle can wind down.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// A snapshot of the server-wide counters, folding in each live
    /// session's running totals (spec.md §5's aggregate statistics).
    pub fn stats(&self) -> AggregateStats {
        let mut bytes_sent = self.total_bytes_sent.load(Ordering::Relaxed);
        let mut bytes_received = self.total_bytes_received.load(Ordering::Relaxed);
        let mut errors = self.total_errors.load(Ordering::Relaxed);
        for slot in &self.pool {
            bytes_sent += slot.stats.bytes_sent.load(Ordering::Relaxed);
            bytes_received += slot.stats.bytes_received.load(Ordering::Relaxed);
            errors += slot.stats.errors.load(Ordering::Relaxed);
        }
        AggregateStats {
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_errors: errors,
            total_bytes_sent: bytes_sent,
            total_bytes_received: bytes_received,
        }
    }
}

async fn run_and_release(session: Session, state: Arc<AtomicSessionState>, active_sessions: Arc<AtomicUsize>) {
    let sid = session.session_id;
    session::run(session).await;
    state.store(SessionState::Init);
    active_sessions.fetch_sub(1, Ordering::Relaxed);
    metrics::dec_session();
    info!(sid, "session slot released");
}

async fn reject_no_slot(stream: &mut tokio::net::TcpStream) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    stream.write_all(b"421 Too many connections, try again later.\r\n").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_binds_ephemeral_port() {
        let config = Config::builder("127.0.0.1:0".parse().unwrap(), "/tmp").max_sessions(2).build();
        let server = Server::init(config).await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
        assert_eq!(server.active_sessions(), 0);
    }

    #[tokio::test]
    async fn stop_marks_server_not_running() {
        let config = Config::builder("127.0.0.1:0".parse().unwrap(), "/tmp").build();
        let server = Server::init(config).await.unwrap();
        assert!(server.is_running());
        server.stop();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn accept_loop_rejects_beyond_max_sessions() {
        let config = Config::builder("127.0.0.1:0".parse().unwrap(), "/tmp").max_sessions(1).build();
        let server = Server::init(config).await.unwrap();
        let addr = server.local_addr().unwrap();

        for slot in &server.pool {
            slot.state.try_allocate();
        }

        let server = Arc::new(server);
        let server2 = server.clone();
        let handle = tokio::spawn(async move { server2.serve().await });

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 64];
        use tokio::io::AsyncReadExt;
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("421"));

        server.stop();
        let _ = handle.await;
    }
}
