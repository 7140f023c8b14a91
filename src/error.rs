//! The crate-wide error type.
//!
//! Mirrors the teacher's `ControlChanError`/`ControlChanErrorKind` split: a
//! struct carrying a `Display`-only kind plus an optional boxed source, so
//! handlers can match on `kind()` while `{}` still prints something useful.

use derive_more::Display;
use std::io;

/// The error type returned throughout this crate.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Builds an error with no underlying source.
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, source: None }
    }

    /// Builds an error wrapping an underlying source.
    pub fn with_source(kind: ErrorKind, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// The classification of this error, used by command handlers to pick a reply code.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::FileRead,
        };
        Error::with_source(kind, e)
    }
}

/// The taxonomy of internal error kinds, matching the spec's error table (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// A caller passed a malformed or out-of-range argument.
    #[display("invalid parameter")]
    InvalidParam,
    /// A resource-bounded allocation could not be satisfied.
    #[display("out of memory")]
    OutOfMemory,
    /// `socket()` failed.
    #[display("failed to create socket")]
    SocketCreate,
    /// `bind()` failed.
    #[display("failed to bind socket")]
    SocketBind,
    /// `listen()` failed.
    #[display("failed to listen on socket")]
    SocketListen,
    /// `accept()` failed.
    #[display("failed to accept connection")]
    SocketAccept,
    /// A send on a socket failed or was short.
    #[display("failed to send on socket")]
    SocketSend,
    /// A receive on a socket failed.
    #[display("failed to receive on socket")]
    SocketRecv,
    /// A worker task could not be spawned.
    #[display("failed to create worker")]
    ThreadCreate,
    /// Opening a file failed.
    #[display("failed to open file")]
    FileOpen,
    /// Reading a file failed.
    #[display("failed to read file")]
    FileRead,
    /// Writing a file failed.
    #[display("failed to write file")]
    FileWrite,
    /// `stat()` failed.
    #[display("failed to stat file")]
    FileStat,
    /// Opening a directory for enumeration failed.
    #[display("failed to open directory")]
    DirOpen,
    /// A path failed normalization or root containment.
    #[display("invalid path")]
    PathInvalid,
    /// A path or its component count exceeded the configured maximum.
    #[display("path too long")]
    PathTooLong,
    /// The requested filesystem object does not exist.
    #[display("not found")]
    NotFound,
    /// The requested operation is not permitted.
    #[display("permission denied")]
    Permission,
    /// An operation exceeded its deadline.
    #[display("timed out")]
    Timeout,
    /// The session pool has no free slot.
    #[display("maximum sessions reached")]
    MaxSessions,
    /// The session exceeded its authentication attempt budget.
    #[display("authentication failed")]
    AuthFailed,
    /// The client sent a malformed command line.
    #[display("protocol error")]
    Protocol,
    /// Anything else.
    #[display("unknown error")]
    Unknown,
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, Error>;
