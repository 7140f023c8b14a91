//! Reply formatting. Grounded in the teacher's `server/controlchan/reply.rs`
//! `Reply`/`ReplyCode` split, adapted to this crate's synchronous-looking
//! (but `.await`-driven) control-channel writer.

use std::fmt;

/// A reply to the FTP client: single-line or multi-line.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `"CCC message\r\n"`.
    Single { code: ReplyCode, message: String },
    /// `"CCC-first\r\n"` ... `"CCC last\r\n"`.
    Multi { code: ReplyCode, lines: Vec<String> },
}

impl Reply {
    /// A single-line reply.
    pub fn new(code: ReplyCode, message: impl Into<String>) -> Self {
        Reply::Single { code, message: message.into() }
    }

    /// A multi-line reply. `lines` must have at least one element.
    pub fn multi(code: ReplyCode, lines: Vec<String>) -> Self {
        assert!(!lines.is_empty(), "multi-line reply needs at least one line");
        Reply::Multi { code, lines }
    }

    /// The numeric reply code.
    pub fn code(&self) -> ReplyCode {
        match self {
            Reply::Single { code, .. } => *code,
            Reply::Multi { code, .. } => *code,
        }
    }

    /// Serializes this reply to the exact bytes to send on the wire.
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Reply::Single { code, message } => format!("{} {}\r\n", *code as u32, message).into_bytes(),
            Reply::Multi { code, lines } => {
                let n = *code as u32;
                let mut out = String::new();
                for (i, line) in lines.iter().enumerate() {
                    if i == lines.len() - 1 {
                        out.push_str(&format!("{n} {line}\r\n"));
                    } else {
                        out.push_str(&format!("{n}-{line}\r\n"));
                    }
                }
                out.into_bytes()
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.to_wire()))
    }
}

/// RFC 959 (plus the RFC 3659 / XCRYPT extras) reply codes this server emits.
/// See spec.md §6 for the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplyCode {
    DataConnectionOpenStarting = 150,
    CommandOk = 200,
    Superfluous = 202,
    SystemStatus = 211,
    DirectoryStatus = 212,
    FileStatus = 213,
    HelpMessage = 214,
    SystemType = 215,
    ServiceReady = 220,
    ClosingControlConnection = 221,
    DataConnectionOpen = 225,
    ClosingDataConnection = 226,
    EnteringPassiveMode = 227,
    ChannelCipherReady = 234,
    UserLoggedIn = 230,
    FileActionOk = 250,
    PathCreated = 257,
    UsernameOkNeedPassword = 331,
    RequestedFileActionPending = 350,
    ServiceNotAvailable = 421,
    CantOpenDataConnection = 425,
    ConnectionClosed = 426,
    FileUnavailableTransient = 450,
    LocalError = 451,
    InsufficientStorage = 452,
    CommandUnrecognized = 500,
    InvalidParameters = 501,
    CommandNotImplemented = 502,
    BadSequenceOfCommands = 503,
    CommandNotImplementedForParameter = 504,
    NotLoggedIn = 530,
    NeedAccount = 532,
    FileUnavailable = 550,
    PageTypeUnknown = 551,
    ExceededStorageAllocation = 552,
    FileNameNotAllowed = 553,
}
