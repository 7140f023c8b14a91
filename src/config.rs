//! Runtime configuration. A builder-style struct mirroring the teacher's
//! `ServerBuilder`, exposing as runtime fields every constant spec.md §6
//! documents as a compile-time default.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration. Build one with [`Config::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub root: std::path::PathBuf,
    pub max_sessions: usize,
    pub listen_backlog: u32,
    pub cmd_buffer_len: usize,
    pub path_max: usize,
    pub stream_buffer_size: usize,
    pub max_auth_attempts: u8,
    pub auth_delay: Duration,
    pub ctrl_idle_timeout: Duration,
    pub data_timeout: Duration,
    pub data_connect_timeout: Duration,
    pub data_linger: Duration,
    pub sndbuf: usize,
    pub rcvbuf: usize,
    pub keepidle: u64,
    pub keepintvl: u64,
    pub keepcnt: u32,
    pub greeting: String,
    /// 32-byte pre-shared key for `AUTH XCRYPT`. `None` disables the
    /// extension entirely — see SPEC_FULL.md's Open Question resolution 4:
    /// there is no compiled-in default.
    pub psk: Option<[u8; 32]>,
    /// Skips per-entry `stat()` in LIST/NLST/MLSD under virtual filesystem
    /// paths (spec.md §4.3.7). Default off; the original enables this on
    /// PS4/PS5 targets only.
    pub safe_mode: bool,
}

impl Config {
    /// Starts building a [`Config`] rooted at `root`, listening on `bind_addr`.
    pub fn builder(bind_addr: SocketAddr, root: impl Into<std::path::PathBuf>) -> ConfigBuilder {
        ConfigBuilder {
            config: Config {
                bind_addr,
                root: root.into(),
                max_sessions: 32,
                listen_backlog: 8,
                cmd_buffer_len: 512,
                path_max: 4096,
                stream_buffer_size: 1024 * 1024,
                max_auth_attempts: 3,
                auth_delay: Duration::from_secs(2),
                ctrl_idle_timeout: Duration::from_secs(300),
                data_timeout: Duration::from_secs(120),
                data_connect_timeout: Duration::from_secs(15),
                data_linger: Duration::from_secs(10),
                sndbuf: 1024 * 1024,
                rcvbuf: 1024 * 1024,
                keepidle: 60,
                keepintvl: 10,
                keepcnt: 3,
                greeting: "Welcome".to_string(),
                psk: None,
                safe_mode: false,
            },
        }
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    config: Config,
}

macro_rules! setter {
    ($field:ident, $ty:ty) => {
        /// Overrides the corresponding `Config` field.
        pub fn $field(mut self, value: $ty) -> Self {
            self.config.$field = value;
            self
        }
    };
}

impl ConfigBuilder {
    setter!(max_sessions, usize);
    setter!(listen_backlog, u32);
    setter!(cmd_buffer_len, usize);
    setter!(path_max, usize);
    setter!(stream_buffer_size, usize);
    setter!(max_auth_attempts, u8);
    setter!(auth_delay, Duration);
    setter!(ctrl_idle_timeout, Duration);
    setter!(data_timeout, Duration);
    setter!(data_connect_timeout, Duration);
    setter!(data_linger, Duration);
    setter!(sndbuf, usize);
    setter!(rcvbuf, usize);
    setter!(keepidle, u64);
    setter!(keepintvl, u64);
    setter!(keepcnt, u32);

    /// Overrides the greeting text sent with the initial `220`.
    pub fn greeting(mut self, greeting: impl Into<String>) -> Self {
        self.config.greeting = greeting.into();
        self
    }

    /// Sets the `AUTH XCRYPT` pre-shared key, enabling the extension.
    pub fn psk(mut self, psk: [u8; 32]) -> Self {
        self.config.psk = Some(psk);
        self
    }

    /// Enables safe-mode directory listings (skips per-entry `stat()` under
    /// virtual filesystem paths).
    pub fn safe_mode(mut self, safe_mode: bool) -> Self {
        self.config.safe_mode = safe_mode;
        self
    }

    /// Finishes building the [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_posix_profile() {
        let cfg = Config::builder("127.0.0.1:2121".parse().unwrap(), "/srv/ftp").build();
        assert_eq!(cfg.max_sessions, 32);
        assert_eq!(cfg.listen_backlog, 8);
        assert_eq!(cfg.cmd_buffer_len, 512);
        assert_eq!(cfg.path_max, 4096);
        assert_eq!(cfg.max_auth_attempts, 3);
        assert!(cfg.psk.is_none());
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = Config::builder("127.0.0.1:2121".parse().unwrap(), "/srv/ftp")
            .max_sessions(16)
            .psk([1u8; 32])
            .build();
        assert_eq!(cfg.max_sessions, 16);
        assert_eq!(cfg.psk, Some([1u8; 32]));
    }
}
