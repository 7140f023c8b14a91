//! Aggregate metrics. When the `prometheus` feature is enabled (the
//! default, matching the teacher's own default feature set) these are
//! backed by real `prometheus` gauges/counters, the way the teacher's
//! `src/metrics.rs` does it with `lazy_static!`-held collectors. Without
//! the feature the calls are no-ops so the rest of the crate doesn't need
//! `#[cfg]` at every call site.

#[cfg(feature = "prometheus")]
mod imp {
    use lazy_static::lazy_static;
    use prometheus::{IntCounter, IntGauge};

    lazy_static! {
        static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new("anonftpd_active_sessions", "Number of active FTP sessions").unwrap();
        static ref TOTAL_CONNECTIONS: IntCounter = IntCounter::new("anonftpd_total_connections", "Total accepted connections").unwrap();
        static ref TOTAL_ERRORS: IntCounter = IntCounter::new("anonftpd_total_errors", "Total connection/session errors").unwrap();
        static ref BYTES_SENT: IntCounter = IntCounter::new("anonftpd_bytes_sent_total", "Total bytes sent to clients").unwrap();
        static ref BYTES_RECEIVED: IntCounter = IntCounter::new("anonftpd_bytes_received_total", "Total bytes received from clients").unwrap();
    }

    pub fn inc_session() {
        ACTIVE_SESSIONS.inc();
        TOTAL_CONNECTIONS.inc();
    }

    pub fn dec_session() {
        ACTIVE_SESSIONS.dec();
    }

    pub fn inc_errors() {
        TOTAL_ERRORS.inc();
    }

    pub fn add_bytes_sent(n: u64) {
        BYTES_SENT.inc_by(n);
    }

    pub fn add_bytes_received(n: u64) {
        BYTES_RECEIVED.inc_by(n);
    }

    /// Registers this module's collectors with a Prometheus registry.
    pub fn register(registry: &prometheus::Registry) -> prometheus::Result<()> {
        registry.register(Box::new(ACTIVE_SESSIONS.clone()))?;
        registry.register(Box::new(TOTAL_CONNECTIONS.clone()))?;
        registry.register(Box::new(TOTAL_ERRORS.clone()))?;
        registry.register(Box::new(BYTES_SENT.clone()))?;
        registry.register(Box::new(BYTES_RECEIVED.clone()))?;
        Ok(())
    }
}

#[cfg(not(feature = "prometheus"))]
mod imp {
    pub fn inc_session() {}
    pub fn dec_session() {}
    pub fn inc_errors() {}
    pub fn add_bytes_sent(_n: u64) {}
    pub fn add_bytes_received(_n: u64) {}
}

pub use imp::*;
