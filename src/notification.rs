//! The notification sink is an external collaborator per spec.md §6: a
//! one-way, best-effort, fire-and-forget `notify(message)` call. This crate
//! only defines the seam; platform notification integrations (PS4/PS5 OSD,
//! desktop toasts, ...) are explicitly out of scope (spec.md §1).

/// A fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    /// Best-effort notification; implementations must not block or propagate errors.
    fn notify(&self, message: &str);
}

/// The default sink: logs via `tracing` and nothing else.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(target: "anonftpd::notify", "{message}");
    }
}
