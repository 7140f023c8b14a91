//! Platform I/O primitives (`NET`, `FS`) as described in spec.md §4's
//! dependency-order list. Abstracted behind a small capability bitmask
//! (§9's "abstract FS/NET behind a capability-bearing interface") so the
//! session/transfer code can ask "can I zero-copy this?" without branching
//! on platform.

pub mod fs;
pub mod net;

bitflags::bitflags! {
    /// Capabilities a storage backend may or may not support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Caps: u32 {
        /// The backend can hand the kernel a file descriptor for `sendfile`.
        const ZERO_COPY = 0b01;
        /// The backend is stream-only (e.g. a self-decoder with no seekable fd)
        /// and must always go through the userspace buffered path.
        const STREAM_ONLY = 0b10;
    }
}
