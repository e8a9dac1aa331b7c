//! WebSocket adapter: the subscriber-facing transport implementation and
//! per-connection session loop.

pub mod peer;
pub mod session;

pub use peer::WsPeer;
