//! Subscription engine: matching, registry, admission, fan-out, and the
//! idle-filter reaper.

pub mod matcher;
pub mod reaper;
pub mod registry;
pub mod validate;

pub use reaper::Reaper;
pub use registry::SubscriptionManager;
pub use validate::validate_options;
