// Host-engine interfaces.
//
// The handshake core is embedded in an engine that owns its threads and
// decides how the per-thread pending flag is made visible at real poll
// sites. Those engine-specific pieces are expressed as traits here, with a
// no-op production default.

pub mod threading;

pub use threading::{FastFlagHook, NoopFastFlag};
