//! System-wide constants for the rig workspace.
//!
//! Single source of truth for reserved labels, queue limits and default paths.

/// Reserved record label carrying elapsed seconds since the shared time origin.
pub const TIME_LABEL: &str = "t(s)";

/// Default per-endpoint queue capacity of a link.
pub const DEFAULT_LINK_CAPACITY: usize = 4096;

/// Upper bound accepted for a configured link capacity.
pub const MAX_LINK_CAPACITY: usize = 1 << 20;

/// Granularity at which blocking waits re-check the cancellation token [ms].
pub const CANCEL_POLL_INTERVAL_MS: u64 = 10;

/// Default pipeline configuration path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rig/pipeline.toml";
