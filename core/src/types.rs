//! Shared primitive types used across the entire simulation.

/// A simulation tick. One tick = one cycle time unit (one second of wall time
/// at the default cadence).
pub type Tick = u64;

/// A stable node identifier, e.g. `N0`..`N9`.
pub type NodeId = String;

/// Seconds elapsed inside the current cycle, always in `[0, cycle_len)`.
pub type CycleSecs = f64;
