//! Construction-time errors.
//!
//! Nothing on the recording hot path (`record`, `notify_unreachable`,
//! `is_tracking`) can fail - saturation and contention are handled silently,
//! by design. The one place an error is meaningful is validating a
//! [`TrackerConfig`](crate::config::TrackerConfig) before a [`Tracker`](crate::Tracker)
//! is built.

use thiserror::Error;

/// Reasons a [`TrackerConfig`](crate::config::TrackerConfig) is rejected at
/// construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	/// `max_nodes` must be at least 1.
	#[error("max_nodes must be at least 1, got {0}")]
	MaxNodesZero(u64),

	/// `max_depth` must be at least 1.
	#[error("max_depth must be at least 1, got {0}")]
	MaxDepthZero(u32),

	/// `max_children_per_node` must be at least 1.
	#[error("max_children_per_node must be at least 1, got {0}")]
	MaxChildrenZero(u32),

	/// The interner's fixed capacity must be a power of two (required by
	/// its open-addressing probe scheme).
	#[error("interner_capacity must be a power of two, got {0}")]
	InternerCapacityNotPowerOfTwo(u32),

	/// `drain_batch_size` must be at least 1.
	#[error("drain_batch_size must be at least 1, got {0}")]
	DrainBatchSizeZero(u32),

	/// `drain_interval` must be at least 1.
	#[error("drain_interval must be at least 1, got {0}")]
	DrainIntervalZero(u32),
}
