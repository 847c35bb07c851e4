//! Construction-time configuration.
//!
//! The core does not parse command lines, environment variables, or files -
//! it only accepts a configuration record supplied by the embedder.

use crate::error::ConfigError;

/// Whether the first recorded site for an object is treated as the
/// allocator factory or as the first application method that touched it.
/// The core treats "root" as simply "the site passed in for the first
/// `record` on an object" either way - this only documents intent for
/// anyone inspecting a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrackingPolicy {
	/// The first site ever recorded for an object is its root, regardless of
	/// whether it is an allocator.
	FirstTouchRoot,
	/// The instrumentation layer only calls `record` for allocator sites as
	/// the first call; intermediate policy semantics are identical in the
	/// core, this variant only documents the instrumentation contract.
	AllocatorRoot,
}

/// Construction-time configuration for a [`Tracker`](crate::Tracker).
///
/// All fields have sensible documented defaults via
/// [`TrackerConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
	/// Global trie node cap. Default `1_000_000`.
	pub max_nodes: u64,
	/// Maximum path depth. Default `100`.
	pub max_depth: u32,
	/// Per-node fan-out cap. Default `100`.
	pub max_children_per_node: u32,
	/// Fixed interner slot count; must be a power of two. Default `2 * max_nodes`,
	/// clamped to `u32::MAX` and rounded up to a power of two.
	pub interner_capacity: u32,
	/// Finalization-drain batch size. Default `100`.
	pub drain_batch_size: u32,
	/// Per-thread drain frequency (every Nth `acquire_or_get` call). Default `100`.
	pub drain_interval: u32,
	/// Snapshot push period in milliseconds. Default `60_000`.
	pub push_interval_ms: u64,
	/// Root-assignment policy. Default [`TrackingPolicy::FirstTouchRoot`].
	pub tracking_policy: TrackingPolicy,
	/// Whether a `release`-equivalent site is only recorded when the metric
	/// transitions to zero. Default `true`.
	pub release_only_at_zero: bool,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		let max_nodes = 1_000_000u64;
		TrackerConfig {
			max_nodes,
			max_depth: 100,
			max_children_per_node: 100,
			interner_capacity: default_interner_capacity(max_nodes),
			drain_batch_size: 100,
			drain_interval: 100,
			push_interval_ms: 60_000,
			tracking_policy: TrackingPolicy::FirstTouchRoot,
			release_only_at_zero: true,
		}
	}
}

fn default_interner_capacity(max_nodes: u64) -> u32 {
	let doubled = max_nodes.saturating_mul(2).min(u32::MAX as u64) as u32;
	doubled.max(2).next_power_of_two()
}

impl TrackerConfig {
	/// Validates the configuration, returning the first violated constraint.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_nodes == 0 {
			return Err(ConfigError::MaxNodesZero(self.max_nodes));
		}
		if self.max_depth == 0 {
			return Err(ConfigError::MaxDepthZero(self.max_depth));
		}
		if self.max_children_per_node == 0 {
			return Err(ConfigError::MaxChildrenZero(self.max_children_per_node));
		}
		if self.interner_capacity == 0 || !self.interner_capacity.is_power_of_two() {
			return Err(ConfigError::InternerCapacityNotPowerOfTwo(self.interner_capacity));
		}
		if self.drain_batch_size == 0 {
			return Err(ConfigError::DrainBatchSizeZero(self.drain_batch_size));
		}
		if self.drain_interval == 0 {
			return Err(ConfigError::DrainIntervalZero(self.drain_interval));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_validates() {
		assert!(TrackerConfig::default().validate().is_ok());
	}

	#[test]
	fn zero_max_nodes_rejected() {
		let mut cfg = TrackerConfig::default();
		cfg.max_nodes = 0;
		assert_eq!(cfg.validate(), Err(ConfigError::MaxNodesZero(0)));
	}

	#[test]
	fn non_power_of_two_interner_capacity_rejected() {
		let mut cfg = TrackerConfig::default();
		cfg.interner_capacity = 3;
		assert_eq!(cfg.validate(), Err(ConfigError::InternerCapacityNotPowerOfTwo(3)));
	}

	#[test]
	fn default_interner_capacity_is_power_of_two() {
		assert!(TrackerConfig::default().interner_capacity.is_power_of_two());
	}
}
