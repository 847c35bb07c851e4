//! Built-in [`Handler`] implementations for `flowtrace-core`.

use flowtrace_core::{Handler, LeakSnapshot};
use parking_lot::Mutex;
use tracing::warn;

/// Emits one `tracing::warn!` event per aggregated leak path.
///
/// Grounded on `editor`'s `metrics.rs` convention of logging at `warn!` for
/// conditions that are notable but not fatal to the running process.
#[derive(Debug, Default)]
pub struct TracingHandler {
	target: &'static str,
}

impl TracingHandler {
	pub fn new() -> Self {
		TracingHandler { target: "flowtrace" }
	}

	/// Overrides the `tracing` target events are emitted under.
	pub fn with_target(target: &'static str) -> Self {
		TracingHandler { target }
	}
}

impl Handler for TracingHandler {
	fn on_snapshot(&self, snapshot: &LeakSnapshot) {
		warn!(target: self.target, root_site = %snapshot.root_site, leak_count = snapshot.leak_count, is_direct = snapshot.is_direct, "{}", snapshot.line);
	}

	fn name(&self) -> &str {
		"tracing"
	}
}

/// Collects every snapshot it sees, for tests and for embedding
/// applications that want to poll rather than log.
#[derive(Default)]
pub struct CollectingHandler {
	snapshots: Mutex<Vec<LeakSnapshot>>,
}

impl CollectingHandler {
	pub fn new() -> Self {
		CollectingHandler::default()
	}

	/// Returns and clears every snapshot collected so far.
	pub fn take(&self) -> Vec<LeakSnapshot> {
		std::mem::take(&mut self.snapshots.lock())
	}

	/// Number of snapshots collected so far without clearing them.
	pub fn len(&self) -> usize {
		self.snapshots.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Handler for CollectingHandler {
	fn on_snapshot(&self, snapshot: &LeakSnapshot) {
		self.snapshots.lock().push(snapshot.clone());
	}

	fn name(&self) -> &str {
		"collecting"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flowtrace_core::Tracker;
	use std::sync::Arc;

	#[test]
	fn collecting_handler_accumulates_across_snapshots() {
		let tracker = Tracker::with_defaults();
		let collector = Arc::new(CollectingHandler::new());
		tracker.register_handler(collector.clone());

		tracker.record(1, "Buffer.alloc", 1);
		tracker.notify_unreachable(1);
		tracker.push_snapshot();

		assert_eq!(collector.len(), 1);
		let taken = collector.take();
		assert_eq!(taken.len(), 1);
		assert!(collector.is_empty());
	}
}
