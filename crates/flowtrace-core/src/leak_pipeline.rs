//! Leak event aggregation, stable snapshot rendering, and handler dispatch.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::handler::{Handler, LeakSnapshot, MetricKind};
use crate::node::TrieNode;
use crate::site::MethodSite;

/// A single finalization-without-clean-release signal, as raised by
/// [`ActiveTable::drain_finalization_queue`](crate::active_table::ActiveTable::drain_finalization_queue).
///
/// Carries only the leaf node the object was last positioned at; the
/// reported `leak_count` for a drained snapshot is the number of events that
/// aggregated onto the same `(leaf, root_site)` pair within that one drain,
/// not the node's lifetime total - a burst of identical leaks collapses
/// into one aggregated line whose count matches exactly how many events the
/// queue held for it at drain time.
pub struct LeakEvent {
	leaf: Arc<TrieNode>,
	root_site: MethodSite,
	is_direct: bool,
}

impl LeakEvent {
	pub(crate) fn new(leaf: Arc<TrieNode>, root_site: MethodSite, is_direct: bool) -> Self {
		LeakEvent { leaf, root_site, is_direct }
	}
}

/// Lock-free collection point for leak events, plus the handler registry
/// that periodic snapshots fan out to.
///
/// Grounded on the scheduler/event-queue split in `scheduler.rs`: raising an
/// event is a cheap lock-free push, and the work of building a
/// human-readable snapshot happens only when something actually drains the
/// queue.
pub struct EventSink {
	queue: SegQueue<LeakEvent>,
	handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl EventSink {
	pub fn new() -> Self {
		EventSink { queue: SegQueue::new(), handlers: RwLock::new(Vec::new()) }
	}

	/// Raises a raw leak signal. Never blocks.
	pub fn record(&self, event: LeakEvent) {
		self.queue.push(event);
	}

	/// Registers a handler to receive future snapshots.
	pub fn register_handler(&self, handler: Arc<dyn Handler>) {
		self.handlers.write().push(handler);
	}

	/// Whether any handler is registered. The recorder consults this to skip
	/// work entirely when no one would ever see the result: no handlers
	/// means no metric is ever required.
	pub fn is_recording(&self) -> bool {
		!self.handlers.read().is_empty()
	}

	/// Drains every queued raw event, aggregating by `(leaf, root_site)`
	/// identity, and renders one [`LeakSnapshot`] per distinct pair with
	/// `leak_count` set to how many events aggregated into it during this
	/// one drain. Does not touch the handler registry.
	pub fn drain(&self) -> Vec<LeakSnapshot> {
		let mut aggregated: FxHashMap<(usize, MethodSite), (Arc<TrieNode>, MethodSite, bool, u64)> = FxHashMap::default();
		while let Some(event) = self.queue.pop() {
			let key = (Arc::as_ptr(&event.leaf) as usize, event.root_site.clone());
			let slot = aggregated.entry(key).or_insert_with(|| (event.leaf.clone(), event.root_site.clone(), event.is_direct, 0));
			slot.3 += 1;
		}
		aggregated.into_values().map(|(leaf, root_site, is_direct, occurrences)| render_snapshot(&leaf, &root_site, is_direct, occurrences)).collect()
	}

	/// Drains queued events and dispatches one `on_snapshot` call per
	/// handler per aggregated leak path, skipping handlers whose
	/// `required_metrics` doesn't include the ref-count metric every leak
	/// event here is built from. Returns the number of distinct leak paths
	/// reported.
	pub fn push_snapshot(&self) -> usize {
		let snapshots = self.drain();
		if snapshots.is_empty() {
			return 0;
		}
		let handlers = self.handlers.read();
		for snapshot in &snapshots {
			for handler in handlers.iter() {
				let required = handler.required_metrics();
				if required.is_empty() || required.contains(&MetricKind::RefCount) {
					handler.on_snapshot(snapshot);
				}
			}
		}
		snapshots.len()
	}
}

impl Default for EventSink {
	fn default() -> Self {
		EventSink::new()
	}
}

fn render_snapshot(leaf: &Arc<TrieNode>, root_site: &MethodSite, is_direct: bool, occurrences: u64) -> LeakSnapshot {
	let mut chain: SmallVec<[Arc<TrieNode>; 8]> = SmallVec::new();
	let mut cursor = Some(leaf.clone());
	while let Some(node) = cursor {
		chain.push(node.clone());
		cursor = node.parent();
	}
	chain.reverse();

	let path = chain.iter().map(|node| format!("{}[ref={}]", node.site(), node.bucket().label())).collect::<Vec<_>>().join(" -> ");

	let line = format!("root={}|final_ref={}|leak_count={}|path={}", root_site, leaf.bucket().label(), occurrences, path);

	LeakSnapshot { line, root_site: root_site.as_str().to_string(), leak_count: occurrences, is_direct }
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bucket::RefBucket;
	use crate::interner::StringInterner;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingHandler(AtomicUsize);

	impl Handler for CountingHandler {
		fn on_snapshot(&self, _snapshot: &LeakSnapshot) {
			self.0.fetch_add(1, Ordering::Relaxed);
		}
		fn name(&self) -> &str {
			"counting"
		}
	}

	fn leaf_chain() -> (MethodSite, Arc<TrieNode>) {
		let interner = StringInterner::new(16);
		let root = TrieNode::new_root(interner.intern("A.alloc"), RefBucket::Low, 10);
		let child = root.get_or_create_child(interner.intern("B.use"), RefBucket::Low);
		(root.site().clone(), child)
	}

	#[test]
	fn identical_leak_events_collapse_to_one_snapshot() {
		let sink = EventSink::new();
		let (root_site, leaf) = leaf_chain();
		leaf.record_outcome(false);
		leaf.record_outcome(false);
		sink.record(LeakEvent::new(leaf.clone(), root_site.clone(), true));
		sink.record(LeakEvent::new(leaf, root_site, true));

		let snapshots = sink.drain();
		assert_eq!(snapshots.len(), 1);
		assert_eq!(snapshots[0].leak_count, 2);
		assert!(snapshots[0].line.contains("A.alloc"));
		assert!(snapshots[0].line.contains("B.use[ref=1]"));
	}

	#[test]
	fn leak_count_reflects_only_events_drained_this_interval() {
		let sink = EventSink::new();
		let (root_site, leaf) = leaf_chain();

		leaf.record_outcome(false);
		sink.record(LeakEvent::new(leaf.clone(), root_site.clone(), true));
		let first = sink.drain();
		assert_eq!(first.len(), 1);
		assert_eq!(first[0].leak_count, 1, "interval 1 drained exactly one event");

		leaf.record_outcome(false);
		sink.record(LeakEvent::new(leaf.clone(), root_site, true));
		let second = sink.drain();
		assert_eq!(second.len(), 1);
		assert_eq!(second[0].leak_count, 1, "interval 2 also drained exactly one event, even though the node's lifetime leak count is now 2");
		assert_eq!(leaf.leaks(), 2, "the node's own cumulative counter keeps growing independently of per-interval reporting");
	}

	#[test]
	fn push_snapshot_fans_out_to_every_handler() {
		let sink = EventSink::new();
		let (root_site, leaf) = leaf_chain();
		leaf.record_outcome(false);
		sink.record(LeakEvent::new(leaf, root_site, false));

		let h1 = Arc::new(CountingHandler(AtomicUsize::new(0)));
		let h2 = Arc::new(CountingHandler(AtomicUsize::new(0)));
		sink.register_handler(h1.clone());
		sink.register_handler(h2.clone());

		let n = sink.push_snapshot();
		assert_eq!(n, 1);
		assert_eq!(h1.0.load(Ordering::Relaxed), 1);
		assert_eq!(h2.0.load(Ordering::Relaxed), 1);
	}

	#[test]
	fn empty_queue_reports_no_recording_without_handlers() {
		let sink = EventSink::new();
		assert!(!sink.is_recording());
		sink.register_handler(Arc::new(CountingHandler(AtomicUsize::new(0))));
		assert!(sink.is_recording());
	}
}
