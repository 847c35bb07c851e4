//! The single entry point instrumentation calls on every tracked operation.

use std::cell::{Cell, RefCell};
use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::active_table::{ActiveTable, ObjectId};
use crate::config::TrackerConfig;
use crate::leak_pipeline::EventSink;
use crate::site::RETURN_SUFFIX;
use crate::trie::Trie;

thread_local! {
	static REENTRANT: Cell<bool> = const { Cell::new(false) };
	/// `(object_id, site hash, metric)` of the last call recorded on this
	/// thread, used to suppress exact duplicate entry/exit recordings
	/// without keeping a full per-object history.
	static LAST_CALL: RefCell<Option<(ObjectId, u64, u64)>> = const { RefCell::new(None) };
	/// Identity hash `(object_id, metric)` of the most recent non-`_return`
	/// call recorded on this thread, consumed by the matching `_return` exit
	/// regardless of its site name - this is what collapses an entry/exit
	/// instrumentation pair for the same operation into one hop.
	static PENDING_ENTRY: RefCell<Option<(ObjectId, u64)>> = const { RefCell::new(None) };
}

struct ReentranceGuard;

impl ReentranceGuard {
	fn try_acquire() -> Option<Self> {
		let already_recording = REENTRANT.with(|flag| flag.replace(true));
		if already_recording {
			None
		} else {
			Some(ReentranceGuard)
		}
	}
}

impl Drop for ReentranceGuard {
	fn drop(&mut self) {
		REENTRANT.with(|flag| flag.set(false));
	}
}

fn fx_hash(s: &str) -> u64 {
	let mut hasher = FxHasher::default();
	hasher.write(s.as_bytes());
	hasher.finish()
}

/// Stateless recording surface. All actual state lives in the [`Trie`],
/// [`ActiveTable`], and [`EventSink`] passed into every call - this type
/// exists only to carry the thread-local re-entrance and dedup bookkeeping
/// behind a narrow, documented API.
#[derive(Default)]
pub struct Recorder;

impl Recorder {
	pub fn new() -> Self {
		Recorder
	}

	/// Records one call-site observation for `object_id`.
	///
	/// 1. Re-entrant calls on the same thread (e.g. a handler callback that
	///    itself touches a tracked object) are dropped silently.
	/// 2. A `_return` exit whose `(object_id, metric)` matches the immediately
	///    preceding non-`_return` entry on this thread is dropped silently,
	///    regardless of the two calls' site names - this is the entry/exit
	///    double-instrumentation case.
	/// 3. Exact duplicates of the immediately preceding call on this thread
	///    (same object, same site, same metric) are dropped silently.
	/// 4. First observation of `object_id` creates its `ActiveEntry`
	///    positioned at `site_name`'s root.
	/// 5. Subsequent observations advance the object's flow-slot cursor one
	///    hop via [`Trie::traverse_or_create`].
	/// 6. A metric of exactly zero is always treated as a clean release
	///    (`release_only_at_zero` is instrumentation-layer guidance; the
	///    core has no notion of a dedicated "release site" distinct from
	///    the metric reaching zero, so it is honored unconditionally here).
	///
	/// Infallible by construction: no branch here can return an error.
	pub fn record(&self, trie: &Trie, active: &ActiveTable, sink: &EventSink, config: &TrackerConfig, object_id: ObjectId, site_name: &str, metric: u64) {
		let Some(_guard) = ReentranceGuard::try_acquire() else {
			return;
		};

		let is_return = site_name.ends_with(RETURN_SUFFIX);

		if is_return {
			let suppressed = PENDING_ENTRY.with(|cell| {
				let mut pending = cell.borrow_mut();
				if *pending == Some((object_id, metric)) {
					*pending = None;
					true
				} else {
					false
				}
			});
			if suppressed {
				return;
			}
		}

		let dedup_key = (object_id, fx_hash(site_name), metric);
		let is_duplicate = LAST_CALL.with(|cell| cell.replace(Some(dedup_key)) == Some(dedup_key));
		if is_duplicate {
			return;
		}

		if !is_return {
			PENDING_ENTRY.with(|cell| *cell.borrow_mut() = Some((object_id, metric)));
		}

		let is_direct = matches!(config.tracking_policy, crate::config::TrackingPolicy::AllocatorRoot);
		let (slot, created) = active.acquire_or_get(object_id, site_name, metric, is_direct, trie, sink);

		if created {
			slot.cursor().record_traversal();
		} else {
			let next = trie.traverse_or_create(&slot.cursor(), site_name, metric, slot.depth());
			slot.advance(next.clone());
			next.record_traversal();
		}

		if metric == 0 {
			active.mark_clean_released(object_id);
		}
	}

	/// Whether `object_id` currently has a live entry in the active table.
	pub fn is_tracking(&self, active: &ActiveTable, object_id: ObjectId) -> bool {
		active.contains(object_id)
	}

	/// Clears this thread's dedup cache (test hook).
	pub fn reset(&self) {
		LAST_CALL.with(|cell| *cell.borrow_mut() = None);
		PENDING_ENTRY.with(|cell| *cell.borrow_mut() = None);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::TrackerConfig;

	fn fresh() -> (Trie, ActiveTable, EventSink, TrackerConfig, Recorder) {
		let config = TrackerConfig::default();
		let trie = Trie::new(config.interner_capacity, config.max_nodes, config.max_depth, config.max_children_per_node);
		let active = ActiveTable::new(config.drain_batch_size, config.drain_interval);
		let sink = EventSink::new();
		let recorder = Recorder::new();
		(trie, active, sink, config, recorder)
	}

	#[test]
	fn first_call_creates_tracking_entry() {
		let (trie, active, sink, config, recorder) = fresh();
		assert!(!recorder.is_tracking(&active, 1));
		recorder.record(&trie, &active, &sink, &config, 1, "A.alloc", 1);
		assert!(recorder.is_tracking(&active, 1));
	}

	#[test]
	fn second_call_advances_the_cursor() {
		let (trie, active, sink, config, recorder) = fresh();
		recorder.record(&trie, &active, &sink, &config, 1, "A.alloc", 1);
		recorder.record(&trie, &active, &sink, &config, 1, "B.use", 2);
		let entry_depth = active.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink).0.depth();
		assert_eq!(entry_depth, 1);
	}

	#[test]
	fn zero_metric_marks_clean_release() {
		let (trie, active, sink, config, recorder) = fresh();
		recorder.record(&trie, &active, &sink, &config, 1, "A.alloc", 1);
		recorder.record(&trie, &active, &sink, &config, 1, "A.release", 0);
		active.notify_unreachable(1);
		active.drain_finalization_queue(10, &trie, &sink);
		assert_eq!(sink.drain().len(), 0, "clean release must not be reported as a leak");
	}

	#[test]
	fn exact_duplicate_call_is_suppressed() {
		let (trie, active, sink, config, recorder) = fresh();
		recorder.record(&trie, &active, &sink, &config, 1, "A.alloc", 1);
		let (slot, _) = active.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink);
		let depth_before = slot.depth();
		recorder.record(&trie, &active, &sink, &config, 1, "A.alloc", 1);
		assert_eq!(slot.depth(), depth_before, "identical repeated call must not advance the cursor again");
	}

	#[test]
	fn entry_exit_pair_with_same_metric_is_suppressed() {
		let (trie, active, sink, config, recorder) = fresh();
		recorder.record(&trie, &active, &sink, &config, 1, "C.m", 3);
		let node_count_after_entry = trie.node_count();
		recorder.record(&trie, &active, &sink, &config, 1, "C.m_return", 3);
		assert_eq!(trie.node_count(), node_count_after_entry, "the _return exit of the same observation must not create a second hop");
	}

	#[test]
	fn return_with_different_metric_is_not_suppressed() {
		let (trie, active, sink, config, recorder) = fresh();
		recorder.record(&trie, &active, &sink, &config, 1, "C.m", 3);
		let node_count_after_entry = trie.node_count();
		recorder.record(&trie, &active, &sink, &config, 1, "C.m_return", 4);
		assert!(trie.node_count() > node_count_after_entry, "a _return with a different metric is a genuine new observation");
	}

	#[test]
	fn reentrant_call_on_same_thread_is_dropped() {
		struct ReentrantHarness<'a> {
			trie: &'a Trie,
			active: &'a ActiveTable,
			sink: &'a EventSink,
			config: &'a TrackerConfig,
			recorder: &'a Recorder,
		}
		let (trie, active, sink, config, recorder) = fresh();
		let harness = ReentrantHarness { trie: &trie, active: &active, sink: &sink, config: &config, recorder: &recorder };

		let _guard = ReentranceGuard::try_acquire().expect("first acquire must succeed");
		harness.recorder.record(harness.trie, harness.active, harness.sink, harness.config, 99, "X.reentrant", 1);
		assert!(!harness.recorder.is_tracking(harness.active, 99));
	}
}
