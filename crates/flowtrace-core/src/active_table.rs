//! Identity-keyed map from live tracked objects to their flow cursor, plus
//! the finalization queue that drives leak detection.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::flow_slot::{FlowSlot, SlotPool};
use crate::leak_pipeline::{EventSink, LeakEvent};
use crate::node::TrieNode;
use crate::site::MethodSite;
use crate::trie::Trie;

/// Caller-supplied stable identity for a tracked object - typically its
/// address cast to an integer, since Rust has no intrinsic identity hash
/// for arbitrary values.
pub type ObjectId = u64;

const N_SHARDS: usize = 16;

/// A live object's entry in the active table.
pub struct ActiveEntry {
	pub(crate) slot: Arc<FlowSlot>,
	pub(crate) root_site: MethodSite,
	pub(crate) is_direct: bool,
}

thread_local! {
	static DRAIN_CALL_COUNT: Cell<u32> = const { Cell::new(0) };
}

/// Identity-hash map from live tracked objects to their current trie
/// cursor, with a finalization queue feeding leak detection.
pub struct ActiveTable {
	shards: [Mutex<FxHashMap<ObjectId, ActiveEntry>>; N_SHARDS],
	finalization_queue: SegQueue<ObjectId>,
	finalization_queue_len: AtomicU64,
	slot_pool: Arc<SlotPool>,
	drain_batch_size: u32,
	drain_interval: u32,
}

fn shard_index(id: ObjectId) -> usize {
	(id as usize).wrapping_mul(0x9E3779B97F4A7C15) % N_SHARDS
}

impl ActiveTable {
	pub fn new(drain_batch_size: u32, drain_interval: u32) -> Self {
		ActiveTable {
			shards: std::array::from_fn(|_| Mutex::new(FxHashMap::default())),
			finalization_queue: SegQueue::new(),
			finalization_queue_len: AtomicU64::new(0),
			slot_pool: SlotPool::new(),
			drain_batch_size,
			drain_interval,
		}
	}

	/// Looks up the flow slot for `id`, creating a fresh `ActiveEntry`
	/// positioned at `root_site`'s trie root if this is the first recording
	/// for this object; `root_metric` is that first recording's metric,
	/// used to bucket a newly created root. Returns `(slot, created)`.
	///
	/// Before creating, drains the finalization queue per the drain policy:
	/// the first call on a thread always drains once; subsequent calls
	/// drain once every `drain_interval` calls.
	pub fn acquire_or_get(&self, id: ObjectId, root_site_name: &str, root_metric: u64, is_direct: bool, trie: &Trie, sink: &EventSink) -> (Arc<FlowSlot>, bool) {
		self.maybe_drain_for_this_thread(trie, sink);

		let shard = &self.shards[shard_index(id)];
		{
			let guard = shard.lock();
			if let Some(entry) = guard.get(&id) {
				return (entry.slot.clone(), false);
			}
		}

		let root = trie.get_or_create_root(root_site_name, root_metric);
		let root_site = root.site().clone();
		let pooled = self.slot_pool.acquire(root);
		let slot = pooled.into_leaked();

		let mut guard = shard.lock();
		if let Some(entry) = guard.get(&id) {
			// Lost the race: another thread inserted first. Release our
			// just-acquired slot back to the pool.
			self.slot_pool.release(slot);
			return (entry.slot.clone(), false);
		}
		guard.insert(id, ActiveEntry { slot: slot.clone(), root_site, is_direct });
		(slot, true)
	}

	fn maybe_drain_for_this_thread(&self, trie: &Trie, sink: &EventSink) {
		let should_drain = DRAIN_CALL_COUNT.with(|counter| {
			let value = counter.get();
			counter.set(value.wrapping_add(1));
			value % self.drain_interval == 0
		});
		if should_drain {
			self.drain_finalization_queue(self.drain_batch_size as usize, trie, sink);
		}
	}

	/// Marks `id` as cleanly released: sets the slot's completed flag and
	/// records a clean outcome on its current node. The entry is **not**
	/// removed here - it stays in the map until the finalization queue
	/// eventually processes it, which in this Rust port is the caller's own
	/// `Drop`-driven `notify_unreachable` call rather than a GC
	/// weak-reference clear.
	pub fn mark_clean_released(&self, id: ObjectId) {
		let shard = &self.shards[shard_index(id)];
		let guard = shard.lock();
		if let Some(entry) = guard.get(&id) {
			entry.slot.mark_completed();
			entry.slot.cursor().record_outcome(true);
		}
	}

	/// Records the finalization ("unreachable") event for the object
	/// identified by `id`. Approximates queue length eagerly so
	/// `pending_finalizations` stays useful without a separate lock.
	pub fn notify_unreachable(&self, id: ObjectId) {
		self.finalization_queue.push(id);
		self.finalization_queue_len.fetch_add(1, Ordering::Relaxed);
	}

	/// Drains up to `limit` finalization notices: objects that never
	/// reached a clean release get a leak outcome recorded on their current
	/// node and a [`LeakEvent`] enqueued to `sink`; their slot returns to
	/// the pool and their `ActiveEntry` is removed either way. Returns the
	/// number of notices processed.
	pub fn drain_finalization_queue(&self, limit: usize, _trie: &Trie, sink: &EventSink) -> usize {
		let mut processed = 0;
		while processed < limit {
			let Some(id) = self.finalization_queue.pop() else { break };
			self.finalization_queue_len.fetch_sub(1, Ordering::Relaxed);
			processed += 1;

			let shard = &self.shards[shard_index(id)];
			let entry = shard.lock().remove(&id);
			let Some(entry) = entry else { continue };

			let leaf: Arc<TrieNode> = entry.slot.cursor();
			if !entry.slot.is_completed() {
				leaf.record_outcome(false);
				sink.record(LeakEvent::new(leaf, entry.root_site, entry.is_direct));
			}
			self.slot_pool.release(entry.slot);
		}
		processed
	}

	/// Drains the finalization queue to exhaustion, regardless of `limit`
	/// (used by [`Tracker::shutdown`](crate::Tracker::shutdown)).
	pub fn drain_finalization_queue_fully(&self, trie: &Trie, sink: &EventSink) -> usize {
		let mut total = 0;
		loop {
			let n = self.drain_finalization_queue(usize::MAX, trie, sink);
			total += n;
			if n == 0 {
				break;
			}
		}
		total
	}

	/// Forces every remaining active entry to be treated as a leak: used by
	/// shutdown, where objects that are still live (and may never be
	/// explicitly dropped before process exit) must still be accounted for.
	pub fn force_leak_remaining(&self, sink: &EventSink) -> usize {
		let mut count = 0;
		for shard in &self.shards {
			let mut guard = shard.lock();
			for (_, entry) in guard.drain() {
				if !entry.slot.is_completed() {
					let leaf = entry.slot.cursor();
					leaf.record_outcome(false);
					sink.record(LeakEvent::new(leaf, entry.root_site, entry.is_direct));
					count += 1;
				}
				self.slot_pool.release(entry.slot);
			}
		}
		count
	}

	/// Whether `id` currently has a live entry (used by `Tracker::is_tracking`).
	pub fn contains(&self, id: ObjectId) -> bool {
		self.shards[shard_index(id)].lock().contains_key(&id)
	}

	/// Literal count of entries currently in the table, including completed
	/// entries awaiting their finalization notice (see `DESIGN.md` for why
	/// this counts literally rather than excluding not-yet-reaped entries).
	pub fn active_flow_count(&self) -> usize {
		self.shards.iter().map(|shard| shard.lock().len()).sum()
	}

	/// Approximate count of unprocessed finalization notices.
	pub fn pending_finalizations(&self) -> u64 {
		self.finalization_queue_len.load(Ordering::Relaxed)
	}

	/// Clears every active entry and finalization notice (test hook).
	pub fn reset(&self) {
		for shard in &self.shards {
			shard.lock().clear();
		}
		while self.finalization_queue.pop().is_some() {}
		self.finalization_queue_len.store(0, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::TrackerConfig;

	fn fresh(config: &TrackerConfig) -> (Trie, ActiveTable, EventSink) {
		let trie = Trie::new(config.interner_capacity, config.max_nodes, config.max_depth, config.max_children_per_node);
		let table = ActiveTable::new(config.drain_batch_size, config.drain_interval);
		let sink = EventSink::new();
		(trie, table, sink)
	}

	#[test]
	fn first_touch_creates_entry_positioned_at_root() {
		let config = TrackerConfig::default();
		let (trie, table, sink) = fresh(&config);
		let (slot, created) = table.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink);
		assert!(created);
		assert_eq!(slot.cursor().site().as_str(), "A.alloc");
		assert_eq!(table.active_flow_count(), 1);
	}

	#[test]
	fn second_touch_returns_existing_entry() {
		let config = TrackerConfig::default();
		let (trie, table, sink) = fresh(&config);
		let (s1, _) = table.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink);
		let (s2, created) = table.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink);
		assert!(!created);
		assert!(Arc::ptr_eq(&s1, &s2));
	}

	#[test]
	fn clean_release_then_finalization_is_not_a_leak() {
		let config = TrackerConfig::default();
		let (trie, table, sink) = fresh(&config);
		table.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink);
		table.mark_clean_released(1);
		table.notify_unreachable(1);
		table.drain_finalization_queue(10, &trie, &sink);
		assert_eq!(sink.drain().len(), 0);
		assert_eq!(table.active_flow_count(), 0);
	}

	#[test]
	fn finalization_without_clean_release_is_a_leak() {
		let config = TrackerConfig::default();
		let (trie, table, sink) = fresh(&config);
		table.acquire_or_get(2, "A.alloc", 1, true, &trie, &sink);
		table.notify_unreachable(2);
		table.drain_finalization_queue(10, &trie, &sink);
		let events = sink.drain();
		assert_eq!(events.len(), 1);
		assert!(events[0].is_direct);
		assert_eq!(table.active_flow_count(), 0);
	}

	#[test]
	fn force_leak_remaining_accounts_for_every_live_entry() {
		let config = TrackerConfig::default();
		let (trie, table, sink) = fresh(&config);
		table.acquire_or_get(1, "A.alloc", 1, false, &trie, &sink);
		table.acquire_or_get(2, "B.alloc", 1, false, &trie, &sink);
		table.mark_clean_released(1);
		let leaked = table.force_leak_remaining(&sink);
		assert_eq!(leaked, 1);
		assert_eq!(table.active_flow_count(), 0);
	}
}
