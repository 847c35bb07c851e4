//! Per-live-object cursor, pooled for reuse.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::node::TrieNode;

/// A live object's current position in the trie.
///
/// Depth is a plain (non-atomic) counter: it tolerates stale reads, since it
/// is only ever touched by the single recording critical section (guarded
/// by the recorder's re-entrance flag) that owns a given object at a time.
pub struct FlowSlot {
	cursor: parking_lot::Mutex<Arc<TrieNode>>,
	depth: AtomicU32,
	completed: AtomicBool,
}

impl FlowSlot {
	fn new(root: Arc<TrieNode>) -> Self {
		FlowSlot { cursor: parking_lot::Mutex::new(root), depth: AtomicU32::new(0), completed: AtomicBool::new(false) }
	}

	fn reset(&self, root: Arc<TrieNode>) {
		*self.cursor.lock() = root;
		self.depth.store(0, Ordering::Relaxed);
		self.completed.store(false, Ordering::Relaxed);
	}

	/// The node this object is currently positioned at.
	pub fn cursor(&self) -> Arc<TrieNode> {
		self.cursor.lock().clone()
	}

	/// Advances the cursor to `next` and increments depth by one.
	pub fn advance(&self, next: Arc<TrieNode>) {
		*self.cursor.lock() = next;
		self.depth.fetch_add(1, Ordering::Relaxed);
	}

	/// Current depth (number of hops recorded so far).
	pub fn depth(&self) -> u32 {
		self.depth.load(Ordering::Relaxed)
	}

	/// Whether a clean release has already been recorded for this object.
	pub fn is_completed(&self) -> bool {
		self.completed.load(Ordering::Relaxed)
	}

	/// Marks this object as cleanly released.
	pub fn mark_completed(&self) {
		self.completed.store(true, Ordering::Relaxed);
	}
}

/// A pooled handle to a [`FlowSlot`]; returns the slot to the pool on drop
/// unless [`PooledFlowSlot::into_leaked`] was called.
///
/// Grounded on the global-lock-free-queue tier of `secbuf`'s
/// `pool::fast::FastBufferPool` (this crate has no need for that pool's
/// additional thread-local cache tier: flow slots are acquired once per
/// live object and returned once, not in a tight per-call loop).
pub struct PooledFlowSlot {
	inner: Option<Arc<FlowSlot>>,
	pool: Arc<SlotPool>,
}

impl PooledFlowSlot {
	/// Detaches the slot from pool-on-drop bookkeeping, keeping the `Arc`
	/// alive under the caller's own ownership (used by
	/// [`ActiveTable`](crate::active_table::ActiveTable), which keeps the
	/// slot for the lifetime of an `ActiveEntry`).
	pub fn into_leaked(mut self) -> Arc<FlowSlot> {
		self.inner.take().expect("slot already taken")
	}
}

impl std::ops::Deref for PooledFlowSlot {
	type Target = FlowSlot;
	fn deref(&self) -> &FlowSlot {
		self.inner.as_ref().expect("slot already taken")
	}
}

impl Drop for PooledFlowSlot {
	fn drop(&mut self) {
		if let Some(slot) = self.inner.take() {
			self.pool.release(slot);
		}
	}
}

/// A lock-free pool of [`FlowSlot`]s, avoiding an allocation on every
/// `acquire_or_get` call for an object the active table hasn't seen yet.
pub struct SlotPool {
	free: SegQueue<Arc<FlowSlot>>,
}

impl SlotPool {
	pub fn new() -> Arc<Self> {
		Arc::new(SlotPool { free: SegQueue::new() })
	}

	/// Acquires a slot positioned at `root`, reusing a pooled one if
	/// available.
	pub fn acquire(self: &Arc<Self>, root: Arc<TrieNode>) -> PooledFlowSlot {
		let slot = match self.free.pop() {
			Some(slot) => {
				slot.reset(root);
				slot
			}
			None => Arc::new(FlowSlot::new(root)),
		};
		PooledFlowSlot { inner: Some(slot), pool: self.clone() }
	}

	/// Returns a slot to the pool for reuse.
	pub fn release(&self, slot: Arc<FlowSlot>) {
		self.free.push(slot);
	}

	/// Approximate number of idle slots (diagnostics only).
	pub fn idle_len(&self) -> usize {
		self.free.len()
	}
}
