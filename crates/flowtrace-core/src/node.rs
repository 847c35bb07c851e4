//! One call site on one path, with saturating counters and a bounded child
//! map.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::bucket::RefBucket;
use crate::site::MethodSite;

/// Traversal count occupies the low 40 bits of the packed counter word.
const TRAVERSAL_BITS: u32 = 40;
const TRAVERSAL_MASK: u64 = (1u64 << TRAVERSAL_BITS) - 1;
const TRAVERSAL_MAX: u64 = TRAVERSAL_MASK;

/// Leak count occupies the next 24 bits.
const LEAK_SHIFT: u32 = TRAVERSAL_BITS;
const LEAK_MASK: u64 = ((1u64 << 24) - 1) << LEAK_SHIFT;
const LEAK_MAX: u64 = (1u64 << 24) - 1;

/// Maximum distinct children a single node may hold.
pub const MAX_CHILDREN_HARD_CAP: u32 = 100;

/// One call site on one path through the trie.
///
/// Node identity is `(site, bucket, parent)`; two logically identical paths
/// share all nodes because lookups always go through
/// [`Trie::get_or_create_root`](crate::trie::Trie::get_or_create_root) /
/// [`TrieNode::get_or_create_child`].
pub struct TrieNode {
	pub(crate) site: MethodSite,
	pub(crate) bucket: RefBucket,
	parent: Option<Weak<TrieNode>>,
	children: Mutex<FxHashMap<(MethodSite, RefBucket), Arc<TrieNode>>>,
	max_children: u32,
	/// Packed word: bits 0..40 traversal count, bits 40..64 leak count, both
	/// saturating.
	counters: AtomicU64,
	/// Hint flag set when at least one clean outcome has been recorded here.
	/// Not required for correctness (leak/traversal counters are
	/// authoritative); useful for cheap "has this leaf ever seen a clean
	/// exit" queries without decoding the packed word.
	clean_outcome: AtomicBool,
}

impl TrieNode {
	pub(crate) fn new_root(site: MethodSite, bucket: RefBucket, max_children: u32) -> Arc<Self> {
		Arc::new(TrieNode {
			site,
			bucket,
			parent: None,
			children: Mutex::new(FxHashMap::default()),
			max_children,
			counters: AtomicU64::new(0),
			clean_outcome: AtomicBool::new(false),
		})
	}

	fn new_child(site: MethodSite, bucket: RefBucket, parent: &Arc<TrieNode>, max_children: u32) -> Arc<Self> {
		Arc::new(TrieNode {
			site,
			bucket,
			parent: Some(Arc::downgrade(parent)),
			children: Mutex::new(FxHashMap::default()),
			max_children,
			counters: AtomicU64::new(0),
			clean_outcome: AtomicBool::new(false),
		})
	}

	/// The call site this node represents.
	pub fn site(&self) -> &MethodSite {
		&self.site
	}

	/// The refcount bucket this node represents.
	pub fn bucket(&self) -> RefBucket {
		self.bucket
	}

	/// The parent node, if any (`None` for roots). Upgrading can only fail
	/// if the owning [`Trie`](crate::trie::Trie) has been reset, which drops
	/// every `Arc` in the root table and transitively every descendant.
	pub fn parent(&self) -> Option<Arc<TrieNode>> {
		self.parent.as_ref().and_then(Weak::upgrade)
	}

	/// Current saturating traversal count.
	pub fn traversals(&self) -> u64 {
		self.counters.load(Ordering::Relaxed) & TRAVERSAL_MASK
	}

	/// Current saturating leak count.
	pub fn leaks(&self) -> u64 {
		(self.counters.load(Ordering::Relaxed) & LEAK_MASK) >> LEAK_SHIFT
	}

	/// Whether a clean outcome has ever been recorded at this node.
	pub fn has_clean_outcome(&self) -> bool {
		self.clean_outcome.load(Ordering::Relaxed)
	}

	/// Atomically increments the traversal field, saturating at `2^40 - 1`.
	pub fn record_traversal(&self) {
		self.packed_increment(1, 0);
	}

	/// Records a terminal outcome: sets the clean-outcome hint, or
	/// increments the saturating leak field.
	pub fn record_outcome(&self, clean: bool) {
		if clean {
			self.clean_outcome.store(true, Ordering::Relaxed);
		} else {
			self.packed_increment(0, 1);
		}
	}

	/// CAS-loop increment of the packed word, each field saturating
	/// independently.
	fn packed_increment(&self, traversal_delta: u64, leak_delta: u64) {
		let mut current = self.counters.load(Ordering::Relaxed);
		loop {
			let traversal = current & TRAVERSAL_MASK;
			let leak = (current & LEAK_MASK) >> LEAK_SHIFT;

			let new_traversal = if traversal_delta > 0 { (traversal + traversal_delta).min(TRAVERSAL_MAX) } else { traversal };
			let new_leak = if leak_delta > 0 { (leak + leak_delta).min(LEAK_MAX) } else { leak };

			if new_traversal == traversal && new_leak == leak {
				return;
			}

			let new_word = new_traversal | (new_leak << LEAK_SHIFT);
			match self.counters.compare_exchange_weak(current, new_word, Ordering::Relaxed, Ordering::Relaxed) {
				Ok(_) => return,
				Err(observed) => current = observed,
			}
		}
	}

	/// Looks up or creates the child for `(site, bucket)`.
	///
	/// If the child already exists, returns it. If it does not and the map
	/// already holds `max_children` entries, returns `self` unchanged
	/// (bounded fan-out: further distinct children on this path are
	/// suppressed). Otherwise creates and inserts a new child, returning it.
	/// Concurrent creation for the same key is resolved by the map's mutex:
	/// exactly one inserting thread wins, the rest observe the winner's
	/// entry on their own lock acquisition and return it instead.
	pub fn get_or_create_child(self: &Arc<Self>, site: MethodSite, bucket: RefBucket) -> Arc<TrieNode> {
		let key = (site.clone(), bucket);
		let mut children = self.children.lock();

		if let Some(existing) = children.get(&key) {
			return existing.clone();
		}

		if children.len() as u32 >= self.max_children.min(MAX_CHILDREN_HARD_CAP) {
			return self.clone();
		}

		let child = TrieNode::new_child(site, bucket, self, self.max_children);
		children.insert(key, child.clone());
		child
	}

	/// Number of children currently present (for tests/diagnostics).
	pub fn child_count(&self) -> usize {
		self.children.lock().len()
	}

	/// Looks up a child without creating one. Used once the trie is
	/// saturated, where even the no-op insert path must not run.
	pub(crate) fn existing_child(&self, site: &MethodSite, bucket: RefBucket) -> Option<Arc<TrieNode>> {
		self.children.lock().get(&(site.clone(), bucket)).cloned()
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use crate::interner::StringInterner;
	use proptest::prelude::*;
	use std::thread;

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]
		#[test]
		fn concurrent_traversals_sum_exactly_up_to_saturation(thread_count in 2usize..8, per_thread in 1u64..200) {
			let interner = StringInterner::new(16);
			let node = TrieNode::new_root(interner.intern("A.alloc"), RefBucket::Zero, 100);

			thread::scope(|scope| {
				for _ in 0..thread_count {
					let node = &node;
					scope.spawn(move || {
						for _ in 0..per_thread {
							node.record_traversal();
						}
					});
				}
			});

			let expected = (thread_count as u64) * per_thread;
			prop_assert_eq!(node.traversals(), expected.min(TRAVERSAL_MAX));
		}
	}
}
