//! Root table, global node-count cap, depth cap, interning gateway.

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};

use crate::bucket::RefBucket;
use crate::interner::StringInterner;
use crate::node::TrieNode;
use crate::site::MethodSite;

/// Number of shards the root table is split across, trading a little
/// memory for reduced contention on the (typically small, low-cardinality)
/// set of root sites.
const N_SHARDS: usize = 16;

/// The bounded, shared call-path trie.
///
/// Holds every root node and, transitively through each root's children, the
/// whole trie. Node memory is bounded by `max_nodes`; no node is ever
/// individually freed - the whole structure is dropped only on
/// [`Trie::reset`] or when the `Trie` itself is dropped.
pub struct Trie {
	roots: [Mutex<FxHashMap<MethodSite, Arc<TrieNode>>>; N_SHARDS],
	interner: StringInterner,
	node_count: AtomicU64,
	max_nodes: u64,
	max_depth: u32,
	max_children_per_node: u32,
}

fn shard_index(site: &MethodSite) -> usize {
	let mut hasher = FxHasher::default();
	// Hash the pointer, consistent with `MethodSite`'s own identity
	// semantics: two `MethodSite`s that are `==` must land in the same shard.
	hasher.write_usize(site.as_str().as_ptr() as usize);
	(hasher.finish() as usize) % N_SHARDS
}

impl Trie {
	/// Builds an empty trie. Callers should validate a
	/// [`TrackerConfig`](crate::config::TrackerConfig) before deriving these
	/// parameters from it.
	pub fn new(interner_capacity: u32, max_nodes: u64, max_depth: u32, max_children_per_node: u32) -> Self {
		Trie {
			roots: std::array::from_fn(|_| Mutex::new(FxHashMap::default())),
			interner: StringInterner::new(interner_capacity),
			node_count: AtomicU64::new(0),
			max_nodes,
			max_depth,
			max_children_per_node,
		}
	}

	/// Interns `site_name` and looks up or creates its root node.
	///
	/// If the node-count cap has already been reached on a miss, returns any
	/// existing root instead of creating a new one - there is no eviction,
	/// so once the trie saturates it simply stops accepting new distinct
	/// root paths.
	///
	/// `metric` is the first recorded value for the object that is
	/// establishing this root; a newly created root is bucketed from it, so
	/// e.g. an `alloc` site first seen with a metric of 1 renders as
	/// `ref=1`, not the zero/clean-release bucket. Once a root exists its
	/// bucket is fixed - later objects touching the same site with a
	/// different initial metric share the existing node.
	pub fn get_or_create_root(&self, site_name: &str, metric: u64) -> Arc<TrieNode> {
		let site = self.interner.intern(site_name);
		let shard = &self.roots[shard_index(&site)];
		let mut guard = shard.lock();

		if let Some(existing) = guard.get(&site) {
			return existing.clone();
		}

		if self.node_count.load(Ordering::Relaxed) >= self.max_nodes {
			// Saturated: no eviction, return any existing root if one
			// exists anywhere, otherwise allocate anyway (there are no
			// roots at all yet, which only happens before the very first
			// recording - accepting it keeps `record` infallible).
			if let Some(any) = self.any_root() {
				return any;
			}
		}

		let node = TrieNode::new_root(site.clone(), RefBucket::from_metric(metric), self.max_children_per_node);
		guard.insert(site, node.clone());
		self.node_count.fetch_add(1, Ordering::Relaxed);
		node
	}

	fn any_root(&self) -> Option<Arc<TrieNode>> {
		self.roots.iter().find_map(|shard| shard.lock().values().next().cloned())
	}

	/// Advances `parent` by one hop toward `(site_name, bucket(metric))`.
	///
	/// Returns `parent` unchanged, without creating anything, once
	/// `depth >= max_depth` or the trie-wide node cap is reached; the
	/// caller (the recorder) still calls `record_traversal` on whatever node
	/// this returns, so counters on the last valid node keep incrementing
	/// even past the cap.
	pub fn traverse_or_create(&self, parent: &Arc<TrieNode>, site_name: &str, metric: u64, depth: u32) -> Arc<TrieNode> {
		if depth >= self.max_depth {
			return parent.clone();
		}
		if self.node_count.load(Ordering::Relaxed) >= self.max_nodes {
			return parent.get_or_create_child_if_present(&self.interner, site_name, RefBucket::from_metric(metric)).unwrap_or_else(|| parent.clone());
		}

		let site = self.interner.intern(site_name);
		let bucket = RefBucket::from_metric(metric);
		let before = parent.child_count();
		let child = parent.get_or_create_child(site, bucket);
		if !Arc::ptr_eq(&child, parent) && parent.child_count() > before {
			self.node_count.fetch_add(1, Ordering::Relaxed);
		}
		child
	}

	/// Approximate node count (soft metric, not a precise live tally).
	pub fn node_count(&self) -> u64 {
		self.node_count.load(Ordering::Relaxed)
	}

	/// Clears every root (and transitively every node), interned string, and
	/// resets the node counter. Used by [`Tracker::reset`](crate::Tracker::reset)
	/// as a test hook; has no effect on already-published snapshots.
	pub fn reset(&self) {
		for shard in &self.roots {
			shard.lock().clear();
		}
		self.node_count.store(0, Ordering::Relaxed);
	}

	pub(crate) fn interner(&self) -> &StringInterner {
		&self.interner
	}
}

impl TrieNode {
	/// Looks up an existing child without creating one, for use once the
	/// trie is saturated and `traverse_or_create` must not allocate a new
	/// node even via the normal insert path.
	fn get_or_create_child_if_present(self: &Arc<Self>, interner: &StringInterner, site_name: &str, bucket: RefBucket) -> Option<Arc<TrieNode>> {
		let site = interner.intern(site_name);
		self.existing_child(&site, bucket)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn trie(max_nodes: u64, max_depth: u32) -> Trie {
		Trie::new(1024, max_nodes, max_depth, 100)
	}

	#[test]
	fn root_creation_is_idempotent() {
		let t = trie(100, 10);
		let r1 = t.get_or_create_root("A.alloc", 1);
		let r2 = t.get_or_create_root("A.alloc", 1);
		assert!(Arc::ptr_eq(&r1, &r2));
		assert_eq!(t.node_count(), 1);
	}

	#[test]
	fn distinct_roots_increment_node_count() {
		let t = trie(100, 10);
		t.get_or_create_root("A.alloc", 1);
		t.get_or_create_root("B.alloc", 1);
		assert_eq!(t.node_count(), 2);
	}

	#[test]
	fn traverse_or_create_builds_a_path() {
		let t = trie(100, 10);
		let root = t.get_or_create_root("A.alloc", 1);
		let n1 = t.traverse_or_create(&root, "B.use", 1, 1);
		let n2 = t.traverse_or_create(&root, "B.use", 1, 1);
		assert!(Arc::ptr_eq(&n1, &n2));
		assert_eq!(t.node_count(), 2);
	}

	#[test]
	fn exceeding_max_depth_returns_parent_unchanged() {
		let t = trie(100, 1);
		let root = t.get_or_create_root("A.alloc", 1);
		let node_count_before = t.node_count();
		let n1 = t.traverse_or_create(&root, "B.use", 1, 1);
		assert!(Arc::ptr_eq(&n1, &root));
		assert_eq!(t.node_count(), node_count_before);
	}

	#[test]
	fn saturation_stops_accepting_new_roots() {
		let t = trie(3, 10);
		let r1 = t.get_or_create_root("A", 1);
		let r2 = t.get_or_create_root("B", 1);
		let r3 = t.get_or_create_root("C", 1);
		assert_eq!(t.node_count(), 3);

		let r4 = t.get_or_create_root("D", 1);
		assert!(Arc::ptr_eq(&r4, &r1) || Arc::ptr_eq(&r4, &r2) || Arc::ptr_eq(&r4, &r3));
		assert_eq!(t.node_count(), 3, "no growth past the cap");
	}

	#[test]
	fn reset_clears_everything() {
		let t = trie(100, 10);
		t.get_or_create_root("A.alloc", 1);
		assert_eq!(t.node_count(), 1);
		t.reset();
		assert_eq!(t.node_count(), 0);
		let r = t.get_or_create_root("A.alloc", 1);
		assert_eq!(t.node_count(), 1);
		drop(r);
	}
}
