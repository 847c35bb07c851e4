//! Bounded, fixed-capacity string interner.
//!
//! A conventional concurrent hash map is rejected because its worst-case
//! memory is unbounded and it allocates per insertion; this probing array
//! is cache-friendly and allocation-free post-construction (aside from the
//! one `Arc<str>` allocated per newly interned string).

use std::hash::Hasher;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHasher;

use crate::site::MethodSite;

/// Maximum number of adjacent slots probed before falling back to replacing
/// the initial-hash slot.
const MAX_PROBE: usize = 8;

/// Bounded, fixed-capacity canonicalizer for call-site strings.
///
/// `intern` always returns a valid [`MethodSite`]; under adversarial hash
/// collisions memory may exceed the nominal capacity by a small constant
/// (one `Arc<str>` per slot) but never grows unboundedly, and no entry is
/// ever individually freed short of the whole interner being dropped.
pub struct StringInterner {
	slots: Box<[RwLock<Option<MethodSite>>]>,
	mask: usize,
}

impl StringInterner {
	/// Creates an interner with the given power-of-two capacity.
	///
	/// # Panics
	/// Panics if `capacity` is zero or not a power of two; callers are
	/// expected to have validated this via
	/// [`TrackerConfig::validate`](crate::config::TrackerConfig::validate).
	pub fn new(capacity: u32) -> Self {
		assert!(capacity > 0 && capacity.is_power_of_two(), "interner capacity must be a power of two");
		let slots = (0..capacity).map(|_| RwLock::new(None)).collect::<Vec<_>>().into_boxed_slice();
		StringInterner { slots, mask: capacity as usize - 1 }
	}

	/// Interns `s`, returning the canonical [`MethodSite`] for it.
	///
	/// Probes up to [`MAX_PROBE`] adjacent slots starting at `hash(s) & mask`.
	/// The first slot holding an equal string, or the first empty slot, wins.
	/// If all probed slots hold unequal strings, the slot at the initial hash
	/// position is replaced - subsequent interns of the displaced string will
	/// yield a new, distinct [`MethodSite`]. This is documented behavior, not
	/// an error.
	pub fn intern(&self, s: &str) -> MethodSite {
		let start = (fx_hash(s) as usize) & self.mask;

		for step in 0..MAX_PROBE {
			let idx = (start + step) & self.mask;
			let slot = &self.slots[idx];

			if let Some(existing) = slot.read().as_ref() {
				if existing.as_str() == s {
					return existing.clone();
				}
				continue;
			}

			// Slot looked empty under a read lock; re-check under the write
			// lock in case another thread won the race in between.
			let mut guard = slot.write();
			match guard.as_ref() {
				Some(existing) if existing.as_str() == s => return existing.clone(),
				Some(_) => continue,
				None => {
					let site = MethodSite::from_arc(Arc::from(s));
					*guard = Some(site.clone());
					return site;
				}
			}
		}

		// All MAX_PROBE slots occupied by non-matching strings: replace the
		// initial-hash slot. Replacement is not an error.
		let mut guard = self.slots[start].write();
		let site = MethodSite::from_arc(Arc::from(s));
		*guard = Some(site.clone());
		site
	}

	/// Fixed slot count this interner was constructed with.
	pub fn capacity(&self) -> usize {
		self.slots.len()
	}
}

fn fx_hash(s: &str) -> u64 {
	let mut hasher = FxHasher::default();
	hasher.write(s.as_bytes());
	hasher.finish()
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interning_is_idempotent() {
		let interner = StringInterner::new(64);
		let a = interner.intern("Buffer.retain");
		let b = interner.intern("Buffer.retain");
		assert_eq!(a, b);
	}

	#[test]
	fn distinct_strings_get_distinct_identities() {
		let interner = StringInterner::new(64);
		let a = interner.intern("A.alloc");
		let b = interner.intern("B.use");
		assert_ne!(a, b);
	}

	#[test]
	fn full_probe_sequence_replaces_initial_slot() {
		// Capacity 1 forces every string to the same slot and the same
		// initial hash index, so the 9th distinct string (after 8 probe
		// slots collapse to 1 unique slot) always replaces it.
		let interner = StringInterner::new(1);
		let first = interner.intern("first");
		let second = interner.intern("second");
		// Both interns target the sole slot; the slot now holds "second".
		assert_ne!(first, second);
		let second_again = interner.intern("second");
		assert_eq!(second, second_again);
	}

	#[test]
	fn concurrent_interning_of_same_string_converges() {
		use std::sync::Arc as StdArc;
		use std::thread;

		let interner = StdArc::new(StringInterner::new(1024));
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let interner = StdArc::clone(&interner);
				thread::spawn(move || interner.intern("Shared.site"))
			})
			.collect();

		let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
		// Not guaranteed to be a single identity if a slot gets raced and
		// replaced, but in the common case (no collisions at this load
		// factor) all results should agree; assert the weaker, always-true
		// property: every result interns to the same string content.
		for r in &results {
			assert_eq!(r.as_str(), "Shared.site");
		}
	}
}
