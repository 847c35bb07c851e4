//! Coarse bucketing of the external refcount metric into trie node identity.

/// Coarse category of a tracked object's external metric (typically a
/// refcount). Part of a [`TrieNode`](crate::node::TrieNode)'s identity: two
/// traversals with the same site but different buckets land on different
/// children, so the trie distinguishes "still live" paths from the
/// clean-release endpoint without storing the raw metric per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefBucket {
	/// Metric is exactly zero - the clean-release endpoint.
	Zero,
	/// Metric is 1 or 2.
	Low,
	/// Metric is 3 to 5.
	Mid,
	/// Metric is 6 or greater.
	High,
}

impl RefBucket {
	/// Buckets a raw metric value into its coarse category.
	pub fn from_metric(metric: u64) -> Self {
		match metric {
			0 => RefBucket::Zero,
			1..=2 => RefBucket::Low,
			3..=5 => RefBucket::Mid,
			_ => RefBucket::High,
		}
	}

	/// The bucket label used in rendered paths (`ref=<b>`) and snapshot
	/// lines.
	pub fn label(self) -> u8 {
		match self {
			RefBucket::Zero => 0,
			RefBucket::Low => 1,
			RefBucket::Mid => 2,
			RefBucket::High => 3,
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn buckets_match_spec_ranges() {
		assert_eq!(RefBucket::from_metric(0), RefBucket::Zero);
		assert_eq!(RefBucket::from_metric(1), RefBucket::Low);
		assert_eq!(RefBucket::from_metric(2), RefBucket::Low);
		assert_eq!(RefBucket::from_metric(3), RefBucket::Mid);
		assert_eq!(RefBucket::from_metric(5), RefBucket::Mid);
		assert_eq!(RefBucket::from_metric(6), RefBucket::High);
		assert_eq!(RefBucket::from_metric(u64::MAX), RefBucket::High);
	}

	#[test]
	fn labels_are_stable() {
		assert_eq!(RefBucket::Zero.label(), 0);
		assert_eq!(RefBucket::Low.label(), 1);
		assert_eq!(RefBucket::Mid.label(), 2);
		assert_eq!(RefBucket::High.label(), 3);
	}
}
