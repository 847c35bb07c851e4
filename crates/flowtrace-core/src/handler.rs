//! Handler registration surface: external consumers of periodic leak
//! snapshots.

/// A metric a [`Handler`] needs present in a tracked type's recordings to be
/// useful. The core itself only understands the refcount-style metric
/// bucketed by [`RefBucket`](crate::bucket::RefBucket); this enum exists so a
/// handler can declare intent even as more `TrackedTypeHandler` metric
/// kinds are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
	/// A reference-count-shaped metric: zero means released.
	RefCount,
}

/// A snapshot of one aggregated leak path, as built by
/// [`EventSink::push_snapshot`](crate::leak_pipeline::EventSink::push_snapshot).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LeakSnapshot {
	/// The stable wire-format line.
	pub line: String,
	/// The root call site name.
	pub root_site: String,
	/// Number of finalizations aggregated into this line.
	pub leak_count: u64,
	/// Whether the root was reached via a direct allocator call.
	pub is_direct: bool,
}

/// An external consumer of periodic leak snapshots.
///
/// Grounded on the scheduler/handler split in `scheduler.rs`: handlers are
/// plain trait objects invoked synchronously from the push loop, not
/// separately scheduled tasks.
pub trait Handler: Send + Sync {
	/// Metrics this handler needs recorded for a tracked type to be worth
	/// reporting on. An empty slice means "any".
	fn required_metrics(&self) -> &[MetricKind] {
		&[MetricKind::RefCount]
	}

	/// Called once per aggregated leak path on every `push_snapshot`.
	fn on_snapshot(&self, snapshot: &LeakSnapshot);

	/// A short, stable name for logging.
	fn name(&self) -> &str;
}
