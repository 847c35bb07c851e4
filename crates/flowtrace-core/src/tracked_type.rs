//! Opt-in per-type tracking predicate and metric extraction via a pluggable
//! `TrackedTypeHandler` registry.
//!
//! The core is otherwise type-agnostic: everything upstream of this module
//! only ever sees an `ObjectId` and a `u64` metric. This registry is how an
//! embedder tells the tracker which of its own types to watch and how to
//! read a metric off an arbitrary value, without the core depending on any
//! of those types directly.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::active_table::ObjectId;

/// Something capable of declaring whether a value should be tracked at all,
/// and of extracting its current metric when it should be.
///
/// Implementations are expected to be cheap: `should_track` and `metric` run
/// on every `record` call for a candidate object.
pub trait TrackedTypeHandler: Send + Sync {
	/// Whether `type_name` (as reported by the instrumentation layer, e.g.
	/// via `std::any::type_name`) is one this handler covers.
	fn should_track(&self, type_name: &str) -> bool;

	/// Extracts the current metric for an object this handler covers, given
	/// its identity and the raw metric the instrumentation layer observed.
	/// Most handlers pass `raw_metric` through unchanged; this indirection
	/// exists for handlers that need to reinterpret it (e.g. a saturating
	/// counter that should be read as "distance from zero").
	fn metric(&self, _object_id: ObjectId, raw_metric: u64) -> u64 {
		raw_metric
	}

	/// A short name for diagnostics.
	fn type_name(&self) -> &str;
}

/// Built-in handler covering any reference-counted buffer type, matched by
/// a `"Buffer"` substring in the reported type name. Reads the metric as a
/// plain pass-through refcount.
pub struct BufferTypeHandler;

impl TrackedTypeHandler for BufferTypeHandler {
	fn should_track(&self, type_name: &str) -> bool {
		type_name.contains("Buffer")
	}

	fn type_name(&self) -> &str {
		"BufferTypeHandler"
	}
}

/// Copy-on-write registry of [`TrackedTypeHandler`]s.
///
/// Reads (`should_track_any`, on every candidate object) are lock-free once
/// a snapshot `Arc` is loaded; registration is rare and pays the cost of
/// cloning the handler list.
pub struct TrackedTypeRegistry {
	handlers: RwLock<Arc<Vec<Arc<dyn TrackedTypeHandler>>>>,
}

impl TrackedTypeRegistry {
	pub fn new() -> Self {
		TrackedTypeRegistry { handlers: RwLock::new(Arc::new(Vec::new())) }
	}

	/// The default registry: just [`BufferTypeHandler`].
	pub fn with_defaults() -> Self {
		let registry = TrackedTypeRegistry::new();
		registry.register(Arc::new(BufferTypeHandler));
		registry
	}

	/// Adds a handler, copying the current handler list.
	pub fn register(&self, handler: Arc<dyn TrackedTypeHandler>) {
		let mut guard = self.handlers.write();
		let mut next = (**guard).clone();
		next.push(handler);
		*guard = Arc::new(next);
	}

	/// Whether any registered handler covers `type_name`.
	pub fn should_track(&self, type_name: &str) -> bool {
		let snapshot = self.handlers.read().clone();
		snapshot.iter().any(|h| h.should_track(type_name))
	}
}

impl Default for TrackedTypeRegistry {
	fn default() -> Self {
		TrackedTypeRegistry::with_defaults()
	}
}
