//! Bounded, concurrent call-path tracking and leak detection for
//! reference-counted resources.
//!
//! A [`Tracker`] observes a stream of `(object_id, call_site, metric)`
//! recordings - typically wired into a `Drop`/accessor instrumentation
//! layer for a reference-counted buffer type - and builds a bounded trie of
//! the distinct call paths those objects travel. Objects whose last
//! recorded metric was never zero when they become unreachable are reported
//! as leaks to any registered [`Handler`].
//!
//! Recording (`record`, `notify_unreachable`, `is_tracking`) is infallible
//! and lock-bounded by design: under contention or saturation it degrades to
//! coarser tracking rather than blocking or erroring.

pub mod active_table;
pub mod bucket;
pub mod config;
pub mod error;
pub mod flow_slot;
pub mod handler;
pub mod interner;
pub mod leak_pipeline;
pub mod node;
pub mod recorder;
pub mod site;
pub mod tracked_type;
pub mod trie;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

pub use active_table::ObjectId;
pub use config::{TrackerConfig, TrackingPolicy};
pub use error::ConfigError;
pub use handler::{Handler, LeakSnapshot, MetricKind};
pub use site::RETURN_SUFFIX;
pub use tracked_type::{BufferTypeHandler, TrackedTypeHandler, TrackedTypeRegistry};

use active_table::ActiveTable;
use leak_pipeline::EventSink;
use recorder::Recorder;
use trie::Trie;

/// The assembled tracking facade: one per embedding process (or per
/// isolated subsystem under test).
///
/// Grounded on `editor`'s pattern of a single struct bundling a metrics
/// core with a background scheduler task (`scheduler.rs`): `Tracker` plays
/// the same role here, with `spawn_periodic_push` standing in for that
/// scheduler loop.
pub struct Tracker {
	trie: Trie,
	active: ActiveTable,
	sink: EventSink,
	recorder: Recorder,
	types: TrackedTypeRegistry,
	config: TrackerConfig,
}

impl Tracker {
	/// Builds a tracker from a validated configuration.
	pub fn new(config: TrackerConfig) -> Result<Arc<Self>, ConfigError> {
		config.validate()?;
		debug!(max_nodes = config.max_nodes, max_depth = config.max_depth, "constructing tracker");
		Ok(Arc::new(Tracker {
			trie: Trie::new(config.interner_capacity, config.max_nodes, config.max_depth, config.max_children_per_node),
			active: ActiveTable::new(config.drain_batch_size, config.drain_interval),
			sink: EventSink::new(),
			recorder: Recorder::new(),
			types: TrackedTypeRegistry::with_defaults(),
			config,
		}))
	}

	/// Builds a tracker with [`TrackerConfig::default`].
	pub fn with_defaults() -> Arc<Self> {
		Tracker::new(TrackerConfig::default()).expect("default configuration always validates")
	}

	/// Registers a handler to receive periodic leak snapshots.
	pub fn register_handler(&self, handler: Arc<dyn Handler>) {
		self.sink.register_handler(handler);
	}

	/// Registers a type-tracking predicate, widening which types the
	/// instrumentation layer should bother recording for.
	pub fn register_type_handler(&self, handler: Arc<dyn TrackedTypeHandler>) {
		self.types.register(handler);
	}

	/// Whether `type_name` is covered by any registered
	/// [`TrackedTypeHandler`], for instrumentation layers that want to skip
	/// `record` calls for types no one cares about.
	pub fn should_track_type(&self, type_name: &str) -> bool {
		self.types.should_track(type_name)
	}

	/// Records one call-site observation for `object_id`.
	pub fn record(&self, object_id: ObjectId, site_name: &str, metric: u64) {
		self.recorder.record(&self.trie, &self.active, &self.sink, &self.config, object_id, site_name, metric);
	}

	/// Signals that `object_id` is no longer reachable. Call this from the
	/// tracked type's own `Drop` implementation - the Rust-native stand-in
	/// for a GC finalizer hook.
	pub fn notify_unreachable(&self, object_id: ObjectId) {
		self.active.notify_unreachable(object_id);
	}

	/// Whether `object_id` currently has a live entry.
	pub fn is_tracking(&self, object_id: ObjectId) -> bool {
		self.recorder.is_tracking(&self.active, object_id)
	}

	/// Aggregates queued leak events and dispatches them to every
	/// registered handler. Returns the number of distinct leak paths
	/// reported.
	pub fn push_snapshot(&self) -> usize {
		let n = self.sink.push_snapshot();
		if n > 0 {
			debug!(leak_paths = n, "pushed leak snapshot");
		}
		n
	}

	/// Approximate number of live entries, counting completed-but-not-yet-
	/// reaped ones as still active (the literal reading of "active").
	pub fn active_flow_count(&self) -> usize {
		self.active.active_flow_count()
	}

	/// Approximate trie node count (soft metric, not a precise live tally).
	pub fn node_count(&self) -> u64 {
		self.trie.node_count()
	}

	/// Clears all tracking state: trie, active table, and this thread's
	/// recorder dedup cache. Test hook only.
	pub fn reset(&self) {
		self.trie.reset();
		self.active.reset();
		self.recorder.reset();
	}

	/// Orderly shutdown sequence: drain the finalization queue to
	/// exhaustion, force-leak every entry still active (objects that were
	/// never explicitly finalized before the process decided to shut down),
	/// then run one final snapshot push.
	pub fn shutdown(&self) {
		info!("tracker shutdown: draining finalization queue");
		self.active.drain_finalization_queue_fully(&self.trie, &self.sink);
		let forced = self.active.force_leak_remaining(&self.sink);
		if forced > 0 {
			debug!(forced_leaks = forced, "force-leaked entries still active at shutdown");
		}
		self.push_snapshot();
	}

	/// Spawns a `tokio` task that calls [`Tracker::push_snapshot`] every
	/// `push_interval_ms`. The task holds only a clone of this `Arc`,
	/// so it does not keep the tracker alive on its own; drop the returned
	/// handle (or let it run to completion, which it never does on its own)
	/// to stop scheduling further pushes.
	///
	/// Grounded on `editor`'s `scheduler.rs` `tokio::time::interval` loop.
	pub fn spawn_periodic_push(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let tracker = self.clone();
		let period = Duration::from_millis(self.config.push_interval_ms.max(1));
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			loop {
				ticker.tick().await;
				tracker.push_snapshot();
			}
		})
	}
}
