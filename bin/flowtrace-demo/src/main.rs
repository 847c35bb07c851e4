mod cli;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use cli::Cli;
use flowtrace_core::{Tracker, TrackerConfig};
use flowtrace_handlers::TracingHandler;
use tracing::info;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A toy reference-counted buffer, standing in for the embedder's own
/// tracked type. Every method call feeds `Tracker::record`; dropping the
/// last handle feeds `Tracker::notify_unreachable` regardless of whether
/// the refcount ever reached zero, mirroring how an instrumentation layer
/// with no GC hook has to signal finalization.
struct DemoBuffer {
	id: u64,
	refcount: u64,
	tracker: Arc<Tracker>,
}

impl DemoBuffer {
	fn alloc(tracker: Arc<Tracker>) -> Self {
		let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
		tracker.record(id, "DemoBuffer.alloc", 1);
		DemoBuffer { id, refcount: 1, tracker }
	}

	fn retain(&mut self) {
		self.refcount += 1;
		self.tracker.record(self.id, "DemoBuffer.retain", self.refcount);
	}

	fn release(&mut self) {
		self.refcount = self.refcount.saturating_sub(1);
		self.tracker.record(self.id, "DemoBuffer.release", self.refcount);
	}
}

impl Drop for DemoBuffer {
	fn drop(&mut self) {
		self.tracker.notify_unreachable(self.id);
	}
}

fn simulate(tracker: &Arc<Tracker>, object_count: u64, leak_percent: u64) {
	for i in 0..object_count {
		let mut buffer = DemoBuffer::alloc(tracker.clone());
		buffer.retain();

		let should_leak = (i * 100 / object_count.max(1)) < leak_percent;
		if !should_leak {
			buffer.release();
			buffer.release();
		}
		// `buffer` drops here either way: a clean release already marked
		// completed, so the finalization notice from `Drop` is a no-op;
		// otherwise it becomes a leak once the finalization queue drains.
	}
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt::init();
	let cli = Cli::parse();

	let config = TrackerConfig { push_interval_ms: cli.push_interval_ms, ..TrackerConfig::default() };
	let tracker = Tracker::new(config).expect("default-derived configuration always validates");
	tracker.register_handler(Arc::new(TracingHandler::new()));

	let _scheduler = tracker.spawn_periodic_push();

	info!(objects = cli.objects, leak_percent = cli.leak_percent, "starting simulation");
	simulate(&tracker, cli.objects, cli.leak_percent);

	tokio::time::sleep(std::time::Duration::from_millis(cli.run_ms)).await;

	tracker.shutdown();
	let summary = serde_json::json!({
		"active_flow_count": tracker.active_flow_count(),
		"node_count": tracker.node_count(),
	});
	info!(active_flow_count = tracker.active_flow_count(), node_count = tracker.node_count(), "simulation complete");
	println!("{summary}");
}
