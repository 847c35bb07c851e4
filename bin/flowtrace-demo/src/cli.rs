use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "flowtrace-demo")]
#[command(about = "Replays a scripted call-path recording and reports detected leaks")]
#[command(version)]
pub struct Cli {
	/// Number of tracked objects to simulate
	#[arg(long, default_value_t = 8)]
	pub objects: u64,

	/// Fraction (0-100) of simulated objects that leak instead of releasing cleanly
	#[arg(long, default_value_t = 25)]
	pub leak_percent: u64,

	/// How long to let the periodic snapshot scheduler run before shutting down, in milliseconds
	#[arg(long, default_value_t = 200)]
	pub run_ms: u64,

	/// Snapshot push period in milliseconds
	#[arg(long, default_value_t = 50)]
	pub push_interval_ms: u64,
}
