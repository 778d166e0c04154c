use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::trace;

/// Pads the branch labels of a WebAssembly module to fixed-width LEBs so
/// the weerun branch rewriter can patch them in place.
#[derive(Parser, Debug)]
#[command(name = "weeify")]
struct Args {
	/// Enable tracing to stderr
	#[arg(long)]
	trace: bool,

	/// Output file
	#[arg(short, long, value_name = "FILE")]
	output: PathBuf,

	/// Input module
	input: PathBuf,
}

fn main() -> ExitCode {
	let args = Args::parse();
	if args.trace {
		tracing_subscriber::fmt()
			.with_max_level(tracing::Level::TRACE)
			.with_writer(std::io::stderr)
			.without_time()
			.init();
	}

	match run(&args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("weeify: {err:#}");
			ExitCode::FAILURE
		}
	}
}

fn run(args: &Args) -> anyhow::Result<()> {
	let bytes = fs::read(&args.input)
		.with_context(|| format!("failed to load: {}", args.input.display()))?;
	trace!("loaded {}: {} bytes", args.input.display(), bytes.len());

	let output = weewasm::weeify::weeify(&bytes)?;
	fs::write(&args.output, &output)
		.with_context(|| format!("failed to create: {}", args.output.display()))?;
	trace!("wrote {}: {} bytes", args.output.display(), output.len());
	Ok(())
}
