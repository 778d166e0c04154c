use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::trace;
use weewasm::exec::{self, Value};
use weewasm::parse::Module;
use weewasm::rewrite::rewrite_module;
use weewasm::Config;

/// Runs a weewasm module: parses it, rewrites its branches into PC-relative
/// jumps and interprets the `main` export.
#[derive(Parser, Debug)]
#[command(name = "weerun")]
struct Args {
	/// Enable tracing to stderr
	#[arg(long)]
	trace: bool,

	/// Disassemble sections and code while parsing
	#[arg(long)]
	disassemble: bool,

	/// The module to run
	file: PathBuf,

	/// Arguments passed to the module's main function
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	args: Vec<String>,
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
		Ok(code) => code,
		Err(err) => {
			eprintln!("weerun: {err:#}");
			ExitCode::FAILURE
		}
	}
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
	let bytes = fs::read(&args.file)
		.with_context(|| format!("failed to load: {}", args.file.display()))?;
	trace!("loaded {}: {} bytes", args.file.display(), bytes.len());

	let config = Config {
		disassemble: args.disassemble,
	};
	let mut module = Module::parse_with_config(bytes, &config)?;
	rewrite_module(&mut module)?;

	let values: Vec<Value> = args.args.iter().map(|arg| Value::parse_arg(arg)).collect();
	for (i, value) in values.iter().enumerate() {
		trace!("args[{i}] = {value}");
	}

	match exec::run(&module, &values) {
		Ok(results) => {
			let line = results
				.iter()
				.map(|value| value.to_string())
				.collect::<Vec<_>>()
				.join(" ");
			println!("{line}");
			Ok(ExitCode::SUCCESS)
		}
		Err(trap) => {
			trace!("trap: {trap}");
			println!("!trap");
			Ok(ExitCode::FAILURE)
		}
	}
}
