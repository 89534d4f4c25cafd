use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ergol::{ConfigError, OsLauncher, ReloadTarget, SignalSource, WatchSource};
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// Run a script and restart it whenever its files change.
///
/// Settings are read from `ergol.toml` in the working directory (or the file
/// given with --config); flags override them.
#[derive(Debug, Parser)]
#[command(name = "ergol", version)]
struct Cli {
	/// Script to run
	script: Option<PathBuf>,

	/// Arguments passed to the script
	#[arg(last = true)]
	script_args: Vec<String>,

	/// Directory to watch, relative to the working directory (repeatable)
	#[arg(short, long = "watch", value_name = "DIR")]
	watch: Vec<PathBuf>,

	/// Working directory of the script
	#[arg(long, value_name = "DIR")]
	cwd: Option<PathBuf>,

	/// Milliseconds to wait after SIGTERM before sending SIGKILL
	#[arg(short, long, value_name = "MS")]
	kill_delay: Option<u64>,

	/// Interpreter to run the script with, e.g. node
	#[arg(short, long)]
	interpreter: Option<String>,

	/// Argument for the interpreter (repeatable)
	#[arg(long = "interpreter-arg", value_name = "ARG", allow_hyphen_values = true)]
	interpreter_args: Vec<String>,

	/// Milliseconds to coalesce bursts of file changes (0 disables)
	#[arg(long, value_name = "MS")]
	debounce: Option<u64>,

	/// Config file to read instead of ./ergol.toml
	#[arg(short, long, value_name = "FILE")]
	config: Option<PathBuf>,
}

fn build_target(cli: Cli) -> Result<ReloadTarget, ConfigError> {
	let base = match &cli.cwd {
		Some(dir) => dir.clone(),
		None => std::env::current_dir().map_err(|e| ConfigError::Invalid(e.to_string()))?,
	};

	let mut target = match &cli.config {
		Some(path) => ReloadTarget::load(path)?,
		None => ReloadTarget::load_or_default(&base)?,
	};

	if let Some(cwd) = cli.cwd {
		target.cwd = cwd;
	}
	if let Some(script) = cli.script {
		target.script = script;
	}
	if !cli.script_args.is_empty() {
		target.script_args = cli.script_args;
	}
	if !cli.watch.is_empty() {
		target.watch = cli.watch;
	}
	if let Some(ms) = cli.kill_delay {
		target.kill_delay_ms = ms;
	}
	if let Some(interpreter) = cli.interpreter {
		target.interpreter = Some(interpreter);
	}
	if !cli.interpreter_args.is_empty() {
		target.interpreter_args = cli.interpreter_args;
	}
	if let Some(ms) = cli.debounce {
		target.debounce_ms = ms;
	}

	target.validate()?;
	Ok(target)
}

fn fail(message: impl std::fmt::Display, code: i32) -> ! {
	eprintln!("{} {}", "error:".red().bold(), message);
	std::process::exit(code);
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.with_writer(std::io::stderr)
		.init();

	let target = match build_target(Cli::parse()) {
		Ok(t) => t,
		Err(e) => fail(e, 2),
	};

	let watched: Vec<String> = target
		.watch_paths()
		.iter()
		.map(|p| target.display_path(p))
		.collect();
	eprintln!(
		"{} {} (pid {}), watching {}",
		"ergol".green().bold(),
		env!("CARGO_PKG_VERSION"),
		std::process::id(),
		watched.join(", ").cyan()
	);

	let (watcher, events) = match WatchSource::spawn(&target) {
		Ok(w) => w,
		Err(e) => {
			if e.is_exhausted() {
				for line in ergol::watch::EXHAUSTION_HINT {
					eprintln!("{}", line.yellow());
				}
			}
			fail(e, 1)
		}
	};
	let signals = match SignalSource::new() {
		Ok(s) => s,
		Err(e) => fail(format!("failed to install signal handlers: {}", e), 1),
	};

	let result = ergol::run(target, Arc::new(OsLauncher), events, signals).await;
	drop(watcher);
	match result {
		Ok(shutdown) => {
			tracing::debug!(?shutdown, "exiting");
			std::process::exit(shutdown.exit_code());
		}
		Err(e) => fail(e, 1),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Cli {
		let mut argv = vec!["ergol"];
		argv.extend_from_slice(args);
		Cli::try_parse_from(argv).unwrap()
	}

	#[test]
	fn parses_flags_and_trailing_args() {
		let cli = parse(&[
			"-w", "lib", "--watch", "config", "-k", "500", "-i", "node",
			"--interpreter-arg", "--inspect", "server.js", "--", "--port", "80",
		]);
		assert_eq!(cli.script, Some(PathBuf::from("server.js")));
		assert_eq!(cli.watch, vec![PathBuf::from("lib"), PathBuf::from("config")]);
		assert_eq!(cli.kill_delay, Some(500));
		assert_eq!(cli.interpreter.as_deref(), Some("node"));
		assert_eq!(cli.interpreter_args, vec!["--inspect"]);
		assert_eq!(cli.script_args, vec!["--port", "80"]);
	}

	#[test]
	fn flags_override_config_file() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(
			dir.path().join("ergol.toml"),
			"script = \"app.js\"\nkill_delay_ms = 100\nwatch = [\"lib\"]\n",
		)
		.unwrap();
		let cwd = dir.path().to_str().unwrap();

		let target = build_target(parse(&["--cwd", cwd, "-k", "900"])).unwrap();
		assert_eq!(target.script, PathBuf::from("app.js"));
		assert_eq!(target.kill_delay_ms, 900);
		assert_eq!(target.watch, vec![PathBuf::from("lib")]);
		assert_eq!(target.cwd, dir.path());
	}

	#[test]
	fn explicit_config_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("dev.toml");
		std::fs::write(&path, "script = \"run.sh\"\ndebounce_ms = 0\n").unwrap();

		let target = build_target(parse(&["-c", path.to_str().unwrap()])).unwrap();
		assert_eq!(target.script, PathBuf::from("run.sh"));
		assert_eq!(target.debounce_ms, 0);
		assert_eq!(target.cwd, dir.path());
	}

	#[test]
	fn missing_script_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let cwd = dir.path().to_str().unwrap();
		assert!(matches!(
			build_target(parse(&["--cwd", cwd])),
			Err(ConfigError::Invalid(_))
		));
	}
}
