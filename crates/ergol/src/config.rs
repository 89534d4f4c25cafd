use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "ergol.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// Everything needed to (re)launch the supervised program.
///
/// Captured once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReloadTarget {
	#[serde(default)]
	pub script: PathBuf,
	#[serde(default)]
	pub script_args: Vec<String>,
	pub interpreter: Option<String>,
	#[serde(default)]
	pub interpreter_args: Vec<String>,
	#[serde(default)]
	pub cwd: PathBuf,
	#[serde(default = "default_kill_delay")]
	pub kill_delay_ms: u64,
	#[serde(default)]
	pub watch: Vec<PathBuf>,
	#[serde(default = "default_debounce")]
	pub debounce_ms: u64,
	#[serde(default)]
	pub env: HashMap<String, String>,
}

impl Default for ReloadTarget {
	fn default() -> Self {
		Self {
			script: PathBuf::new(),
			script_args: Vec::new(),
			interpreter: None,
			interpreter_args: Vec::new(),
			cwd: default_cwd(),
			kill_delay_ms: default_kill_delay(),
			watch: Vec::new(),
			debounce_ms: default_debounce(),
			env: HashMap::new(),
		}
	}
}

fn default_cwd() -> PathBuf {
	std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
fn default_kill_delay() -> u64 {
	2000
}
fn default_debounce() -> u64 {
	100
}

impl ReloadTarget {
	/// Parse a target from TOML text. Paths are kept as written.
	pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
		toml::from_str(content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Load a config file. A missing or relative `cwd` is anchored at the
	/// directory holding the file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let mut target = Self::from_toml(&content, path)?;
		let dir = match path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
			_ => default_cwd(),
		};
		if target.cwd.is_relative() {
			target.cwd = dir.join(&target.cwd);
		}
		Ok(target)
	}

	/// Load `ergol.toml` from `dir` if there is one, defaults otherwise.
	pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
		let path = dir.join(CONFIG_FILE_NAME);
		if path.exists() {
			Self::load(&path)
		} else {
			Ok(Self {
				cwd: dir.to_path_buf(),
				..Self::default()
			})
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.script.as_os_str().is_empty() {
			return Err(ConfigError::Invalid("no script to run".into()));
		}
		if self.interpreter.is_none() && !self.interpreter_args.is_empty() {
			return Err(ConfigError::Invalid(
				"interpreter arguments given without an interpreter".into(),
			));
		}
		Ok(())
	}

	pub fn kill_delay(&self) -> Duration {
		Duration::from_millis(self.kill_delay_ms)
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn script_path(&self) -> PathBuf {
		self.resolve(&self.script)
	}

	/// Script first, then every watch directory resolved against `cwd`.
	pub fn watch_paths(&self) -> Vec<PathBuf> {
		let mut paths = vec![self.script_path()];
		paths.extend(self.watch.iter().map(|dir| self.resolve(dir)));
		paths
	}

	/// Program and argv the child is launched with. Without an interpreter
	/// the script itself is executed, resolved against `cwd`.
	pub fn command_line(&self) -> (String, Vec<String>) {
		match &self.interpreter {
			Some(interpreter) => {
				let mut args = self.interpreter_args.clone();
				args.push(self.script.to_string_lossy().into_owned());
				args.extend(self.script_args.iter().cloned());
				(interpreter.clone(), args)
			}
			None => (
				self.script_path().to_string_lossy().into_owned(),
				self.script_args.clone(),
			),
		}
	}

	/// `path` shown relative to `cwd` when it lives under it.
	pub fn display_path(&self, path: &Path) -> String {
		path.strip_prefix(&self.cwd)
			.unwrap_or(path)
			.display()
			.to_string()
	}

	fn resolve(&self, path: &Path) -> PathBuf {
		if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.cwd.join(path)
		}
	}
}
