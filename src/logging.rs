use std::{
	fs::OpenOptions,
	path::{Path, PathBuf},
	sync::Mutex,
};

use color_eyre::{Result, eyre::eyre};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Path of the append-only log for `task`, e.g. `logs/gradebook_setup_log.txt`
pub fn log_file_path(log_dir: impl AsRef<Path>, task: &str) -> PathBuf {
	log_dir.as_ref().join(format!("{task}_log.txt"))
}

/// Send tracing events to the task's append-only log file and to stderr.
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init_logging(log_dir: impl AsRef<Path>, task: &str, default_level: &str) -> Result<PathBuf> {
	let log_dir = log_dir.as_ref();
	std::fs::create_dir_all(log_dir).map_err(|e| eyre!("Failed to create log dir '{}': {}", log_dir.display(), e))?;

	let path = log_file_path(log_dir, task);
	let file = OpenOptions::new()
		.create(true)
		.append(true)
		.open(&path)
		.map_err(|e| eyre!("Failed to open log file '{}': {}", path.display(), e))?;

	let filter = match std::env::var("RUST_LOG") {
		Ok(rust_log) => EnvFilter::new(rust_log),
		Err(_) => EnvFilter::new(default_level.to_lowercase()),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false).with_target(false))
		.with(fmt::layer().with_writer(std::io::stderr).with_target(false).without_time())
		.try_init()
		.map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

	Ok(path)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn log_file_is_named_after_task() {
		assert_eq!(log_file_path("logs", "announce"), PathBuf::from("logs/announce_log.txt"));
	}
}
