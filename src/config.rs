use std::time::Duration;

use v_utils::macros::{MyConfigPrimitives, Settings};

#[derive(Clone, Debug, MyConfigPrimitives, Settings)]
pub struct AppConfig {
	/// Moodle front page, opened before logging in (default: https://moodle.nu.edu.eg/)
	#[serde(default = "default_base_url")]
	pub base_url: String,
	/// How to log in: manual, detect, form or sso (default: manual)
	#[serde(default = "default_login")]
	pub login: String,
	/// Overrides the identity read from `creds_file`
	#[serde(default)]
	pub username: Option<String>,
	/// Overrides the password read from `creds_file`
	#[serde(default)]
	pub password: Option<String>,
	/// Flat `key:value` credentials file (default: creds.txt)
	#[serde(default = "default_creds_file")]
	pub creds_file: String,
	/// Per-element wait limit in seconds (default: 10)
	#[serde(default = "default_wait_timeout_secs")]
	pub wait_timeout_secs: u64,
	/// How long `detect` login waits for the dashboard greeting, in seconds (default: 300)
	#[serde(default = "default_login_timeout_secs")]
	pub login_timeout_secs: u64,
	/// Run with a visible browser window; forced on for manual/detect login (default: true)
	#[serde(default = "default_visible")]
	pub visible: bool,
	/// Command to run on completion/error (receives the run summary as argument)
	#[serde(default)]
	pub stop_hook: Option<String>,
	/// Directory of the append-only per-task log files (default: logs)
	#[serde(default = "default_log_dir")]
	pub log_dir: String,
	/// Log filter used when RUST_LOG is unset (default: info)
	#[serde(default = "default_log_level")]
	pub log_level: String,
	/// Number of retries for clicks on injected or re-rendered buttons (default: 3)
	#[serde(default = "default_button_click_retries")]
	pub button_click_retries: u32,
}

fn default_base_url() -> String {
	"https://moodle.nu.edu.eg/".to_string()
}

fn default_login() -> String {
	"manual".to_string()
}

fn default_creds_file() -> String {
	"creds.txt".to_string()
}

fn default_wait_timeout_secs() -> u64 {
	10
}

fn default_login_timeout_secs() -> u64 {
	300
}

fn default_visible() -> bool {
	true
}

fn default_log_dir() -> String {
	"logs".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_button_click_retries() -> u32 {
	3
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			base_url: default_base_url(),
			login: default_login(),
			username: None,
			password: None,
			creds_file: default_creds_file(),
			wait_timeout_secs: default_wait_timeout_secs(),
			login_timeout_secs: default_login_timeout_secs(),
			visible: default_visible(),
			stop_hook: None,
			log_dir: default_log_dir(),
			log_level: default_log_level(),
			button_click_retries: default_button_click_retries(),
		}
	}
}

impl AppConfig {
	pub fn wait_timeout(&self) -> Duration {
		Duration::from_secs(self.wait_timeout_secs)
	}

	pub fn login_timeout(&self) -> Duration {
		Duration::from_secs(self.login_timeout_secs)
	}

	/// Base URL without the trailing slash, for joining paths onto
	pub fn site_root(&self) -> &str {
		self.base_url.trim_end_matches('/')
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_run_a_headed_browser() {
		let config = AppConfig::default();
		assert!(config.visible);
		assert_eq!(config.login, "manual");
		assert_eq!(config.wait_timeout(), Duration::from_secs(10));
		assert_eq!(config.button_click_retries, 3);
	}

	#[test]
	fn site_root_drops_trailing_slash() {
		assert_eq!(AppConfig::default().site_root(), "https://moodle.nu.edu.eg");
	}
}
