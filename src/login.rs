use std::{str::FromStr, time::Duration};

use chromiumoxide::Page;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use v_utils::{elog, io::confirm, log};

use crate::{Credentials, browser, config::AppConfig, inputs};

/// Dashboard greeting ("Hi, <name>! 👋") shown once logged in
const GREETING: &str = "//h2[contains(text(), 'Hi,')]";
/// Elements only present for a logged-in user
const LOGGED_IN_MARKERS: &str = "a[href*='login/logout.php'], #user-menu-toggle, .usermenu";

/// SSO (Microsoft login) field ids
const SSO_EMAIL: &str = "#i0116";
const SSO_PASSWORD: &str = "#i0118";
const SSO_SUBMIT: &str = "#idSIButton9";
const SSO_PASSWORD_ATTEMPTS: u32 = 3;

/// How a run gets past the login page
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoginMode {
	/// Operator logs in by hand, then confirms in the terminal
	Manual,
	/// Operator logs in by hand; the dashboard greeting is detected automatically
	Detect,
	/// Moodle's own username/password form
	Form,
	/// Microsoft single sign-on with email and password
	Sso,
}

impl LoginMode {
	/// Manual modes need a visible window for the operator
	pub fn needs_operator(&self) -> bool {
		matches!(self, LoginMode::Manual | LoginMode::Detect)
	}

	pub fn needs_credentials(&self) -> bool {
		matches!(self, LoginMode::Form | LoginMode::Sso)
	}
}

impl FromStr for LoginMode {
	type Err = color_eyre::Report;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"manual" => Ok(LoginMode::Manual),
			"detect" => Ok(LoginMode::Detect),
			"form" => Ok(LoginMode::Form),
			"sso" => Ok(LoginMode::Sso),
			other => bail!("Unknown login mode '{other}' (expected manual, detect, form or sso)"),
		}
	}
}

/// Credentials from config when both fields are set there, otherwise from the creds file (config fields still win)
pub fn resolve_credentials(config: &AppConfig) -> Result<Credentials> {
	if let (Some(identity), Some(password)) = (&config.username, &config.password) {
		return Ok(Credentials {
			identity: identity.clone(),
			password: password.clone(),
		});
	}
	let from_file = inputs::load_credentials(&config.creds_file)?;
	Ok(Credentials {
		identity: config.username.clone().unwrap_or(from_file.identity),
		password: config.password.clone().unwrap_or(from_file.password),
	})
}

/// Open the Moodle front page and get logged in according to `mode`
pub async fn login(page: &Page, mode: LoginMode, config: &AppConfig) -> Result<()> {
	browser::goto(page, &config.base_url, Duration::from_secs(2)).await?;

	match mode {
		LoginMode::Manual => login_manual(page).await,
		LoginMode::Detect => wait_for_login(page, config.login_timeout()).await,
		LoginMode::Form => {
			let creds = resolve_credentials(config)?;
			login_form(page, &creds, config).await
		}
		LoginMode::Sso => {
			let creds = resolve_credentials(config)?;
			login_sso(page, &creds, config).await
		}
	}
}

async fn login_manual(page: &Page) -> Result<()> {
	if !confirm("Log in to Moodle in the browser window. Logged in?").await {
		bail!("Login not confirmed by user");
	}
	if browser::count(page, LOGGED_IN_MARKERS).await.unwrap_or(0) == 0 {
		elog!("Could not verify login: no user menu found at {}", browser::current_url(page).await);
	}
	tracing::info!("User logged in manually.");
	Ok(())
}

/// Block until the dashboard greeting shows up
pub async fn wait_for_login(page: &Page, timeout: Duration) -> Result<()> {
	log!("Waiting up to {}s for login...", timeout.as_secs());
	browser::wait_for(page, GREETING, timeout).await.map_err(|e| eyre!("Login not detected: {}", e))?;
	tracing::info!("User logged in successfully.");
	Ok(())
}

/// Moodle's local login form
async fn login_form(page: &Page, creds: &Credentials, config: &AppConfig) -> Result<()> {
	browser::wait_for(page, "#username", config.wait_timeout()).await.map_err(|e| eyre!("Login form not found: {}", e))?;
	browser::set_value(page, "#username", &creds.identity).await?;
	browser::set_value(page, "#password", &creds.password).await?;
	browser::js_click(page, "#loginbtn", 0).await?;
	tokio::time::sleep(Duration::from_secs(3)).await;

	let logged_in = format!("{GREETING} | //*[@id='user-menu-toggle'] | //a[contains(@href, 'login/logout.php')]");
	browser::wait_for(page, &logged_in, config.wait_timeout()).await.map_err(|e| eyre!("Login failed: {}", e))?;
	tracing::info!("Login successful.");
	Ok(())
}

/// Microsoft SSO: email, password (retried), "stay signed in", then the Moodle dashboard
async fn login_sso(page: &Page, creds: &Credentials, config: &AppConfig) -> Result<()> {
	let timeout = config.wait_timeout();

	browser::wait_for_visible(page, SSO_EMAIL, timeout).await.map_err(|e| eyre!("SSO email field not found: {}", e))?;
	browser::type_into(page, SSO_EMAIL, &creds.identity).await?;
	browser::js_click(page, SSO_SUBMIT, 0).await?;
	tracing::info!("Entered email and clicked next for SSO.");

	for attempt in 1..=SSO_PASSWORD_ATTEMPTS {
		match enter_sso_password(page, &creds.password, timeout).await {
			Ok(()) => {
				tracing::info!("Entered password and clicked sign in for SSO.");
				break;
			}
			Err(e) if attempt < SSO_PASSWORD_ATTEMPTS => {
				tracing::warn!("Retry {attempt} for password entry due to error: {e}");
				tokio::time::sleep(Duration::from_secs(2)).await;
			}
			Err(e) => return Err(e),
		}
	}

	browser::wait_and_click(page, SSO_SUBMIT, timeout).await.map_err(|e| eyre!("'Stay signed in' prompt not found: {}", e))?;
	tracing::info!("Clicked 'Yes' for staying signed in.");

	browser::wait_for(page, GREETING, Duration::from_secs(20)).await.map_err(|e| eyre!("Login failed: {}", e))?;
	tracing::info!("Login successful.");
	Ok(())
}

async fn enter_sso_password(page: &Page, password: &str, timeout: Duration) -> Result<()> {
	browser::wait_for_visible(page, SSO_PASSWORD, timeout).await?;
	browser::type_into(page, SSO_PASSWORD, password).await?;
	browser::js_click(page, SSO_SUBMIT, 0).await
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config_with(username: Option<&str>, password: Option<&str>, creds_file: &str) -> AppConfig {
		AppConfig {
			username: username.map(str::to_string),
			password: password.map(str::to_string),
			creds_file: creds_file.to_string(),
			..Default::default()
		}
	}

	#[test]
	fn login_mode_parses_case_insensitively() {
		assert_eq!("SSO".parse::<LoginMode>().unwrap(), LoginMode::Sso);
		assert_eq!(" detect ".parse::<LoginMode>().unwrap(), LoginMode::Detect);
		assert!("oauth".parse::<LoginMode>().is_err());
	}

	#[test]
	fn operator_modes() {
		assert!(LoginMode::Manual.needs_operator());
		assert!(!LoginMode::Sso.needs_operator());
		assert!(LoginMode::Form.needs_credentials());
		assert!(!LoginMode::Detect.needs_credentials());
	}

	#[test]
	fn config_credentials_skip_the_file() {
		let config = config_with(Some("ta@nu.edu.eg"), Some("pw"), "/does/not/exist");
		let creds = resolve_credentials(&config).unwrap();
		assert_eq!(creds.identity, "ta@nu.edu.eg");
		assert_eq!(creds.password, "pw");
	}

	#[test]
	fn config_overrides_one_field_of_the_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("creds.txt");
		std::fs::write(&path, "email:file@nu.edu.eg\npassword:from-file\n").unwrap();

		let config = config_with(None, Some("from-config"), path.to_str().unwrap());
		let creds = resolve_credentials(&config).unwrap();
		assert_eq!(creds.identity, "file@nu.edu.eg");
		assert_eq!(creds.password, "from-config");
	}

	#[test]
	fn missing_creds_file_is_an_error() {
		let config = config_with(None, None, "/does/not/exist/creds.txt");
		assert!(resolve_credentials(&config).is_err());
	}
}
