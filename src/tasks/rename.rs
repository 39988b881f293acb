//! Rename grade items on gradebook setup pages

use std::time::Duration;

use chromiumoxide::Page;
use clap::ValueEnum;
use color_eyre::{Result, eyre::eyre};

use super::{PAGE_SETTLE, course_id_from_url, enable_editing};
use crate::{
	RenamePlan,
	ajax::{self, AjaxClient, MoodleSession},
	browser,
	browser::{Session, js_str},
	config::AppConfig,
	runner::{RunReport, SoftFailures, run_targets},
};

pub const TASK: &str = "gradebook_modifier";

const EDIT_SWITCH: &str = "//input[@name='setmode' and @class='custom-control-input']";
const EDIT_SWITCH_FALLBACK: &str = "input[name='setmode']";
const INJECTED_EDIT: &str = "#moodle-chores-edit-item";
const ITEM_NAME: &str = "input[name='itemname']";
const MODAL_SAVE: &str = "button[data-action='save']";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RenameVia {
	/// Post the edit form to Moodle's AJAX service, falling back to the UI on failure
	#[default]
	Ajax,
	/// Open the edit modal through an injected trigger and type the new name
	Ui,
}

pub async fn run(session: &Session, plan: &RenamePlan, via: RenameVia, config: &AppConfig) -> RunReport {
	let mut report = RunReport::new(TASK);
	run_targets(Some(session), &mut report, &plan.courses, async |course_url: &str, soft: &mut SoftFailures| {
		rename_in_course(&session.page, course_url, plan, via, config, soft).await
	})
	.await;
	report
}

/// Every rename of the plan on one gradebook page. Missing items and failed renames are skipped.
pub async fn rename_in_course(page: &Page, course_url: &str, plan: &RenamePlan, via: RenameVia, config: &AppConfig, soft: &mut SoftFailures) -> Result<()> {
	let timeout = config.wait_timeout();
	browser::goto(page, course_url, PAGE_SETTLE).await?;
	tracing::info!("Accessed course gradebook: {}", course_url);
	enable_edit_mode(page, timeout).await;

	let course_id = course_id_from_url(&browser::current_url(page).await)
		.or_else(|| course_id_from_url(course_url))
		.ok_or_else(|| eyre!("No course id in {}", course_url))?;

	let client = match via {
		RenameVia::Ajax => match ajax_client(page, config).await {
			Ok(client) => Some(client),
			Err(e) => {
				tracing::warn!("AJAX session unavailable, renaming through the UI: {}", e);
				None
			}
		},
		RenameVia::Ui => None,
	};

	for group in &plan.groups {
		for (old_name, new_name) in &group.renames {
			tracing::info!("Attempting to change {} to {} in category {}", old_name, new_name, group.name);
			let html = browser::page_html(page).await?;
			let Some(item_id) = ajax::find_item_id(&html, old_name)? else {
				tracing::warn!("Grade item '{}' not found in category '{}'. Skipping...", old_name, group.name);
				soft.check::<()>(&format!("rename '{old_name}'"), Err(eyre!("grade item not found")));
				continue;
			};
			tracing::info!("Found data-itemid '{}' for grade item '{}'.", item_id, old_name);

			let result = rename_item(page, client.as_ref(), &course_id, &item_id, new_name, config).await;
			if soft.check(&format!("rename '{old_name}' to '{new_name}'"), result).is_some() {
				tracing::info!("Successfully changed {} to {} in {} category.", old_name, new_name, group.name);
			}
		}
	}
	Ok(())
}

async fn enable_edit_mode(page: &Page, timeout: Duration) {
	for switch in [EDIT_SWITCH, EDIT_SWITCH_FALLBACK] {
		match enable_editing(page, switch, timeout).await {
			Ok(_) => return,
			Err(e) => tracing::debug!("Edit switch `{}` unusable: {}", switch, e),
		}
	}
	tracing::error!("Failed to enable edit mode.");
}

async fn ajax_client(page: &Page, config: &AppConfig) -> Result<AjaxClient> {
	let session = MoodleSession::from_page(page, &config.base_url).await?;
	AjaxClient::new(session)
}

async fn rename_item(page: &Page, client: Option<&AjaxClient>, course_id: &str, item_id: &str, new_name: &str, config: &AppConfig) -> Result<()> {
	if let Some(client) = client {
		match client.rename_grade_item(course_id, item_id, new_name).await {
			Ok(()) => {
				// The setup table still shows the old name until reloaded
				let url = browser::current_url(page).await;
				return browser::goto(page, &url, PAGE_SETTLE).await;
			}
			Err(e) => tracing::warn!("AJAX rename of item {} failed, retrying through the UI: {}", item_id, e),
		}
	}
	rename_via_ui(page, course_id, item_id, new_name, config).await
}

/// Moodle opens the edit modal for any element carrying the tree plugin's data attributes, so inject one and click it
pub async fn rename_via_ui(page: &Page, course_id: &str, item_id: &str, new_name: &str, config: &AppConfig) -> Result<()> {
	let timeout = config.wait_timeout();
	let script = format!(
		r#"
		(function() {{
			const old = document.getElementById('moodle-chores-edit-item');
			if (old) old.remove();
			const a = document.createElement('a');
			a.id = 'moodle-chores-edit-item';
			a.className = 'dropdown-item';
			a.href = '#';
			a.setAttribute('role', 'menuitem');
			a.setAttribute('data-gprplugin', 'tree');
			a.setAttribute('data-courseid', {course_id});
			a.setAttribute('data-itemid', {item_id});
			a.setAttribute('data-trigger', 'add-item-form');
			a.style.display = 'block';
			a.style.position = 'relative';
			a.style.zIndex = '9999';
			a.textContent = 'Edit grade item';
			document.body.insertBefore(a, document.body.firstChild);
			return true;
		}})()
		"#,
		course_id = js_str(course_id),
		item_id = js_str(item_id),
	);
	browser::eval_value(page, script, "inject edit trigger").await?;
	tokio::time::sleep(Duration::from_secs(2)).await;

	let attempts = config.button_click_retries.max(1);
	let mut last_err = None;
	for attempt in 1..=attempts {
		match browser::wait_and_click(page, INJECTED_EDIT, timeout).await {
			Ok(()) => {
				last_err = None;
				break;
			}
			Err(e) => {
				tracing::warn!("Retry {}: Failed to click button. Error: {}", attempt, e);
				last_err = Some(e);
				tokio::time::sleep(Duration::from_secs(2)).await;
			}
		}
	}
	if let Some(e) = last_err {
		return Err(e);
	}

	browser::wait_for_visible(page, ITEM_NAME, timeout).await?;
	browser::set_value(page, ITEM_NAME, new_name).await?;
	browser::wait_and_click(page, MODAL_SAVE, timeout).await?;
	handle_modal_close(page, timeout).await
}

async fn handle_modal_close(page: &Page, timeout: Duration) -> Result<()> {
	browser::wait_until_hidden(page, ITEM_NAME, timeout).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ajax_is_the_default_strategy() {
		assert_eq!(RenameVia::default(), RenameVia::Ajax);
		assert_eq!(RenameVia::from_str("ui", true), Ok(RenameVia::Ui));
	}
}
