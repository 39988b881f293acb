//! Upload a folder of content files into a (possibly new) course section

use std::{path::Path, time::Duration};

use chromiumoxide::Page;
use color_eyre::{Result, eyre::eyre};

use super::{PAGE_SETTLE, enable_editing};
use crate::{
	SectionUpload, browser,
	browser::Session,
	config::AppConfig,
	runner::{RunReport, SoftFailures, run_targets},
};

pub const TASK: &str = "moodle_topic_content_uploader";

const EDIT_SWITCH: &str = "//input[@type='checkbox' and contains(@id, 'editingswitch')]";
const ADD_SECTION: &str = "a.btn.add-section";
const EDIT_SECTION_NAME: &str = "a[title='Edit section name']";
const INPLACE_INPUT: &str = "span.inplaceeditable input[type='text'], input.form-control[id^='inplaceeditable']";
const OPEN_CHOOSER: &str = "button[data-action='open-chooser']";
/// The chooser icon, or the anchor around it on themes where the icon div is not clickable
const FOLDER_OPTION: &str = "//div[contains(@class, 'modicon_folder')] | //a[.//div[contains(@class, 'modicon_folder')]]";
const NAME: &str = "#id_name";
const ADD_FILE: &str = "a.btn.btn-secondary";
const FILE_INPUT: &str = "input[type=\"file\"]";
const DND_IN_PROGRESS: &str = ".dndupload-uploadinprogress";
const UPLOAD_BUTTON: &str = "button.fp-upload-btn";
const MODAL_MASK: &str = ".yui3-widget-mask";
const SAVE_AND_RETURN: &str = "#id_submitbutton2";

pub async fn run(session: &Session, upload: &SectionUpload, config: &AppConfig) -> RunReport {
	let mut report = RunReport::new(TASK);
	run_targets(Some(session), &mut report, &upload.course_urls, async |course_url: &str, soft: &mut SoftFailures| {
		upload_to_course(&session.page, course_url, upload, config, soft).await
	})
	.await;
	report
}

/// Await a step and log how long it took
macro_rules! timed {
	($label:expr, $fut:expr) => {{
		let started = std::time::Instant::now();
		let out = $fut.await;
		tracing::info!("{} took {:.2} seconds", $label, started.elapsed().as_secs_f64());
		out
	}};
}

pub async fn upload_to_course(page: &Page, course_url: &str, upload: &SectionUpload, config: &AppConfig, soft: &mut SoftFailures) -> Result<()> {
	let timeout = config.wait_timeout();
	timed!("Opening the course", browser::goto(page, course_url, PAGE_SETTLE))?;
	let result = timed!("Enabling edit mode", enable_editing(page, EDIT_SWITCH, timeout));
	soft.check("enable edit mode", result);

	if upload.new_section {
		timed!("Adding the section", add_section(page, &upload.topic_name, timeout)).map_err(|e| eyre!("Failed to add section: {}", e))?;
	}

	timed!("Opening the folder form", add_folder(page, &upload.folder_name, timeout)).map_err(|e| eyre!("Failed to add folder: {}", e))?;

	for file in &upload.content_files {
		let result = timed!(format!("Uploading {}", file.display()), upload_file(page, file, timeout));
		soft.check(&format!("upload {}", file.display()), result);
	}

	timed!("Saving the folder", browser::wait_and_click(page, SAVE_AND_RETURN, timeout)).map_err(|e| eyre!("Failed to save and return to course: {}", e))?;
	tokio::time::sleep(PAGE_SETTLE).await;
	tracing::info!("Saved and returned to course: {}", course_url);
	Ok(())
}

/// Add a section at the end of the course and give it `topic_name`
async fn add_section(page: &Page, topic_name: &str, timeout: Duration) -> Result<()> {
	browser::wait_and_click(page, ADD_SECTION, timeout).await?;
	tracing::info!("Clicked 'Add section' button.");
	tokio::time::sleep(PAGE_SETTLE).await;

	browser::wait_for(page, EDIT_SECTION_NAME, timeout).await?;
	browser::click_last(page, EDIT_SECTION_NAME).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;

	browser::wait_for_visible(page, INPLACE_INPUT, timeout).await?;
	browser::set_value(page, INPLACE_INPUT, "").await?;
	browser::type_into(page, INPLACE_INPUT, topic_name).await?;
	browser::press_enter(page, INPLACE_INPUT).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;
	tracing::info!("Renamed the new section to '{}'.", topic_name);
	Ok(())
}

async fn add_folder(page: &Page, folder_name: &str, timeout: Duration) -> Result<()> {
	browser::wait_for(page, OPEN_CHOOSER, timeout).await.map_err(|e| eyre!("No 'Add an activity or resource' button found: {}", e))?;
	browser::click_last(page, OPEN_CHOOSER).await?;
	tracing::info!("Clicked 'Add an activity or resource' in the last section.");
	tokio::time::sleep(Duration::from_secs(2)).await;

	browser::wait_and_click(page, FOLDER_OPTION, timeout).await?;
	tracing::info!("Clicked 'Add Folder'.");
	tokio::time::sleep(PAGE_SETTLE).await;

	browser::wait_for(page, NAME, timeout).await?;
	browser::set_value(page, NAME, folder_name).await?;
	tracing::info!("Entered folder name '{}'.", folder_name);
	Ok(())
}

async fn upload_file(page: &Page, file: &Path, timeout: Duration) -> Result<()> {
	tracing::info!("Attempting to upload content: {}", file.display());
	browser::wait_and_click(page, ADD_FILE, timeout).await?;
	tracing::info!("Clicked 'Add...' button to open file upload dialog");

	browser::wait_for(page, FILE_INPUT, timeout).await?;
	browser::set_files(page, FILE_INPUT, &[file]).await?;
	tracing::info!("Uploaded content: {}", file.display());

	browser::wait_until_hidden(page, DND_IN_PROGRESS, Duration::from_secs(60)).await?;
	tracing::info!("File upload finished: {}", file.display());

	browser::wait_and_click(page, UPLOAD_BUTTON, timeout).await?;
	tracing::info!("Clicked 'Upload this file' for {}", file.display());

	browser::wait_until_hidden(page, MODAL_MASK, Duration::from_secs(30)).await?;
	tracing::info!("Upload dialog closed for {}", file.display());

	browser::wait_for_visible(page, ADD_FILE, timeout).await?;
	tracing::info!("Preparing for next file upload (if any)");
	tokio::time::sleep(Duration::from_secs(2)).await;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn folder_option_matches_icon_or_anchor() {
		assert!(browser::is_xpath(FOLDER_OPTION));
		let branches: Vec<&str> = FOLDER_OPTION.split(" | ").collect();
		assert_eq!(branches, ["//div[contains(@class, 'modicon_folder')]", "//a[.//div[contains(@class, 'modicon_folder')]]"]);
	}
}
