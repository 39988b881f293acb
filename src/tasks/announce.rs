//! Post the same announcement (subject, message, attachments) on a list of forums

use std::{path::Path, time::Duration};

use chromiumoxide::Page;
use color_eyre::{Result, eyre::eyre};

use super::PAGE_SETTLE;
use crate::{
	Announcement, browser,
	browser::Session,
	config::AppConfig,
	runner::{RunReport, SoftFailures, run_targets},
};

pub const TASK: &str = "moodle_announcement";

const ADD_DISCUSSION: &str = "a.btn.btn-primary";
const SUBJECT: &str = "#id_subject";
const ADVANCED: &str = "#id_advancedadddiscussion";
const FILE_PICKER_ADD: &str = "i.fa-file-o";
const REPO_UPLOAD: &str = "input[name=\"repo_upload_file\"]";
const UPLOAD_BUTTON: &str = "button.fp-upload-btn";
const UPLOAD_IN_PROGRESS: &str = "div.fp-uploadinprogress";
const MODAL_MASK: &str = "div.yui3-widget-mask";
const SUBMIT: &str = "#id_submitbutton";

pub async fn run(session: &Session, announcement: &Announcement, config: &AppConfig) -> RunReport {
	let mut report = RunReport::new(TASK);
	run_targets(Some(session), &mut report, &announcement.forum_urls, async |forum_url: &str, soft: &mut SoftFailures| {
		post_announcement(&session.page, forum_url, announcement, config, soft).await
	})
	.await;
	report
}

/// Open the forum, start a discussion, fill it in and post it
pub async fn post_announcement(page: &Page, forum_url: &str, announcement: &Announcement, config: &AppConfig, soft: &mut SoftFailures) -> Result<()> {
	let timeout = config.wait_timeout();
	browser::goto(page, forum_url, PAGE_SETTLE).await?;

	browser::wait_and_click(page, ADD_DISCUSSION, timeout)
		.await
		.map_err(|e| eyre!("Failed to find 'Add discussion topic' button: {}", e))?;
	tracing::info!("Clicked 'Add discussion topic' on forum: {}", forum_url);
	tokio::time::sleep(Duration::from_secs(3)).await;

	browser::wait_for(page, SUBJECT, timeout).await.map_err(|e| eyre!("Failed to find the subject input: {}", e))?;
	browser::set_value(page, SUBJECT, &announcement.subject).await?;
	tracing::info!("Entered subject on forum: {}", forum_url);

	browser::fill_rich_text(page, "id_messageeditable", "id_message", &announcement.message)
		.await
		.map_err(|e| eyre!("Failed to find the message input: {}", e))?;
	tracing::info!("Entered message on forum: {}", forum_url);

	if !announcement.attachments.is_empty() {
		let result = upload_attachments(page, &announcement.attachments, timeout, soft).await;
		soft.check("open advanced form for attachments", result);
	}

	submit(page, timeout).await.map_err(|e| eyre!("Failed to submit the form: {}", e))?;
	tracing::info!("Submitted the form on forum: {}", forum_url);

	tokio::time::sleep(Duration::from_secs(5)).await;
	tracing::info!("Announcement posted successfully on forum: {}", forum_url);
	Ok(())
}

/// Switch to the advanced form and attach each file through the file picker. A file that fails is skipped.
async fn upload_attachments(page: &Page, files: &[std::path::PathBuf], timeout: Duration, soft: &mut SoftFailures) -> Result<()> {
	browser::wait_and_click(page, ADVANCED, timeout).await?;
	tracing::info!("Clicked the 'Advanced' button.");
	tokio::time::sleep(Duration::from_secs(3)).await;

	for file in files {
		let result = attach_file(page, file, timeout).await;
		if soft.check(&format!("upload attachment {}", file.display()), result).is_some() {
			tracing::info!("File upload finished: {}", file.display());
		}
	}
	Ok(())
}

async fn attach_file(page: &Page, file: &Path, timeout: Duration) -> Result<()> {
	browser::wait_and_click(page, FILE_PICKER_ADD, timeout).await?;
	tracing::info!("Clicked the 'Add file' button.");
	tokio::time::sleep(Duration::from_secs(2)).await;

	browser::wait_for(page, REPO_UPLOAD, timeout).await?;
	browser::set_files(page, REPO_UPLOAD, &[file]).await?;
	tracing::info!("Selected file: {}", file.display());

	browser::wait_and_click(page, UPLOAD_BUTTON, timeout).await?;
	tracing::info!("Clicked 'Upload this file' for {}", file.display());

	browser::wait_until_hidden(page, UPLOAD_IN_PROGRESS, Duration::from_secs(30)).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;
	Ok(())
}

/// Wait out the file picker's overlay, then post
async fn submit(page: &Page, timeout: Duration) -> Result<()> {
	browser::wait_until_hidden(page, MODAL_MASK, timeout).await?;
	browser::scroll_to_bottom(page).await?;
	tokio::time::sleep(Duration::from_secs(2)).await;
	browser::wait_for_visible(page, SUBMIT, timeout).await?;
	browser::js_click(page, SUBMIT, 0).await
}
