//! Create one assignment per course from a single configuration

use std::time::Duration;

use chromiumoxide::Page;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};

use super::{PAGE_SETTLE, enable_editing};
use crate::{
	AssignmentSpec, browser,
	browser::{Session, xpath_literal},
	config::AppConfig,
	runner::{RunReport, SoftFailures, run_targets},
};

pub const TASK: &str = "assignment_poster";

const EDIT_SWITCH: &str = "input[name='setmode']";
const OPEN_CHOOSER: &str = "button[data-action='open-chooser']";
const ADD_ASSIGNMENT: &str = "a[title='Add a new Assignment']";
const NAME: &str = "#id_name";
const DUE_DATE_ENABLED: &str = "#id_duedate_enabled";
const GRADING_DUE_DATE_ENABLED: &str = "#id_gradingduedate_enabled";
/// Moodle 4 renamed the max files select; older themes still use the short id
const MAX_FILES: [&str; 2] = ["#id_assignsubmission_file_maxfiles", "#id_maxfiles"];
const FILE_TYPES_CHOOSE: &str = "[data-filetypesbrowser] input[type='button'], [data-filetypesbrowser] button";
const MODAL_SAVE: &str = "button[data-action='save']";
const SAVE_AND_RETURN: &str = "#id_submitbutton2";

pub async fn run(session: &Session, spec: &AssignmentSpec, config: &AppConfig) -> RunReport {
	let mut report = RunReport::new(TASK);
	run_targets(Some(session), &mut report, &spec.course_urls, async |course_url: &str, soft: &mut SoftFailures| {
		create_assignment(&session.page, course_url, spec, config, soft).await
	})
	.await;
	report
}

pub async fn create_assignment(page: &Page, course_url: &str, spec: &AssignmentSpec, config: &AppConfig, soft: &mut SoftFailures) -> Result<()> {
	let timeout = config.wait_timeout();
	browser::goto(page, course_url, PAGE_SETTLE).await?;
	soft.check("enable editing mode", enable_editing(page, EDIT_SWITCH, timeout).await);

	// The last chooser belongs to the last section
	if browser::count(page, OPEN_CHOOSER).await? == 0 {
		bail!("No 'Add an activity or resource' button found.");
	}
	browser::click_last(page, OPEN_CHOOSER).await?;
	tracing::info!("Clicked 'Add an activity or resource'.");
	tokio::time::sleep(Duration::from_secs(2)).await;

	browser::wait_and_click(page, ADD_ASSIGNMENT, timeout).await.map_err(|e| eyre!("Assignment not offered in the chooser: {}", e))?;
	tracing::info!("Selected 'Assignment' from the popup.");
	tokio::time::sleep(Duration::from_secs(3)).await;

	browser::wait_for(page, NAME, timeout).await?;
	browser::set_value(page, NAME, &spec.name).await?;
	browser::fill_rich_text(page, "id_introeditoreditable", "id_introeditor", &spec.description).await?;
	browser::fill_rich_text(page, "id_activityeditoreditable", "id_activityeditor", &spec.instructions).await?;

	let due = &spec.due;
	soft.check("enable due date", browser::set_checked(page, DUE_DATE_ENABLED, true).await);
	for (field, label) in [
		("day", due.day_label()),
		("month", due.month.clone()),
		("year", due.year_label()),
		("hour", due.hour_label()),
		("minute", due.minute_label()),
	] {
		let select = format!("#id_duedate_{field}");
		let result = browser::select_by_text(page, &select, &label).await;
		if soft.check(&format!("select '{label}' in {select}"), result).is_some() {
			tracing::info!("Selected '{}' from dropdown '{}'.", label, select);
		}
	}

	if let Some(true) = soft.check("uncheck grading due date", browser::set_checked(page, GRADING_DUE_DATE_ENABLED, false).await) {
		tracing::info!("Unchecked '{}'.", GRADING_DUE_DATE_ENABLED);
	}

	let result = select_max_files(page, spec.max_files).await;
	soft.check("set maximum number of files", result);

	let result = choose_file_type(page, &spec.accepted_file_type, timeout).await;
	soft.check(&format!("choose file type '{}'", spec.accepted_file_type), result);

	browser::wait_and_click(page, SAVE_AND_RETURN, timeout).await.map_err(|e| eyre!("Failed to save the assignment: {}", e))?;
	tokio::time::sleep(PAGE_SETTLE).await;
	tracing::info!("Assignment created and submitted.");
	Ok(())
}

async fn select_max_files(page: &Page, max_files: u32) -> Result<()> {
	for select in MAX_FILES {
		if browser::count(page, select).await? > 0 {
			return browser::select_by_text(page, select, &max_files.to_string()).await;
		}
	}
	bail!("No maximum files dropdown on the form")
}

/// Tick the requested type in the file types browser and save the selection
async fn choose_file_type(page: &Page, file_type: &str, timeout: Duration) -> Result<()> {
	browser::wait_and_click(page, FILE_TYPES_CHOOSE, timeout).await?;
	tracing::info!("Clicked 'Choose' button for file types.");
	tokio::time::sleep(Duration::from_secs(2)).await;

	let checkbox = format!("//strong[text()={}]/../input", xpath_literal(file_type));
	browser::wait_for(page, &checkbox, timeout).await?;
	if browser::set_checked(page, &checkbox, true).await? {
		tracing::info!("Selected '{}' as the accepted file type.", file_type);
	}

	browser::wait_and_click(page, MODAL_SAVE, timeout).await?;
	tracing::info!("Saved file type selection.");
	Ok(())
}
