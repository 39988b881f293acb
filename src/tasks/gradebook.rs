//! Gradebook setup: create categories and items from a layout, or delete everything back to the course total

use std::time::Duration;

use chromiumoxide::Page;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};

use super::{PAGE_SETTLE, course_id_from_url};
use crate::{
	GradeItem, Gradebook, GradebookEntry, browser,
	browser::Session,
	config::AppConfig,
	format_grade,
	runner::{RunReport, SoftFailures, run_targets},
};

pub const SETUP_TASK: &str = "grade_book_setup";
pub const RESET_TASK: &str = "delete_gradebook";

const GRADES_LINK: &str = "a[href*='grade/report/index.php']";
const REPORT_SELECTOR: &str = "div[role='combobox']";
const SETUP_OPTION: &str = "li[data-value*='grade/edit/tree/index.php']";
const SETUP_PATH: &str = "grade/edit/tree/index.php";

const ADD_MENU: &str = "a[id*='action-menu-toggle']";
const ADD_CATEGORY: &str = "a[data-trigger*='add-category-form']";
const ADD_ITEM: &str = "a[data-trigger*='add-item-form']";
const CATEGORY_NAME: &str = "input[name='fullname']";
const CATEGORY_MAX: &str = "input[name='grade_item_grademax']";
const ITEM_NAME: &str = "input[name='itemname']";
const ITEM_MAX: &str = "input[name='grademax']";
const PARENT_CATEGORY: &str = "select[name='parentcategory']";
const MODAL_SAVE: &str = "button[data-action='save']";

const RECALCULATING: &str = "Recalculating";
const CONTINUE: &str = "//button[contains(text(), 'Continue')] | //input[@type='submit' and @value='Continue']";

const CELL_MENU: &str = "button.btn-icon.cellmenubtn";
const DELETE_LINK: &str = "//a[contains(@data-modal, 'confirmation') and contains(text(), 'Delete')]";
const COURSE_TOTAL: &str = "//span[contains(text(), 'Course total')]";

/// Open the course and reach its gradebook setup page through the grades menu, or by URL if the menu is missing
pub async fn open_gradebook_setup(page: &Page, course_url: &str, config: &AppConfig) -> Result<()> {
	browser::goto(page, course_url, PAGE_SETTLE).await?;
	match open_setup_via_menu(page, config.wait_timeout()).await {
		Ok(()) => tracing::info!("Opened gradebook setup through the grades menu."),
		Err(e) => {
			let course_id = course_id_from_url(course_url).ok_or_else(|| eyre!("Gradebook setup not reachable ({}) and no course id in {}", e, course_url))?;
			tracing::warn!("Grades menu failed ({}), opening gradebook setup directly.", e);
			let url = format!("{}/{}?id={}", config.site_root(), SETUP_PATH, course_id);
			browser::goto(page, &url, PAGE_SETTLE).await?;
		}
	}
	browser::wait_for_url_contains(page, SETUP_PATH, config.wait_timeout()).await
}

async fn open_setup_via_menu(page: &Page, timeout: Duration) -> Result<()> {
	browser::wait_and_click(page, GRADES_LINK, timeout).await?;
	tokio::time::sleep(PAGE_SETTLE).await;
	browser::wait_and_click(page, REPORT_SELECTOR, timeout).await?;
	tokio::time::sleep(Duration::from_secs(1)).await;
	browser::wait_for(page, SETUP_OPTION, timeout).await?;
	browser::js_click(page, SETUP_OPTION, 0).await?;
	browser::wait_for_url_contains(page, SETUP_PATH, timeout).await
}

/// Get past Moodle's "Recalculating grades" interstitial if it shows up
pub async fn handle_recalculation(page: &Page) -> Result<()> {
	if browser::wait_for_text(page, RECALCULATING, Duration::from_secs(5)).await.is_err() {
		return Ok(());
	}
	tracing::info!("Grades are being recalculated.");
	browser::wait_and_click(page, CONTINUE, Duration::from_secs(20)).await?;
	browser::wait_for_url_contains(page, SETUP_PATH, Duration::from_secs(20)).await?;
	tracing::info!("Recalculation done.");
	Ok(())
}

async fn open_add_form(page: &Page, trigger: &str, timeout: Duration) -> Result<()> {
	browser::wait_and_click(page, ADD_MENU, timeout).await?;
	browser::wait_and_click(page, trigger, timeout).await?;
	tokio::time::sleep(PAGE_SETTLE).await;
	Ok(())
}

pub async fn create_category(page: &Page, name: &str, weight: f64, timeout: Duration) -> Result<()> {
	open_add_form(page, ADD_CATEGORY, timeout).await?;
	browser::wait_for_visible(page, CATEGORY_NAME, timeout).await?;
	browser::set_value(page, CATEGORY_NAME, name).await?;
	browser::set_value(page, CATEGORY_MAX, &format_grade(weight)).await?;
	browser::wait_and_click(page, MODAL_SAVE, timeout).await?;
	handle_recalculation(page).await?;
	tracing::info!("Created category '{}' (weight {}).", name, format_grade(weight));
	Ok(())
}

/// Create a grade item, inside `category` when given, else at the top level
pub async fn create_item(page: &Page, item: &GradeItem, category: Option<&str>, timeout: Duration) -> Result<()> {
	open_add_form(page, ADD_ITEM, timeout).await?;
	browser::wait_for_visible(page, ITEM_NAME, timeout).await?;
	browser::set_value(page, ITEM_NAME, &item.name).await?;
	browser::set_value(page, ITEM_MAX, &format_grade(item.max_grade)).await?;
	if let Some(category) = category {
		browser::select_by_text(page, PARENT_CATEGORY, category).await?;
	}
	browser::wait_and_click(page, MODAL_SAVE, timeout).await?;
	handle_recalculation(page).await?;
	tracing::info!("Created item '{}' ({}) in {}.", item.name, format_grade(item.max_grade), category.unwrap_or("the course"));
	Ok(())
}

pub async fn setup(session: &Session, course_urls: &[String], gradebook: &Gradebook, config: &AppConfig) -> RunReport {
	let mut report = RunReport::new(SETUP_TASK);
	run_targets(Some(session), &mut report, course_urls, async |course_url: &str, soft: &mut SoftFailures| {
		setup_course(&session.page, course_url, gradebook, config, soft).await
	})
	.await;
	report
}

/// A category that fails takes its items with it; a failed item is skipped
pub async fn setup_course(page: &Page, course_url: &str, gradebook: &Gradebook, config: &AppConfig, soft: &mut SoftFailures) -> Result<()> {
	let timeout = config.wait_timeout();
	open_gradebook_setup(page, course_url, config).await?;

	for entry in &gradebook.entries {
		match entry {
			GradebookEntry::Category { name, weight, items } => {
				let result = create_category(page, name, *weight, timeout).await;
				if soft.check(&format!("create category '{name}'"), result).is_none() {
					continue;
				}
				for item in items {
					let result = create_item(page, item, Some(name), timeout).await;
					soft.check(&format!("create item '{}' in '{}'", item.name, name), result);
				}
			}
			GradebookEntry::Item(item) => {
				let result = create_item(page, item, None, timeout).await;
				soft.check(&format!("create item '{}'", item.name), result);
			}
		}
	}
	Ok(())
}

pub async fn reset(session: &Session, course_urls: &[String], config: &AppConfig) -> RunReport {
	let mut report = RunReport::new(RESET_TASK);
	run_targets(Some(session), &mut report, course_urls, async |course_url: &str, _soft: &mut SoftFailures| {
		reset_course(&session.page, course_url, config).await
	})
	.await;
	report
}

/// Delete categories and items one at a time until only the course and its total are left
pub async fn reset_course(page: &Page, course_url: &str, config: &AppConfig) -> Result<()> {
	let timeout = config.wait_timeout();
	open_gradebook_setup(page, course_url, config).await?;

	let mut deleted = 0usize;
	let mut menus = browser::count(page, CELL_MENU).await?;
	// First menu is the course itself, last is the course total
	while menus > 2 {
		tracing::debug!("{} cell menus on the setup page.", menus);
		let mut removed = false;
		for index in 1..menus - 1 {
			match delete_row(page, index, timeout).await {
				Ok(()) => {
					removed = true;
					break;
				}
				Err(e) => tracing::warn!("Could not delete row {}: {}", index, e),
			}
		}
		if !removed {
			bail!("No deletable row left after {} deletion(s), {} menus remain", deleted, menus);
		}

		let remaining = browser::count(page, CELL_MENU).await?;
		if !rows_dropped(menus, remaining) {
			bail!("Delete went through but {} menus remain (was {}) after {} deletion(s)", remaining, menus, deleted);
		}
		deleted += 1;
		menus = remaining;
	}

	if browser::count(page, COURSE_TOTAL).await? > 0 {
		tracing::info!("Gradebook cleared ({} deletions), only the course total remains.", deleted);
	} else {
		tracing::warn!("Gradebook cleared ({} deletions) but no 'Course total' row found.", deleted);
	}
	Ok(())
}

/// A delete only counts once the setup page shows fewer rows than before it
fn rows_dropped(before: usize, after: usize) -> bool {
	after < before
}

async fn delete_row(page: &Page, index: usize, timeout: Duration) -> Result<()> {
	let index = isize::try_from(index).map_err(|e| eyre!("Row index out of range: {}", e))?;
	browser::js_click(page, CELL_MENU, index).await?;
	browser::wait_and_click(page, DELETE_LINK, timeout).await?;
	browser::wait_and_click(page, MODAL_SAVE, timeout).await?;
	tokio::time::sleep(Duration::from_secs(5)).await;
	handle_recalculation(page).await?;
	tracing::info!("Deleted row {}.", index);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delete_counts_only_when_rows_drop() {
		assert!(rows_dropped(5, 4));
		assert!(rows_dropped(5, 2));
		assert!(!rows_dropped(5, 5));
		// A recalculation can redraw extra rows
		assert!(!rows_dropped(3, 4));
	}
}
