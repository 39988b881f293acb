//! The chores themselves, one module per chore

use std::{sync::LazyLock, time::Duration};

use chromiumoxide::Page;
use color_eyre::Result;
use regex::Regex;

use crate::browser;

pub mod announce;
pub mod assignment;
pub mod gradebook;
pub mod rename;
pub mod section;

/// Fixed wait after opening a course page
pub const PAGE_SETTLE: Duration = Duration::from_secs(3);

static COURSE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]id=(\d+)").unwrap());

/// Course id from the `id=` query parameter of a course or gradebook URL
pub fn course_id_from_url(url: &str) -> Option<String> {
	COURSE_ID_RE.captures(url).map(|c| c[1].to_string())
}

/// Turn on the course editing switch unless it is already on. Returns whether it was toggled.
pub async fn enable_editing(page: &Page, switch: &str, timeout: Duration) -> Result<bool> {
	browser::wait_for(page, switch, timeout).await?;
	let toggled = browser::set_checked(page, switch, true).await?;
	if toggled {
		tokio::time::sleep(Duration::from_secs(2)).await;
		tracing::info!("Editing mode enabled.");
	} else {
		tracing::info!("Editing mode already enabled.");
	}
	Ok(toggled)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn course_id_from_common_urls() {
		assert_eq!(course_id_from_url("https://moodle.nu.edu.eg/course/view.php?id=1234").as_deref(), Some("1234"));
		assert_eq!(course_id_from_url("https://moodle.nu.edu.eg/grade/edit/tree/index.php?id=77&edit=1").as_deref(), Some("77"));
		assert_eq!(course_id_from_url("https://moodle.nu.edu.eg/mod/forum/view.php?f=9&id=5").as_deref(), Some("5"));
		assert_eq!(course_id_from_url("https://moodle.nu.edu.eg/my/?courseid=3"), None);
	}
}
