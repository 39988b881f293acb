use std::{fmt, path::PathBuf};

pub mod ajax;
pub mod browser;
pub mod config;
pub mod inputs;
pub mod logging;
pub mod login;
pub mod runner;
pub mod tasks;

/// English month names, as Moodle renders them in date selectors
pub const MONTHS: [&str; 12] = [
	"January",
	"February",
	"March",
	"April",
	"May",
	"June",
	"July",
	"August",
	"September",
	"October",
	"November",
	"December",
];

/// A forum announcement to post on every listed forum
#[derive(Clone, Debug)]
pub struct Announcement {
	pub subject: String,
	pub message: String,
	/// Forum URLs (the "view.php?f=" page of each forum)
	pub forum_urls: Vec<String>,
	/// Absolute paths of files to attach; empty means no attachments
	pub attachments: Vec<PathBuf>,
}

/// Due date as the five dropdowns of Moodle's date selector expect it
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DueDate {
	pub day: u8,
	/// Canonical English month name
	pub month: String,
	pub year: i32,
	pub hour: u8,
	pub minute: u8,
}

impl DueDate {
	pub fn day_label(&self) -> String {
		self.day.to_string()
	}

	pub fn year_label(&self) -> String {
		self.year.to_string()
	}

	/// Hour and minute selectors list zero-padded labels ("00".."23")
	pub fn hour_label(&self) -> String {
		format!("{:02}", self.hour)
	}

	pub fn minute_label(&self) -> String {
		format!("{:02}", self.minute)
	}
}

impl fmt::Display for DueDate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {} {} {:02}:{:02}", self.day, self.month, self.year, self.hour, self.minute)
	}
}

/// Everything needed to create one assignment in each listed course
#[derive(Clone, Debug)]
pub struct AssignmentSpec {
	pub name: String,
	pub description: String,
	pub instructions: String,
	pub due: DueDate,
	pub max_files: u32,
	/// Label of the accepted file type as shown in the file types browser (e.g. "PDF document")
	pub accepted_file_type: String,
	pub course_urls: Vec<String>,
}

/// A single gradebook item and its maximum grade
#[derive(Clone, Debug, PartialEq)]
pub struct GradeItem {
	pub name: String,
	pub max_grade: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GradebookEntry {
	/// A category, created before its items
	Category {
		name: String,
		/// Category total (Moodle's `grade_item_grademax`)
		weight: f64,
		items: Vec<GradeItem>,
	},
	/// An item at the top level of the course, outside any category
	Item(GradeItem),
}

impl GradebookEntry {
	pub fn name(&self) -> &str {
		match self {
			GradebookEntry::Category { name, .. } => name,
			GradebookEntry::Item(item) => &item.name,
		}
	}
}

/// Gradebook layout, in creation order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gradebook {
	pub entries: Vec<GradebookEntry>,
}

impl Gradebook {
	pub fn item_count(&self) -> usize {
		self.entries
			.iter()
			.map(|e| match e {
				GradebookEntry::Category { items, .. } => items.len(),
				GradebookEntry::Item(_) => 1,
			})
			.sum()
	}

	pub fn category_count(&self) -> usize {
		self.entries.iter().filter(|e| matches!(e, GradebookEntry::Category { .. })).count()
	}
}

impl fmt::Display for Gradebook {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for entry in &self.entries {
			match entry {
				GradebookEntry::Category { name, weight, items } => {
					writeln!(f, "{} (weight {})", name, format_grade(*weight))?;
					for item in items {
						writeln!(f, "  - {} / {}", item.name, format_grade(item.max_grade))?;
					}
				}
				GradebookEntry::Item(item) => {
					writeln!(f, "{} / {}", item.name, format_grade(item.max_grade))?;
				}
			}
		}
		Ok(())
	}
}

/// Renames grouped under a category label (used for logging only)
#[derive(Clone, Debug, PartialEq)]
pub struct RenameGroup {
	pub name: String,
	/// (old name, new name), in file order
	pub renames: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenamePlan {
	/// Gradebook setup pages to operate on
	pub courses: Vec<String>,
	pub groups: Vec<RenameGroup>,
}

impl RenamePlan {
	pub fn rename_count(&self) -> usize {
		self.groups.iter().map(|g| g.renames.len()).sum()
	}
}

/// Folder of files to upload into a (possibly new) course section
#[derive(Clone, Debug)]
pub struct SectionUpload {
	pub course_urls: Vec<String>,
	/// Name given to the new section
	pub topic_name: String,
	pub folder_name: String,
	pub content_files: Vec<PathBuf>,
	pub new_section: bool,
}

/// Login identity (email for SSO, username for the local form) and password
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
	pub identity: String,
	pub password: String,
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials").field("identity", &self.identity).field("password", &"<redacted>").finish()
	}
}

/// Render a grade the way a human would type it: `20` rather than `20.0`
pub fn format_grade(value: f64) -> String {
	if value.fract() == 0.0 && value.abs() < 1e15 { format!("{}", value as i64) } else { value.to_string() }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn grades_render_without_trailing_zero() {
		assert_eq!(format_grade(20.0), "20");
		assert_eq!(format_grade(12.5), "12.5");
		assert_eq!(format_grade(0.0), "0");
	}

	#[test]
	fn due_date_labels_match_moodle_selectors() {
		let due = DueDate {
			day: 5,
			month: "March".to_string(),
			year: 2025,
			hour: 9,
			minute: 0,
		};
		assert_eq!(due.day_label(), "5");
		assert_eq!(due.hour_label(), "09");
		assert_eq!(due.minute_label(), "00");
		assert_eq!(due.to_string(), "5 March 2025 09:00");
	}

	#[test]
	fn gradebook_counts_and_display() {
		let gradebook = Gradebook {
			entries: vec![
				GradebookEntry::Category {
					name: "Labs".to_string(),
					weight: 20.0,
					items: vec![
						GradeItem {
							name: "Lab 1".to_string(),
							max_grade: 10.0,
						},
						GradeItem {
							name: "Lab 2".to_string(),
							max_grade: 10.0,
						},
					],
				},
				GradebookEntry::Item(GradeItem {
					name: "Final".to_string(),
					max_grade: 40.0,
				}),
			],
		};
		assert_eq!(gradebook.item_count(), 3);
		assert_eq!(gradebook.category_count(), 1);
		assert_eq!(gradebook.to_string(), "Labs (weight 20)\n  - Lab 1 / 10\n  - Lab 2 / 10\nFinal / 40\n");
	}

	#[test]
	fn credentials_debug_hides_password() {
		let creds = Credentials {
			identity: "someone@nu.edu.eg".to_string(),
			password: "hunter2".to_string(),
		};
		let shown = format!("{creds:?}");
		assert!(shown.contains("someone@nu.edu.eg"));
		assert!(!shown.contains("hunter2"));
	}
}
