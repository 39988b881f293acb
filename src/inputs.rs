//! Readers for the flat input files each task is driven by.
//!
//! Every reader fails loudly: a task never starts with half its inputs.

use std::path::{Path, PathBuf};

use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{Announcement, AssignmentSpec, Credentials, DueDate, GradeItem, Gradebook, GradebookEntry, MONTHS, RenameGroup, RenamePlan, SectionUpload};

/// Read a whole text file, trimmed
pub fn read_text(path: impl AsRef<Path>) -> Result<String> {
	let path = path.as_ref();
	let content = std::fs::read_to_string(path).map_err(|e| eyre!("Failed to read '{}': {}", path.display(), e))?;
	Ok(content.trim().to_string())
}

/// Read one entry per line, skipping blank lines and `#` comments
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
	let content = read_text(path)?;
	Ok(content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).map(str::to_string).collect())
}

/// Absolute paths of the regular files in `dir`, sorted by name
pub fn list_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
	let dir = dir.as_ref();
	let entries = std::fs::read_dir(dir).map_err(|e| eyre!("Failed to list '{}': {}", dir.display(), e))?;

	let mut files = Vec::new();
	for entry in entries {
		let entry = entry.map_err(|e| eyre!("Failed to read entry of '{}': {}", dir.display(), e))?;
		let path = entry.path();
		if path.is_file() {
			files.push(std::path::absolute(&path).map_err(|e| eyre!("Failed to resolve '{}': {}", path.display(), e))?);
		}
	}
	files.sort();
	Ok(files)
}

/// Load `links.txt`, `subject.txt`, `message.txt` and the optional `attachments/` folder
pub fn load_announcement(dir: impl AsRef<Path>) -> Result<Announcement> {
	let dir = dir.as_ref();
	let forum_urls = read_lines(dir.join("links.txt"))?;
	if forum_urls.is_empty() {
		bail!("No URLs found in {}", dir.join("links.txt").display());
	}

	let subject = read_text(dir.join("subject.txt"))?;
	let message = read_text(dir.join("message.txt"))?;
	if subject.is_empty() || message.is_empty() {
		bail!("Subject or message is missing in {}", dir.display());
	}

	let attachments_dir = dir.join("attachments");
	let attachments = if attachments_dir.is_dir() {
		list_files(&attachments_dir)?
	} else {
		tracing::info!("No attachments folder at {}, posting without attachments", attachments_dir.display());
		Vec::new()
	};

	Ok(Announcement {
		subject,
		message,
		forum_urls,
		attachments,
	})
}

/// A JSON scalar that may be written either as a number or as a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
	Int(i64),
	Float(f64),
	Text(String),
}

impl Scalar {
	fn as_i64(&self, field: &str) -> Result<i64> {
		match self {
			Scalar::Int(n) => Ok(*n),
			Scalar::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
			Scalar::Float(f) => bail!("'{field}' must be a whole number, got {f}"),
			Scalar::Text(s) => s.trim().parse().map_err(|_| eyre!("'{field}' must be a number, got '{s}'")),
		}
	}

	fn as_text(&self) -> String {
		match self {
			Scalar::Int(n) => n.to_string(),
			Scalar::Float(f) => f.to_string(),
			Scalar::Text(s) => s.trim().to_string(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct RawAssignment {
	assignment_name: String,
	#[serde(default)]
	assignment_description: String,
	#[serde(default)]
	activity_instructions: String,
	due_day: Scalar,
	due_month: Scalar,
	due_year: Scalar,
	due_hour: Scalar,
	due_minute: Scalar,
	maximum_num_of_files: Scalar,
	accepted_file_types: String,
	courses: Vec<String>,
}

fn in_range(value: i64, field: &str, lo: i64, hi: i64) -> Result<i64> {
	if value < lo || value > hi {
		bail!("'{field}' must be within {lo}..={hi}, got {value}");
	}
	Ok(value)
}

/// Month given either by (case-insensitive) English name or by number 1..=12
fn canonical_month(raw: &Scalar) -> Result<String> {
	if let Ok(n) = raw.as_i64("due_month") {
		let n = in_range(n, "due_month", 1, 12)?;
		return Ok(MONTHS[(n - 1) as usize].to_string());
	}
	let text = raw.as_text();
	MONTHS
		.iter()
		.find(|m| m.eq_ignore_ascii_case(&text))
		.map(|m| m.to_string())
		.ok_or_else(|| eyre!("'due_month' must be an English month name, got '{text}'"))
}

/// Parse and validate an assignment configuration
pub fn parse_assignment(json: &str) -> Result<AssignmentSpec> {
	let raw: RawAssignment = serde_json::from_str(json).map_err(|e| eyre!("Failed to parse assignment config: {}", e))?;

	if raw.assignment_name.trim().is_empty() {
		bail!("'assignment_name' is empty");
	}
	if raw.courses.is_empty() {
		bail!("'courses' is empty");
	}

	let due = DueDate {
		day: in_range(raw.due_day.as_i64("due_day")?, "due_day", 1, 31)? as u8,
		month: canonical_month(&raw.due_month)?,
		year: in_range(raw.due_year.as_i64("due_year")?, "due_year", 1900, 2100)? as i32,
		hour: in_range(raw.due_hour.as_i64("due_hour")?, "due_hour", 0, 23)? as u8,
		minute: in_range(raw.due_minute.as_i64("due_minute")?, "due_minute", 0, 59)? as u8,
	};
	let max_files = in_range(raw.maximum_num_of_files.as_i64("maximum_num_of_files")?, "maximum_num_of_files", 1, 100)? as u32;

	Ok(AssignmentSpec {
		name: raw.assignment_name.trim().to_string(),
		description: raw.assignment_description,
		instructions: raw.activity_instructions,
		due,
		max_files,
		accepted_file_type: raw.accepted_file_types.trim().to_string(),
		course_urls: raw.courses.into_iter().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect(),
	})
}

pub fn load_assignment(path: impl AsRef<Path>) -> Result<AssignmentSpec> {
	let path = path.as_ref();
	parse_assignment(&read_text(path)?).map_err(|e| eyre!("{}: {}", path.display(), e))
}

fn grade_value(value: &Value, what: &str) -> Result<f64> {
	match value {
		Value::Number(n) => n.as_f64().ok_or_else(|| eyre!("{what}: grade out of range")),
		Value::String(s) => s.trim().parse().map_err(|_| eyre!("{what}: '{s}' is not a number")),
		other => bail!("{what}: expected a number, got {other}"),
	}
}

/// Parse the gradebook layout, keeping the file's key order as creation order
pub fn parse_gradebook(json: &str) -> Result<Gradebook> {
	let root: Map<String, Value> = serde_json::from_str(json).map_err(|e| eyre!("Failed to parse gradebook JSON: {}", e))?;

	let mut entries = Vec::with_capacity(root.len());
	for (name, details) in root {
		match details {
			Value::Object(fields) => {
				let weight = fields.get("weight").ok_or_else(|| eyre!("Category '{name}' has no 'weight'"))?;
				let weight = grade_value(weight, &format!("weight of category '{name}'"))?;
				let mut items = Vec::new();
				for (item_name, grade) in fields.iter().filter(|(k, _)| k.as_str() != "weight") {
					items.push(GradeItem {
						max_grade: grade_value(grade, &format!("item '{item_name}' in '{name}'"))?,
						name: item_name.clone(),
					});
				}
				entries.push(GradebookEntry::Category { name, weight, items });
			}
			other => {
				let max_grade = grade_value(&other, &format!("item '{name}'"))?;
				entries.push(GradebookEntry::Item(GradeItem { name, max_grade }));
			}
		}
	}
	Ok(Gradebook { entries })
}

pub fn load_gradebook(path: impl AsRef<Path>) -> Result<Gradebook> {
	let path = path.as_ref();
	parse_gradebook(&read_text(path)?).map_err(|e| eyre!("{}: {}", path.display(), e))
}

/// Parse `{"courses": [...], "<group>": {"old": "new", ...}, ...}`
pub fn parse_rename_plan(json: &str) -> Result<RenamePlan> {
	let root: Map<String, Value> = serde_json::from_str(json).map_err(|e| eyre!("Failed to parse rename config: {}", e))?;

	let mut courses = None;
	let mut groups = Vec::new();
	for (key, value) in root {
		if key == "courses" {
			let urls: Vec<String> = serde_json::from_value(value).map_err(|e| eyre!("'courses' must be a list of URLs: {}", e))?;
			courses = Some(urls);
			continue;
		}
		let Value::Object(pairs) = value else {
			bail!("Group '{key}' must map old item names to new ones");
		};
		let mut renames = Vec::with_capacity(pairs.len());
		for (old, new) in pairs {
			let Value::String(new) = new else {
				bail!("New name for '{old}' in group '{key}' must be a string");
			};
			renames.push((old, new));
		}
		groups.push(RenameGroup { name: key, renames });
	}

	let courses = courses.ok_or_else(|| eyre!("Missing 'courses'"))?;
	if courses.is_empty() {
		bail!("'courses' is empty");
	}
	Ok(RenamePlan { courses, groups })
}

pub fn load_rename_plan(path: impl AsRef<Path>) -> Result<RenamePlan> {
	let path = path.as_ref();
	parse_rename_plan(&read_text(path)?).map_err(|e| eyre!("{}: {}", path.display(), e))
}

/// Load `links.txt`, `name.txt`, `folder_name.txt` and `content/`; all are required
pub fn load_section_upload(dir: impl AsRef<Path>, new_section: bool) -> Result<SectionUpload> {
	let dir = dir.as_ref();
	let course_urls = read_lines(dir.join("links.txt"))?;
	let topic_name = read_text(dir.join("name.txt"))?;
	let folder_name = read_text(dir.join("folder_name.txt"))?;
	let content_files = list_files(dir.join("content"))?;

	if course_urls.is_empty() || topic_name.is_empty() || folder_name.is_empty() || content_files.is_empty() {
		bail!("Missing required data in {}. Please check your input files.", dir.display());
	}

	Ok(SectionUpload {
		course_urls,
		topic_name,
		folder_name,
		content_files,
		new_section,
	})
}

/// Parse a credentials file.
///
/// Two layouts are accepted: `key:value` lines (`email`/`username`/`user` and `password`/`pass`),
/// or two bare lines holding the username and then the password.
pub fn parse_credentials(text: &str) -> Result<Credentials> {
	let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

	let mut identity = None;
	let mut password = None;
	for line in &lines {
		let Some((key, value)) = line.split_once(':') else { continue };
		match key.trim().to_ascii_lowercase().as_str() {
			"email" | "username" | "user" => identity = Some(value.trim().to_string()),
			"password" | "pass" => password = Some(value.trim().to_string()),
			_ => {}
		}
	}

	match (identity, password) {
		(Some(identity), Some(password)) => Ok(Credentials { identity, password }),
		// Two lines with no identity key are bare, even when the password contains ':'
		(None, _) if lines.len() == 2 => Ok(Credentials {
			identity: lines[0].to_string(),
			password: lines[1].to_string(),
		}),
		_ => bail!("Credentials must be 'email:<..>' and 'password:<..>' lines, or a username line followed by a password line"),
	}
}

pub fn load_credentials(path: impl AsRef<Path>) -> Result<Credentials> {
	let path = path.as_ref();
	let text = std::fs::read_to_string(path).map_err(|e| eyre!("Failed to read credentials '{}': {}", path.display(), e))?;
	parse_credentials(&text)
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	#[test]
	fn read_lines_skips_blanks_and_comments() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("links.txt");
		fs::write(&path, "https://a/1\n\n  # disabled\n  https://a/2  \n").unwrap();

		assert_eq!(read_lines(&path).unwrap(), vec!["https://a/1", "https://a/2"]);
	}

	#[test]
	fn read_text_reports_missing_file() {
		let err = read_text("/definitely/not/here.txt").unwrap_err();
		assert!(err.to_string().contains("/definitely/not/here.txt"));
	}

	#[test]
	fn list_files_is_sorted_absolute_and_skips_dirs() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("b.pdf"), "b").unwrap();
		fs::write(dir.path().join("a.pdf"), "a").unwrap();
		fs::create_dir(dir.path().join("nested")).unwrap();

		let files = list_files(dir.path()).unwrap();
		assert_eq!(files.len(), 2);
		assert!(files.iter().all(|f| f.is_absolute()));
		assert!(files[0].ends_with("a.pdf"));
		assert!(files[1].ends_with("b.pdf"));
	}

	#[test]
	fn announcement_without_attachments_folder() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("links.txt"), "https://moodle/mod/forum/view.php?id=1\n").unwrap();
		fs::write(dir.path().join("subject.txt"), " Midterm \n").unwrap();
		fs::write(dir.path().join("message.txt"), "Room 101.\n").unwrap();

		let announcement = load_announcement(dir.path()).unwrap();
		assert_eq!(announcement.subject, "Midterm");
		assert_eq!(announcement.message, "Room 101.");
		assert!(announcement.attachments.is_empty());
	}

	#[test]
	fn announcement_requires_subject_and_links() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("links.txt"), "https://moodle/forum\n").unwrap();
		fs::write(dir.path().join("subject.txt"), "   ").unwrap();
		fs::write(dir.path().join("message.txt"), "body").unwrap();
		assert!(load_announcement(dir.path()).is_err());

		fs::write(dir.path().join("subject.txt"), "subject").unwrap();
		fs::write(dir.path().join("links.txt"), "\n# none\n").unwrap();
		assert!(load_announcement(dir.path()).unwrap_err().to_string().contains("No URLs"));
	}

	#[test]
	fn assignment_accepts_numbers_or_strings() {
		let spec = parse_assignment(
			r#"{
				"assignment_name": "Lab 3",
				"assignment_description": "desc",
				"activity_instructions": "do it",
				"due_day": "7",
				"due_month": "november",
				"due_year": 2024,
				"due_hour": 23,
				"due_minute": "5",
				"maximum_num_of_files": 2,
				"accepted_file_types": "PDF document",
				"courses": ["https://moodle/course/view.php?id=9", "  "]
			}"#,
		)
		.unwrap();

		assert_eq!(spec.due.month, "November");
		assert_eq!(spec.due.minute_label(), "05");
		assert_eq!(spec.max_files, 2);
		assert_eq!(spec.course_urls, vec!["https://moodle/course/view.php?id=9"]);
	}

	#[test]
	fn assignment_rejects_out_of_range_fields() {
		let base = |day: &str, month: &str| {
			format!(
				r#"{{"assignment_name":"A","due_day":{day},"due_month":{month},"due_year":2024,"due_hour":1,"due_minute":0,
				"maximum_num_of_files":1,"accepted_file_types":"PDF document","courses":["u"]}}"#
			)
		};
		assert!(parse_assignment(&base("32", "\"May\"")).unwrap_err().to_string().contains("due_day"));
		assert!(parse_assignment(&base("3", "\"Maytember\"")).unwrap_err().to_string().contains("due_month"));
		assert_eq!(parse_assignment(&base("3", "12")).unwrap().due.month, "December");
	}

	#[test]
	fn gradebook_keeps_file_order() {
		let gradebook = parse_gradebook(
			r#"{
				"Tutorials": {"weight": 20, "Tutorial 1": 10, "Tutorial 2": "10"},
				"Midterm": 30,
				"Labs": {"Lab 1": 5, "weight": 10.5}
			}"#,
		)
		.unwrap();

		let names: Vec<&str> = gradebook.entries.iter().map(GradebookEntry::name).collect();
		assert_eq!(names, vec!["Tutorials", "Midterm", "Labs"]);
		assert_eq!(
			gradebook.entries[2],
			GradebookEntry::Category {
				name: "Labs".to_string(),
				weight: 10.5,
				items: vec![GradeItem {
					name: "Lab 1".to_string(),
					max_grade: 5.0
				}],
			}
		);
		assert_eq!(gradebook.item_count(), 4);
	}

	#[test]
	fn gradebook_category_needs_weight() {
		let err = parse_gradebook(r#"{"Labs": {"Lab 1": 5}}"#).unwrap_err();
		assert!(err.to_string().contains("Labs"));
		assert!(parse_gradebook(r#"{"Final": [1]}"#).is_err());
	}

	#[test]
	fn rename_plan_takes_every_group() {
		let plan = parse_rename_plan(
			r#"{
				"courses": ["https://moodle/grade/edit/tree/index.php?id=4"],
				"Tutorials": {"Tut 1": "Tutorial 1", "Tut 2": "Tutorial 2"},
				"Quizzes": {"Q1": "Quiz 1"}
			}"#,
		)
		.unwrap();

		assert_eq!(plan.groups.len(), 2);
		assert_eq!(plan.groups[0].name, "Tutorials");
		assert_eq!(plan.groups[0].renames[1], ("Tut 2".to_string(), "Tutorial 2".to_string()));
		assert_eq!(plan.rename_count(), 3);
	}

	#[test]
	fn rename_plan_requires_courses() {
		assert!(parse_rename_plan(r#"{"Labs": {"a": "b"}}"#).unwrap_err().to_string().contains("courses"));
		assert!(parse_rename_plan(r#"{"courses": ["u"], "Labs": {"a": 1}}"#).is_err());
	}

	#[test]
	fn section_upload_requires_content() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("links.txt"), "https://moodle/course/view.php?id=2").unwrap();
		fs::write(dir.path().join("name.txt"), "Week 5").unwrap();
		fs::write(dir.path().join("folder_name.txt"), "Slides").unwrap();
		fs::create_dir(dir.path().join("content")).unwrap();
		assert!(load_section_upload(dir.path(), true).is_err());

		fs::write(dir.path().join("content").join("lecture.pdf"), "%PDF").unwrap();
		let upload = load_section_upload(dir.path(), false).unwrap();
		assert_eq!(upload.topic_name, "Week 5");
		assert_eq!(upload.content_files.len(), 1);
		assert!(!upload.new_section);
	}

	#[test]
	fn credentials_key_value() {
		let creds = parse_credentials("email:ta@nu.edu.eg\npassword:pa:ss\n").unwrap();
		assert_eq!(creds.identity, "ta@nu.edu.eg");
		assert_eq!(creds.password, "pa:ss");
	}

	#[test]
	fn credentials_bare_lines() {
		let creds = parse_credentials("ta01\nsecret\n").unwrap();
		assert_eq!(creds.identity, "ta01");
		assert_eq!(creds.password, "secret");
	}

	#[test]
	fn credentials_bare_password_with_colon() {
		let creds = parse_credentials("ta01\npass:word\n").unwrap();
		assert_eq!(creds.identity, "ta01");
		assert_eq!(creds.password, "pass:word");
	}

	#[test]
	fn credentials_incomplete() {
		assert!(parse_credentials("email:ta@nu.edu.eg\n").is_err());
		assert!(parse_credentials("only-one-line").is_err());
	}
}
