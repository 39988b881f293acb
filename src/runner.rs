//! Per-target loop: run a task on each course/forum, record what happened, never let one target stop the run

use std::{fmt, time::Instant};

use color_eyre::Result;
use derive_new::new;
use v_utils::{elog, log};

use crate::{browser::Session, config::AppConfig};

/// Failures of optional steps, logged and carried on instead of aborting the target
#[derive(Debug, Default)]
pub struct SoftFailures(Vec<String>);

impl SoftFailures {
	/// Keep the value of a successful step; log and remember a failed one
	pub fn check<T>(&mut self, step: &str, result: Result<T>) -> Option<T> {
		match result {
			Ok(value) => Some(value),
			Err(e) => {
				elog!("{step} failed: {e}");
				tracing::error!("{step} failed - Error: {e}");
				self.0.push(format!("{step}: {e}"));
				None
			}
		}
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn into_inner(self) -> Vec<String> {
		self.0
	}
}

#[derive(Clone, Debug, new)]
pub struct TargetOutcome {
	pub target: String,
	/// Error that made the target fail, if any
	pub error: Option<String>,
	/// Steps that failed without failing the target
	pub soft_failures: Vec<String>,
	pub elapsed_secs: f64,
}

impl TargetOutcome {
	pub fn succeeded(&self) -> bool {
		self.error.is_none()
	}
}

#[derive(Clone, Debug)]
pub struct RunReport {
	pub task: String,
	pub outcomes: Vec<TargetOutcome>,
}

impl RunReport {
	pub fn new(task: impl Into<String>) -> Self {
		Self {
			task: task.into(),
			outcomes: Vec::new(),
		}
	}

	pub fn record(&mut self, outcome: TargetOutcome) {
		self.outcomes.push(outcome);
	}

	pub fn succeeded(&self) -> usize {
		self.outcomes.iter().filter(|o| o.succeeded()).count()
	}

	pub fn failed(&self) -> usize {
		self.outcomes.len() - self.succeeded()
	}

	pub fn soft_failures(&self) -> usize {
		self.outcomes.iter().map(|o| o.soft_failures.len()).sum()
	}

	pub fn all_succeeded(&self) -> bool {
		self.failed() == 0 && self.soft_failures() == 0
	}

	/// One-line summary, also what the stop hook receives
	pub fn summary(&self) -> String {
		format!(
			"{}: {}/{} targets succeeded, {} failed, {} step(s) skipped",
			self.task,
			self.succeeded(),
			self.outcomes.len(),
			self.failed(),
			self.soft_failures()
		)
	}
}

impl fmt::Display for RunReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "=== {} ===", self.task)?;
		for outcome in &self.outcomes {
			match &outcome.error {
				None => writeln!(f, "OK   {} ({:.1}s)", outcome.target, outcome.elapsed_secs)?,
				Some(e) => writeln!(f, "FAIL {} ({:.1}s): {}", outcome.target, outcome.elapsed_secs, e)?,
			}
			for soft in &outcome.soft_failures {
				writeln!(f, "     ! {soft}")?;
			}
		}
		write!(f, "{}", self.summary())
	}
}

/// Run `task` on every target in order. A failing target is recorded (with a page snapshot when a session is given) and the loop moves on.
pub async fn run_targets<F>(session: Option<&Session>, report: &mut RunReport, targets: &[String], mut task: F)
where
	F: AsyncFnMut(&str, &mut SoftFailures) -> Result<()>, {
	let total = targets.len();
	for (i, target) in targets.iter().enumerate() {
		log!("[{}/{}] {}", i + 1, total, target);
		tracing::info!("Processing {}", target);

		let started = Instant::now();
		let mut soft = SoftFailures::default();
		let result = task(target, &mut soft).await;
		let elapsed_secs = started.elapsed().as_secs_f64();

		let error = match result {
			Ok(()) => {
				tracing::info!("Done with {} ({:.2} seconds)", target, elapsed_secs);
				None
			}
			Err(e) => {
				elog!("Failed on {}: {}", target, e);
				tracing::error!("Failed on {} - Error: {}", target, e);
				#[cfg(feature = "xdg")]
				if let Some(session) = session {
					if let Err(snap_err) = crate::browser::save_page_html(&session.page, &session.run_id, target).await {
						tracing::warn!("Failed to save page snapshot: {}", snap_err);
					}
				}
				Some(e.to_string())
			}
		};
		report.record(TargetOutcome::new(target.clone(), error, soft.into_inner(), elapsed_secs));
	}
	#[cfg(not(feature = "xdg"))]
	let _ = session;
}

/// Run the stop hook with a message if configured
pub fn run_stop_hook(config: &AppConfig, message: &str) {
	if let Some(ref hook) = config.stop_hook {
		log!("Running stop hook: {} {:?}", hook, message);
		// Escape single quotes for shell: replace ' with '\''
		let escaped = message.replace('\'', "'\\''");
		let _ = tokio::process::Command::new("sh").arg("-c").arg(format!("{} '{}'", hook, escaped)).spawn();
	}
}

#[cfg(test)]
mod tests {
	use color_eyre::eyre::eyre;

	use super::*;

	fn sample_report() -> RunReport {
		let mut report = RunReport::new("gradebook_setup");
		report.record(TargetOutcome::new("https://moodle/course/view.php?id=1".to_string(), None, vec![], 12.0));
		report.record(TargetOutcome::new(
			"https://moodle/course/view.php?id=2".to_string(),
			None,
			vec!["create item 'Lab 1': timed out".to_string()],
			8.5,
		));
		report.record(TargetOutcome::new(
			"https://moodle/course/view.php?id=3".to_string(),
			Some("Gradebook setup not reachable".to_string()),
			vec![],
			3.0,
		));
		report
	}

	#[test]
	fn report_counts() {
		let report = sample_report();
		assert_eq!(report.succeeded(), 2);
		assert_eq!(report.failed(), 1);
		assert_eq!(report.soft_failures(), 1);
		assert!(!report.all_succeeded());
		assert_eq!(report.summary(), "gradebook_setup: 2/3 targets succeeded, 1 failed, 1 step(s) skipped");
	}

	#[test]
	fn report_table() {
		let shown = sample_report().to_string();
		assert!(shown.starts_with("=== gradebook_setup ===\n"));
		assert!(shown.contains("OK   https://moodle/course/view.php?id=1 (12.0s)"));
		assert!(shown.contains("     ! create item 'Lab 1': timed out"));
		assert!(shown.contains("FAIL https://moodle/course/view.php?id=3 (3.0s): Gradebook setup not reachable"));
	}

	#[test]
	fn empty_report_is_a_success() {
		let report = RunReport::new("announce");
		assert!(report.all_succeeded());
		assert_eq!(report.summary(), "announce: 0/0 targets succeeded, 0 failed, 0 step(s) skipped");
	}

	#[tokio::test]
	async fn failing_target_is_recorded_and_the_run_continues() {
		let targets = vec!["course-1".to_string(), "course-2".to_string(), "course-3".to_string()];
		let mut report = RunReport::new("grade_book_setup");
		let mut visited = Vec::new();

		run_targets(None, &mut report, &targets, async |target: &str, soft: &mut SoftFailures| {
			visited.push(target.to_string());
			match target {
				"course-1" => {
					soft.check::<()>("create item 'Lab 1'", Err(eyre!("timed out")));
					Ok(())
				}
				"course-2" => Err(eyre!("Gradebook setup not reachable")),
				_ => Ok(()),
			}
		})
		.await;

		assert_eq!(visited, targets);
		let verdicts: Vec<bool> = report.outcomes.iter().map(|o| o.succeeded()).collect();
		assert_eq!(verdicts, vec![true, false, true]);
		assert_eq!(report.outcomes[0].soft_failures, vec!["create item 'Lab 1': timed out".to_string()]);
		assert_eq!(report.outcomes[1].error.as_deref(), Some("Gradebook setup not reachable"));
		assert!(report.outcomes[2].soft_failures.is_empty());
		assert_eq!(report.summary(), "grade_book_setup: 2/3 targets succeeded, 1 failed, 1 step(s) skipped");
	}

	#[test]
	fn soft_failures_keep_values_and_record_errors() {
		let mut soft = SoftFailures::default();
		assert_eq!(soft.check("read", Ok::<_, color_eyre::Report>(7)), Some(7));
		assert_eq!(soft.check::<()>("upload a.pdf", Err(eyre!("mask never went away"))), None);
		assert_eq!(soft.len(), 1);
		assert_eq!(soft.into_inner(), vec!["upload a.pdf: mask never went away".to_string()]);
	}
}
