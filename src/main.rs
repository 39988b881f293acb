use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::eyre};
use moodle_chores::{
	Announcement, AssignmentSpec, Gradebook, RenamePlan, SectionUpload,
	browser::Session,
	config::{AppConfig, SettingsFlags},
	inputs, logging,
	login::{self, LoginMode},
	runner::{RunReport, run_stop_hook},
	tasks::{self, rename::RenameVia},
};
use v_utils::{elog, log};

#[derive(Debug, Parser)]
#[command(name = "moodle_chores")]
#[command(about = "Repetitive Moodle course administration, driven through a real browser", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Overrides for any config field, e.g. `--login sso` or `--visible true`
	#[clap(flatten)]
	settings: SettingsFlags,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Post an announcement on every forum listed in `<dir>/links.txt`
	Announce {
		#[arg(default_value = "input")]
		dir: PathBuf,
	},
	/// Create the configured assignment in every listed course
	Assign {
		#[arg(default_value = "assignments/conf.json")]
		spec: PathBuf,
	},
	/// Create gradebook categories and items in every listed course
	GradebookSetup {
		#[arg(long, default_value = "grade_book/links.txt")]
		links: PathBuf,
		#[arg(long, default_value = "grade_book/gradebook.json")]
		gradebook: PathBuf,
	},
	/// Delete every gradebook category and item in every listed course
	GradebookReset {
		#[arg(long, default_value = "grade_book/links.txt")]
		links: PathBuf,
	},
	/// Rename grade items on the listed gradebook setup pages
	Rename {
		#[arg(default_value = "grade_book/modify.json")]
		plan: PathBuf,
		#[arg(long, value_enum, default_value_t = RenameVia::Ajax)]
		via: RenameVia,
	},
	/// Upload the content folder into every listed course
	UploadSection {
		#[arg(default_value = "section")]
		dir: PathBuf,
		/// Put the folder in the last existing section instead of adding one
		#[arg(long)]
		no_new_section: bool,
	},
}

/// A chore with its inputs already loaded, so bad input fails before a browser is started
enum Job {
	Announce(Announcement),
	Assign(AssignmentSpec),
	GradebookSetup { courses: Vec<String>, gradebook: Gradebook },
	GradebookReset { courses: Vec<String> },
	Rename { plan: RenamePlan, via: RenameVia },
	UploadSection(SectionUpload),
}

impl Job {
	fn load(command: Commands) -> Result<Self> {
		Ok(match command {
			Commands::Announce { dir } => Job::Announce(inputs::load_announcement(dir)?),
			Commands::Assign { spec } => Job::Assign(inputs::load_assignment(spec)?),
			Commands::GradebookSetup { links, gradebook } => Job::GradebookSetup {
				courses: inputs::read_lines(links)?,
				gradebook: inputs::load_gradebook(gradebook)?,
			},
			Commands::GradebookReset { links } => Job::GradebookReset {
				courses: inputs::read_lines(links)?,
			},
			Commands::Rename { plan, via } => Job::Rename {
				plan: inputs::load_rename_plan(plan)?,
				via,
			},
			Commands::UploadSection { dir, no_new_section } => Job::UploadSection(inputs::load_section_upload(dir, !no_new_section)?),
		})
	}

	fn task(&self) -> &'static str {
		match self {
			Job::Announce(_) => tasks::announce::TASK,
			Job::Assign(_) => tasks::assignment::TASK,
			Job::GradebookSetup { .. } => tasks::gradebook::SETUP_TASK,
			Job::GradebookReset { .. } => tasks::gradebook::RESET_TASK,
			Job::Rename { .. } => tasks::rename::TASK,
			Job::UploadSection(_) => tasks::section::TASK,
		}
	}

	fn describe(&self) -> String {
		match self {
			Job::Announce(a) => format!("'{}' on {} forum(s), {} attachment(s)", a.subject, a.forum_urls.len(), a.attachments.len()),
			Job::Assign(a) => format!("'{}' due {} in {} course(s)", a.name, a.due, a.course_urls.len()),
			Job::GradebookSetup { courses, gradebook } => format!(
				"{} categories, {} items in {} course(s)",
				gradebook.category_count(),
				gradebook.item_count(),
				courses.len()
			),
			Job::GradebookReset { courses } => format!("{} course(s)", courses.len()),
			Job::Rename { plan, via } => format!("{} rename(s) in {} course(s) via {:?}", plan.rename_count(), plan.courses.len(), via),
			Job::UploadSection(s) => format!("{} file(s) into '{}' in {} course(s)", s.content_files.len(), s.folder_name, s.course_urls.len()),
		}
	}

	async fn run(&self, session: &Session, config: &AppConfig) -> RunReport {
		match self {
			Job::Announce(announcement) => tasks::announce::run(session, announcement, config).await,
			Job::Assign(spec) => tasks::assignment::run(session, spec, config).await,
			Job::GradebookSetup { courses, gradebook } => tasks::gradebook::setup(session, courses, gradebook, config).await,
			Job::GradebookReset { courses } => tasks::gradebook::reset(session, courses, config).await,
			Job::Rename { plan, via } => tasks::rename::run(session, plan, *via, config).await,
			Job::UploadSection(upload) => tasks::section::run(session, upload, config).await,
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	let cli = Cli::parse();
	let config = AppConfig::try_build(cli.settings).map_err(|e| eyre!("Failed to load config: {}", e))?;

	let job = Job::load(cli.command)?;
	let log_path = logging::init_logging(&config.log_dir, job.task(), &config.log_level)?;
	log!("{}: {}", job.task(), job.describe());
	log!("Logging to {}", log_path.display());

	let mode: LoginMode = config.login.parse()?;
	if mode.needs_credentials() {
		// Fail on missing credentials before the browser is up
		login::resolve_credentials(&config)?;
	}
	let visible = config.visible || mode.needs_operator();

	let session = Session::launch(visible).await?;
	if let Err(e) = login::login(&session.page, mode, &config).await {
		tracing::error!("Login process failed - Error: {}", e);
		run_stop_hook(&config, &format!("{}: login failed: {}", job.task(), e));
		session.close().await?;
		return Err(e);
	}

	let report = job.run(&session, &config).await;
	log!("{report}");
	tracing::info!("{}", report.summary());
	run_stop_hook(&config, &report.summary());

	session.close().await?;
	tracing::info!("Browser closed. Script completed.");

	if report.failed() > 0 {
		elog!("{} target(s) failed, see {}", report.failed(), log_path.display());
		std::process::exit(1);
	}
	Ok(())
}
