use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use zzwarak::config::{self, Config};
use zzwarak::lifecycle::NoticeLevel;
use zzwarak::model::{format_minutes, Category, HistoryEntry, ItemKey, Stage};
use zzwarak::notify::{DesktopNotifier, Notifier};
use zzwarak::service::{Classifier, GeminiClient, TimetableImage, TimetableParser};
use zzwarak::store::{FileStore, Gateway};
use zzwarak::timer::{format_clock, FocusSession, RunMode, TimerEngine, TimerSnapshot};
use zzwarak::{LifecycleController, PlanStore, SystemClock};

#[derive(Parser)]
#[command(name = "zzwarak")]
#[command(about = "Brain dump in, daily plan out")]
struct Cli {
	/// Log at debug level
	#[arg(short, long, global = true)]
	verbose: bool,
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Dump everything on your mind, one item per line ("-" reads stdin)
	Dump { text: String },
	/// Hours you have available today
	Hours { hours: f32 },
	/// Read free time from a timetable image, or reuse the saved one
	Timetable {
		image: Option<PathBuf>,
		#[arg(long = "use", default_value_t = false)]
		use_saved: bool,
	},
	/// Sort the brain dump into today's plan
	Go,
	/// Show today's plan
	Show,
	/// Print today's plan as JSON
	Status,
	/// Toggle an item (e.g. top3-0, shallow-1, seq-0-2)
	Check { key: String },
	/// Dismiss a shallow, deep or micro item
	Delete { key: String },
	/// Reopen today's archived plan
	Reopen,
	/// Discard today's plan without archiving it
	Reset,
	/// Start a new plan after the day was archived
	Again,
	/// Calendar of archived days
	History {
		/// Month to show, as YYYY-MM (defaults to this month)
		#[arg(long)]
		month: Option<String>,
		/// Show one archived day in full
		#[arg(long)]
		date: Option<NaiveDate>,
	},
	/// Run a focus timer for one task
	Focus {
		task: String,
		#[arg(long)]
		minutes: Option<u32>,
	},
}

fn setup_logging(cfg: &Config, verbose: bool) -> Result<()> {
	let log_dir = config::logs_dir()?;
	fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

	let level = if verbose {
		tracing::Level::DEBUG
	} else {
		tracing::Level::from_str(&cfg.general.log_level).unwrap_or(tracing::Level::INFO)
	};
	let log_file =
		fs::File::create(log_dir.join("zzwarak.log")).context("Failed to create log file")?;

	tracing_subscriber::fmt()
		.with_writer(log_file)
		.with_ansi(false)
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
		)
		.init();

	info!("Logging initialized (verbose: {})", verbose);
	Ok(())
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	let cfg = config::load_or_init().context("failed to load config")?;
	setup_logging(&cfg, cli.verbose).context("Failed to setup logging")?;

	let store = FileStore::new(&cfg.data_dir()).context("failed to open data directory")?;
	let gateway = Gateway::new(Arc::new(store));
	let mut ctl = LifecycleController::from_config(&cfg, gateway, Arc::new(SystemClock))
		.context("failed to open today's plan")?;

	match cli.command {
		Some(Commands::Dump { text }) => {
			let text = if text == "-" {
				let mut buf = String::new();
				std::io::stdin().read_to_string(&mut buf)?;
				buf
			} else {
				text
			};
			ctl.submit_text(&text)?;
			println!("Got it. Now set your hours (`zzwarak hours 3`) or a timetable.");
		}
		Some(Commands::Hours { hours }) => {
			ctl.choose_hours(hours)?;
			println!("Available today: {}", format_minutes((hours * 60.0).round() as u32));
		}
		Some(Commands::Timetable { image, use_saved }) => {
			if use_saved || image.is_none() {
				let minutes = ctl.use_saved_timetable()?;
				println!("Using saved timetable: {} free", format_minutes(minutes));
			} else if let Some(path) = image {
				let image = TimetableImage::from_path(&path)
					.with_context(|| format!("failed to read {}", path.display()))?;
				let outcome = GeminiClient::from_config(&cfg.classifier)
					.and_then(|client| client.parse_timetable(&image));
				if ctl.apply_timetable(outcome)? {
					if let Some(table) = ctl.saved_timetable() {
						println!(
							"Free about {}h a day ({} this week)",
							table.free_hours,
							format_minutes(table.total_free_minutes)
						);
						for slot in &table.slots {
							println!("  {} {}-{}  {}", slot.day, slot.start, slot.end, slot.label);
						}
					}
				}
			}
		}
		Some(Commands::Go) => {
			let ticket = ctl.confirm()?;
			println!("Sorting your tasks...");
			let outcome = GeminiClient::from_config(&cfg.classifier)
				.and_then(|client| client.classify(&ticket.request));
			ctl.complete(ticket.id, outcome)?;
			if ctl.stage() == Stage::Result {
				print_plan(ctl.store());
			}
		}
		Some(Commands::Show) | None => print_plan(ctl.store()),
		Some(Commands::Status) => {
			println!("{}", serde_json::to_string_pretty(ctl.plan())?);
		}
		Some(Commands::Check { key }) => {
			let key = ItemKey::from_str(&key)?;
			let mutation = ctl.toggle_check(key)?;
			println!("{} {}", checkbox(mutation.checked), key);
			if mutation.archived.is_some() {
				print_notice(&mut ctl);
				if let Some(due) = ctl.archive_due_at() {
					if let Ok(wait) = (due - Utc::now()).to_std() {
						std::thread::sleep(wait);
					}
					ctl.poll()?;
				}
				println!("Today is archived. `zzwarak again` starts a new plan.");
			}
		}
		Some(Commands::Delete { key }) => {
			let key = ItemKey::from_str(&key)?;
			ctl.delete(key)?;
			println!("Dismissed {}", key);
		}
		Some(Commands::Reopen) => {
			ctl.reopen()?;
			print_plan(ctl.store());
		}
		Some(Commands::Reset) => {
			ctl.reset()?;
			println!("Plan discarded.");
		}
		Some(Commands::Again) => {
			ctl.start_over()?;
			println!("Fresh start. Dump what's on your mind.");
		}
		Some(Commands::History { month, date }) => match date {
			Some(date) => match ctl.history().query(date) {
				Some(entry) => print_history_entry(&entry),
				None => println!("Nothing archived on {}", date),
			},
			None => print_month(&ctl, month.as_deref())?,
		},
		Some(Commands::Focus { task, minutes }) => {
			let length = minutes
				.map(|m| Duration::from_secs(u64::from(m.max(1)) * 60))
				.unwrap_or_else(|| cfg.session_length());
			let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier::new(&cfg.notifications));
			run_focus(TimerEngine::new(task, length), notifier)?;
		}
	}

	print_notice(&mut ctl);
	Ok(())
}

fn print_notice(ctl: &mut LifecycleController) {
	if let Some(notice) = ctl.dismiss_notice() {
		match notice.level {
			NoticeLevel::Info => println!("✨ {}", notice.message),
			NoticeLevel::Error => eprintln!("⚠️  {}", notice.message),
		}
	}
}

fn checkbox(checked: bool) -> &'static str {
	if checked {
		"[x]"
	} else {
		"[ ]"
	}
}

fn print_plan(store: &PlanStore) {
	let plan = store.plan();
	println!("{}  ({})", plan.date, plan.stage);
	match plan.stage {
		Stage::Input => {
			println!("Nothing planned yet. `zzwarak dump \"...\"` to begin.");
			return;
		}
		Stage::TimeConfig | Stage::AwaitingClassification => {
			for line in plan.input.lines().filter(|l| !l.trim().is_empty()) {
				println!("  - {}", line.trim());
			}
			match plan.available_minutes {
				Some(m) => println!("Available: {}", format_minutes(m)),
				None => println!("No available time chosen yet."),
			}
			return;
		}
		Stage::Result | Stage::Archived => {}
	}
	let Some(result) = plan.result.as_ref() else {
		return;
	};

	if let Some(progress) = store.progress() {
		println!(
			"Today's goals  {}/{}  {}%",
			progress.done,
			progress.total,
			progress.percent()
		);
	}
	for (key, task) in store.visible_items(Category::Top3) {
		println!("  {} {:<10} {}", checkbox(plan.checks.is_checked(&key)), key, task);
	}

	if !result.timeblocks.is_empty() {
		println!("\nTimeblocks");
		for block in &result.timeblocks {
			println!("  {:<24} {}", block.label, block.duration_label());
		}
	}

	for (title, category) in [
		("Light tasks", Category::Shallow),
		("Deep focus", Category::Deep),
		("First steps", Category::Micro),
	] {
		let items = store.visible_items(category);
		if items.is_empty() {
			continue;
		}
		println!("\n{}", title);
		for (key, task) in items {
			println!("  {} {:<10} {}", checkbox(plan.checks.is_checked(&key)), key, task);
		}
	}

	if !result.groups.is_empty() {
		println!("\nGroups");
		for group in &result.groups {
			println!("  {} {}", group.emoji, group.category);
			for task in &group.tasks {
				println!("      · {}", task);
			}
			println!("      💡 {}", group.tip);
		}
	}

	if !result.sequence.is_empty() {
		println!("\nOrder");
		for (p, phase) in result.sequence.iter().enumerate() {
			println!("  {}. {}  ({})", p + 1, phase.phase, phase.reason);
			for (t, task) in phase.tasks.iter().enumerate() {
				let key = ItemKey::Sequence { phase: p, task: t };
				println!("     {} {:<10} {}", checkbox(plan.checks.is_checked(&key)), key, task);
			}
		}
	}
}

fn print_history_entry(entry: &HistoryEntry) {
	let progress = entry.progress();
	println!(
		"{}  {}/{} done ({}%)  saved {}",
		entry.date,
		progress.done,
		progress.total,
		progress.percent(),
		entry.saved_at.with_timezone(&Local).format("%H:%M")
	);
	for (i, task) in entry.result.top3.iter().enumerate() {
		println!("  {} {}", checkbox(entry.checks.is_checked(&ItemKey::Top3(i))), task);
	}
	for block in &entry.result.timeblocks {
		println!("  ⏱  {:<24} {}", block.label, block.duration_label());
	}
}

fn print_month(ctl: &LifecycleController, month: Option<&str>) -> Result<()> {
	let (year, month) = match month {
		Some(raw) => {
			let first = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d")
				.with_context(|| format!("expected YYYY-MM, got {}", raw))?;
			(first.year(), first.month())
		}
		None => {
			let today = Local::now().date_naive();
			(today.year(), today.month())
		}
	};
	let days = ctl.history().month(year, month);
	println!(
		"{}-{:02}  ({} days archived in total)",
		year,
		month,
		ctl.history().total_days()
	);
	if days.is_empty() {
		println!("  No records this month.");
	}
	for day in days {
		println!("  {}  {:<6} {}/{}", day.date, day.marker(), day.done, day.total);
	}
	Ok(())
}

enum FocusOutcome {
	Finished,
	Cancelled,
}

fn print_progress(snap: &TimerSnapshot) {
	let width = 20;
	let filled = (snap.elapsed_fraction * width as f64).round() as usize;
	let bar: String = (0..width).map(|i| if i < filled { '█' } else { '░' }).collect();
	let paused = if snap.mode == RunMode::Paused { " (paused)" } else { "" };
	print!("\r{} {} {}{}", format_clock(snap.remaining_secs), bar, snap.task, paused);
	let _ = std::io::stdout().flush();
}

fn run_focus(engine: TimerEngine, notifier: Arc<dyn Notifier>) -> Result<()> {
	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("failed to start timer runtime")?;

	runtime.block_on(async move {
		let session = FocusSession::start(engine, notifier);
		let mut redraw = tokio::time::interval(Duration::from_secs(1));
		let outcome = loop {
			tokio::select! {
				_ = session.wait_finished() => break FocusOutcome::Finished,
				_ = tokio::signal::ctrl_c() => break FocusOutcome::Cancelled,
				_ = redraw.tick() => print_progress(&session.snapshot()),
			}
		};
		println!();
		match outcome {
			FocusOutcome::Finished => println!("Time's up. Nice focus."),
			FocusOutcome::Cancelled => {
				session.cancel();
				println!("Session closed.");
			}
		}
	});
	Ok(())
}
