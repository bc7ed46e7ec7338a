//! Focus-session countdown.
//!
//! [`TimerEngine`] is the pure state machine; [`FocusSession`] drives it from a
//! one-second tokio interval. Sessions are never persisted.

use crate::notify::{notify_focus_done, Notifier};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
	Running,
	Paused,
	Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
	/// One second was counted down
	Counted { remaining: u32 },
	/// This tick reached zero. Returned once per run.
	Finished,
	/// Paused or already finished; nothing changed
	Idle,
}

#[derive(Debug, Clone)]
pub struct TimerEngine {
	task: String,
	total_secs: u32,
	remaining_secs: u32,
	mode: RunMode,
}

impl TimerEngine {
	/// New session, already running, with the full session length remaining.
	pub fn new(task: impl Into<String>, session: Duration) -> Self {
		let total_secs = u32::try_from(session.as_secs()).unwrap_or(u32::MAX).max(1);
		Self {
			task: task.into(),
			total_secs,
			remaining_secs: total_secs,
			mode: RunMode::Running,
		}
	}

	pub fn task(&self) -> &str {
		&self.task
	}

	pub fn mode(&self) -> RunMode {
		self.mode
	}

	pub fn remaining_secs(&self) -> u32 {
		self.remaining_secs
	}

	pub fn total_secs(&self) -> u32 {
		self.total_secs
	}

	/// `1 - remaining/total`, for progress display only.
	pub fn elapsed_fraction(&self) -> f64 {
		1.0 - f64::from(self.remaining_secs) / f64::from(self.total_secs)
	}

	pub fn tick(&mut self) -> Tick {
		if self.mode != RunMode::Running {
			return Tick::Idle;
		}
		self.remaining_secs = self.remaining_secs.saturating_sub(1);
		if self.remaining_secs == 0 {
			self.mode = RunMode::Finished;
			return Tick::Finished;
		}
		Tick::Counted {
			remaining: self.remaining_secs,
		}
	}

	pub fn pause(&mut self) -> bool {
		if self.mode != RunMode::Running {
			return false;
		}
		self.mode = RunMode::Paused;
		true
	}

	pub fn resume(&mut self) -> bool {
		if self.mode != RunMode::Paused {
			return false;
		}
		self.mode = RunMode::Running;
		true
	}

	/// Only a finished session can be restarted; it runs again from the full length.
	pub fn restart(&mut self) -> bool {
		if self.mode != RunMode::Finished {
			return false;
		}
		self.remaining_secs = self.total_secs;
		self.mode = RunMode::Running;
		true
	}
}

/// Display snapshot of a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
	pub task: String,
	pub mode: RunMode,
	pub remaining_secs: u32,
	pub elapsed_fraction: f64,
}

pub fn format_clock(secs: u32) -> String {
	format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// A [`TimerEngine`] plus the periodic tick that drives it.
///
/// Dropping the session (or calling [`FocusSession::cancel`]) stops the tick.
pub struct FocusSession {
	engine: Arc<Mutex<TimerEngine>>,
	finished: Arc<Notify>,
	ticker: JoinHandle<()>,
}

impl FocusSession {
	/// Spawn the ticker on the current tokio runtime.
	pub fn start(engine: TimerEngine, notifier: Arc<dyn Notifier>) -> Self {
		info!(task = engine.task(), secs = engine.total_secs(), "focus session started");
		let engine = Arc::new(Mutex::new(engine));
		let finished = Arc::new(Notify::new());
		let ticker = tokio::spawn(run_ticker(engine.clone(), finished.clone(), notifier));
		Self {
			engine,
			finished,
			ticker,
		}
	}

	fn engine(&self) -> MutexGuard<'_, TimerEngine> {
		self.engine.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn pause(&self) -> bool {
		self.engine().pause()
	}

	pub fn resume(&self) -> bool {
		self.engine().resume()
	}

	pub fn restart(&self) -> bool {
		self.engine().restart()
	}

	pub fn snapshot(&self) -> TimerSnapshot {
		let engine = self.engine();
		TimerSnapshot {
			task: engine.task().to_string(),
			mode: engine.mode(),
			remaining_secs: engine.remaining_secs(),
			elapsed_fraction: engine.elapsed_fraction(),
		}
	}

	/// Resolves when the countdown reaches zero.
	pub async fn wait_finished(&self) {
		self.finished.notified().await
	}

	/// Stop ticking and discard the session.
	pub fn cancel(self) {
		debug!(task = self.engine().task(), "focus session closed");
	}
}

impl Drop for FocusSession {
	fn drop(&mut self) {
		self.ticker.abort();
	}
}

async fn run_ticker(engine: Arc<Mutex<TimerEngine>>, finished: Arc<Notify>, notifier: Arc<dyn Notifier>) {
	let mut interval = tokio::time::interval(Duration::from_secs(1));
	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
	// First tick completes immediately.
	interval.tick().await;
	loop {
		interval.tick().await;
		let (outcome, task) = {
			let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
			(engine.tick(), engine.task().to_string())
		};
		if outcome == Tick::Finished {
			info!(task = %task, "focus session finished");
			// Notifiers shell out; keep them off the runtime thread.
			let notifier = notifier.clone();
			let delivered =
				tokio::task::spawn_blocking(move || notify_focus_done(notifier.as_ref(), &task)).await;
			if let Err(e) = delivered {
				warn!(error = %e, "finish notification task failed");
			}
			finished.notify_one();
		}
	}
}
