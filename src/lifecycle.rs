//! Stage machine for one day:
//! input -> time config -> awaiting classification -> result -> archived.
//!
//! Every public method is one discrete event. Each runs to completion, starts
//! by rolling the plan over if the calendar day changed, and leaves the plan
//! persisted.

use crate::clock::Clock;
use crate::config::Config;
use crate::history::HistoryArchive;
use crate::model::{
	ClassificationResult, DayPlan, ItemKey, Stage, TimeSource, TimetableResult,
};
use crate::plan::{Mutation, PlanError, PlanStore};
use crate::service::{ClassificationRequest, ServiceError};
use crate::store::{Gateway, StoreError, TIMETABLE_KEY};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error("the brain dump is empty")]
	EmptyInput,
	#[error("choose your available hours or a timetable first")]
	NoTimeSource,
	#[error("no timetable has been saved yet")]
	NoTimetable,
	#[error("the saved timetable has no free time")]
	EmptyTimetable,
	#[error("available hours must be at least one minute and at most 24 (got {0})")]
	InvalidHours(f32),
	#[error("cannot {action} during stage {stage}")]
	WrongStage { action: &'static str, stage: Stage },
	#[error(transparent)]
	Plan(#[from] PlanError),
	#[error(transparent)]
	Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
	Info,
	Error,
}

/// Dismissible message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
	pub level: NoticeLevel,
	pub message: String,
}

impl Notice {
	fn info(message: impl Into<String>) -> Self {
		Self {
			level: NoticeLevel::Info,
			message: message.into(),
		}
	}

	fn error(message: impl Into<String>) -> Self {
		Self {
			level: NoticeLevel::Error,
			message: message.into(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

/// The single outstanding classification request.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
	pub id: RequestId,
	pub request: ClassificationRequest,
}

/// What happened to a service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
	Installed,
	Reverted,
	/// The response no longer matches the outstanding request
	Ignored,
}

pub struct LifecycleController {
	store: PlanStore,
	gateway: Gateway,
	clock: Arc<dyn Clock>,
	completion_delay: Duration,
	next_request: u64,
	pending_request: Option<RequestId>,
	archive_due: Option<DateTime<Utc>>,
	notice: Option<Notice>,
}

impl LifecycleController {
	pub fn open(
		gateway: Gateway,
		clock: Arc<dyn Clock>,
		completion_delay: Duration,
	) -> Result<Self, StoreError> {
		let history = HistoryArchive::new(gateway.clone(), clock.clone());
		let store = PlanStore::open(gateway.clone(), history, clock.today())?;
		info!(date = %store.plan().date, stage = %store.stage(), "day plan opened");
		Ok(Self {
			store,
			gateway,
			clock,
			completion_delay,
			next_request: 1,
			pending_request: None,
			archive_due: None,
			notice: None,
		})
	}

	pub fn from_config(
		cfg: &Config,
		gateway: Gateway,
		clock: Arc<dyn Clock>,
	) -> Result<Self, StoreError> {
		Self::open(gateway, clock, cfg.completion_delay())
	}

	pub fn stage(&self) -> Stage {
		self.store.stage()
	}

	pub fn plan(&self) -> &DayPlan {
		self.store.plan()
	}

	pub fn store(&self) -> &PlanStore {
		&self.store
	}

	pub fn history(&self) -> &HistoryArchive {
		self.store.history()
	}

	pub fn notice(&self) -> Option<&Notice> {
		self.notice.as_ref()
	}

	pub fn dismiss_notice(&mut self) -> Option<Notice> {
		self.notice.take()
	}

	/// When the pending completion transition becomes due, if any.
	pub fn archive_due_at(&self) -> Option<DateTime<Utc>> {
		self.archive_due
	}

	pub fn saved_timetable(&self) -> Option<TimetableResult> {
		self.gateway.load(TIMETABLE_KEY)
	}

	fn expect_stage(&self, action: &'static str, allowed: &[Stage]) -> Result<(), LifecycleError> {
		let stage = self.stage();
		if allowed.contains(&stage) {
			Ok(())
		} else {
			Err(LifecycleError::WrongStage { action, stage })
		}
	}

	fn sync_day(&mut self) -> Result<(), StoreError> {
		if self.store.roll_over(self.clock.today())? {
			self.pending_request = None;
			self.archive_due = None;
			self.notice = Some(Notice::info(
				"A new day has started. The previous plan was moved to history.",
			));
		}
		Ok(())
	}

	/// Input -> TimeConfig. The text is carried forward unchanged.
	pub fn submit_text(&mut self, text: &str) -> Result<(), LifecycleError> {
		self.sync_day()?;
		self.expect_stage("enter tasks", &[Stage::Input, Stage::TimeConfig])?;
		if text.trim().is_empty() {
			return Err(LifecycleError::EmptyInput);
		}
		self.store.set_input(text, Stage::TimeConfig)?;
		Ok(())
	}

	pub fn choose_hours(&mut self, hours: f32) -> Result<(), LifecycleError> {
		self.sync_day()?;
		self.expect_stage("set hours", &[Stage::TimeConfig])?;
		if !hours.is_finite() || hours > 24.0 || (hours * 60.0).round() < 1.0 {
			return Err(LifecycleError::InvalidHours(hours));
		}
		let minutes = (hours * 60.0).round() as u32;
		self.store.set_available_minutes(minutes, TimeSource::Manual)?;
		Ok(())
	}

	/// Use the saved timetable as today's time source.
	pub fn use_saved_timetable(&mut self) -> Result<u32, LifecycleError> {
		self.sync_day()?;
		self.expect_stage("use a timetable", &[Stage::TimeConfig])?;
		let minutes = self.saved_minutes()?;
		self.store.set_available_minutes(minutes, TimeSource::Timetable)?;
		Ok(minutes)
	}

	fn saved_minutes(&self) -> Result<u32, LifecycleError> {
		let table = self.saved_timetable().ok_or(LifecycleError::NoTimetable)?;
		match table.available_minutes() {
			0 => Err(LifecycleError::EmptyTimetable),
			minutes => Ok(minutes),
		}
	}

	/// Apply a timetable-parsing response. Success replaces the saved timetable
	/// and selects it; failure leaves everything as it was plus a notice.
	pub fn apply_timetable(
		&mut self,
		outcome: Result<TimetableResult, ServiceError>,
	) -> Result<bool, LifecycleError> {
		self.sync_day()?;
		if self.stage() != Stage::TimeConfig {
			debug!(stage = %self.stage(), "ignoring timetable response outside time config");
			return Ok(false);
		}
		match outcome.and_then(|table| table.validate().map_err(ServiceError::from)) {
			Ok(table) => {
				self.gateway.save(TIMETABLE_KEY, &table)?;
				self.store
					.set_available_minutes(table.available_minutes(), TimeSource::Timetable)?;
				info!(free_hours = table.free_hours, slots = table.slots.len(), "timetable saved");
				self.notice = Some(Notice::info(table.summary.clone()));
				Ok(true)
			}
			Err(e) => {
				warn!(error = %e, "timetable parsing failed");
				self.notice = Some(Notice::error(
					"Could not read that timetable. Check the image and try again.",
				));
				Ok(false)
			}
		}
	}

	/// TimeConfig -> AwaitingClassification. Refused without a time source.
	pub fn confirm(&mut self) -> Result<Ticket, LifecycleError> {
		self.sync_day()?;
		self.expect_stage("request classification", &[Stage::TimeConfig])?;
		let minutes = match self.plan().available_minutes {
			Some(minutes) if minutes > 0 => minutes,
			_ => {
				let minutes = self.saved_minutes().map_err(|e| match e {
					LifecycleError::NoTimetable => LifecycleError::NoTimeSource,
					other => other,
				})?;
				self.store
					.set_available_minutes(minutes, TimeSource::Timetable)?;
				minutes
			}
		};

		let id = RequestId(self.next_request);
		self.next_request += 1;
		self.store.set_stage(Stage::AwaitingClassification)?;
		self.pending_request = Some(id);
		self.notice = None;
		info!(request = id.0, minutes, "classification requested");
		Ok(Ticket {
			id,
			request: ClassificationRequest {
				text: self.plan().input.clone(),
				hours: Some(minutes as f32 / 60.0),
			},
		})
	}

	/// Deliver the classification service's response for `id`.
	pub fn complete(
		&mut self,
		id: RequestId,
		outcome: Result<ClassificationResult, ServiceError>,
	) -> Result<Applied, LifecycleError> {
		self.sync_day()?;
		if self.stage() != Stage::AwaitingClassification || self.pending_request != Some(id) {
			debug!(request = id.0, stage = %self.stage(), "dropping stale classification response");
			return Ok(Applied::Ignored);
		}
		self.pending_request = None;
		match outcome {
			Ok(result) => {
				self.store.install(result)?;
				Ok(Applied::Installed)
			}
			Err(e) => {
				warn!(request = id.0, error = %e, "classification failed");
				self.store.set_stage(Stage::TimeConfig)?;
				self.notice = Some(Notice::error(e.user_message()));
				Ok(Applied::Reverted)
			}
		}
	}

	pub fn toggle_check(&mut self, key: ItemKey) -> Result<Mutation, LifecycleError> {
		self.sync_day()?;
		let mutation = self.store.toggle_check(key)?;
		self.after_mutation(&mutation)?;
		Ok(mutation)
	}

	pub fn delete(&mut self, key: ItemKey) -> Result<Mutation, LifecycleError> {
		self.sync_day()?;
		let mutation = self.store.delete(key)?;
		self.after_mutation(&mutation)?;
		Ok(mutation)
	}

	fn after_mutation(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
		if mutation.reopened {
			self.archive_due = None;
		}
		if mutation.archived.is_some() {
			self.notice = Some(Notice::info("All top priorities done. Nice work!"));
			if self.completion_delay.is_zero() {
				self.finish_day()?;
			} else {
				let delay = chrono::Duration::from_std(self.completion_delay)
					.unwrap_or_else(|_| chrono::Duration::zero());
				self.archive_due = Some(self.clock.now() + delay);
			}
		}
		Ok(())
	}

	fn finish_day(&mut self) -> Result<(), StoreError> {
		self.archive_due = None;
		self.store.set_stage(Stage::Archived)?;
		info!(date = %self.plan().date, "day archived");
		Ok(())
	}

	/// Fire the delayed completion transition once it is due.
	pub fn poll(&mut self) -> Result<bool, LifecycleError> {
		self.sync_day()?;
		let Some(due) = self.archive_due else {
			return Ok(false);
		};
		if self.clock.now() < due {
			return Ok(false);
		}
		if self.stage() == Stage::Result && self.plan().done {
			self.finish_day()?;
			return Ok(true);
		}
		self.archive_due = None;
		Ok(false)
	}

	/// Archived -> Result. Re-completing overwrites the day's history entry.
	pub fn reopen(&mut self) -> Result<(), LifecycleError> {
		self.sync_day()?;
		self.expect_stage("reopen", &[Stage::Archived])?;
		self.store.reopen()?;
		Ok(())
	}

	/// Archived -> Input. History is left alone.
	pub fn start_over(&mut self) -> Result<(), LifecycleError> {
		self.sync_day()?;
		self.expect_stage("start over", &[Stage::Archived])?;
		self.clear();
		self.store.clear(self.clock.today())?;
		Ok(())
	}

	/// Discard the active plan from any stage, without archiving.
	pub fn reset(&mut self) -> Result<(), LifecycleError> {
		self.sync_day()?;
		self.clear();
		self.store.clear(self.clock.today())?;
		info!("day plan reset");
		Ok(())
	}

	fn clear(&mut self) {
		self.pending_request = None;
		self.archive_due = None;
		self.notice = None;
	}
}
