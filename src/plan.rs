use crate::history::HistoryArchive;
use crate::model::{
	Category, ClassificationResult, DayPlan, HistoryEntry, ItemKey, Progress, Stage, TimeSource,
};
use crate::store::{Gateway, StoreError, ACTIVE_PLAN_KEY};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PlanError {
	#[error("no classified plan is active")]
	NoPlan,
	#[error("'{0}' is not an item of today's plan")]
	UnknownItem(ItemKey),
	#[error("'{0}' cannot be deleted (only shallow, deep and micro items can)")]
	NotDeletable(ItemKey),
	#[error("the plan is in stage {0}; checklist changes need stage result")]
	NotEditable(Stage),
	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Outcome of a checklist or deletion change.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
	pub key: ItemKey,
	/// Checklist flag of `key` after the change
	pub checked: bool,
	/// Set when this change completed the top-priority list and the day was archived
	pub archived: Option<HistoryEntry>,
	/// Set when this change un-completed a day that had already been archived
	pub reopened: bool,
}

/// The active day. Every change is written through before it returns.
pub struct PlanStore {
	gateway: Gateway,
	history: HistoryArchive,
	plan: DayPlan,
}

impl PlanStore {
	/// Load the stored plan, rolling it into history if it belongs to another day.
	pub fn open(
		gateway: Gateway,
		history: HistoryArchive,
		today: NaiveDate,
	) -> Result<Self, StoreError> {
		let plan = gateway
			.try_load::<DayPlan>(ACTIVE_PLAN_KEY)?
			.unwrap_or_else(|| DayPlan::empty(today));
		let mut store = Self {
			gateway,
			history,
			plan,
		};
		if !store.roll_over(today)? {
			store.restore();
		}
		Ok(store)
	}

	fn restore(&mut self) {
		match self.plan.stage {
			// The request died with the previous process.
			Stage::AwaitingClassification => {
				warn!("restored plan was awaiting classification; back to time config");
				self.plan.stage = Stage::TimeConfig;
			}
			Stage::Result | Stage::Archived if self.plan.result.is_none() => {
				warn!(stage = %self.plan.stage, "restored plan has no classification; starting over");
				self.plan = DayPlan::empty(self.plan.date);
			}
			Stage::Result if self.plan.done => self.plan.stage = Stage::Archived,
			_ => {}
		}
		debug!(date = %self.plan.date, stage = %self.plan.stage, "restored day plan");
	}

	/// Archive and clear the active slot when it belongs to a day other than `today`.
	///
	/// Returns whether a rollover happened.
	pub fn roll_over(&mut self, today: NaiveDate) -> Result<bool, StoreError> {
		if self.plan.date == today {
			return Ok(false);
		}
		// The stale day stays active until it is safely in history.
		if let Some(result) = &self.plan.result {
			self.history.save(self.plan.date, result, &self.plan.checks)?;
		}
		let stale = std::mem::replace(&mut self.plan, DayPlan::empty(today));
		if let Err(e) = self.persist() {
			self.plan = stale;
			return Err(e);
		}
		info!(from = %stale.date, to = %today, archived = stale.result.is_some(), "rolled over day plan");
		Ok(true)
	}

	fn persist(&self) -> Result<(), StoreError> {
		self.gateway.save(ACTIVE_PLAN_KEY, &self.plan)
	}

	/// Apply `change` and write it through, or leave the plan untouched.
	fn update(&mut self, change: impl FnOnce(&mut DayPlan)) -> Result<(), StoreError> {
		let before = self.plan.clone();
		change(&mut self.plan);
		if let Err(e) = self.persist() {
			warn!(error = %e, "plan change not saved; rolled back");
			self.plan = before;
			return Err(e);
		}
		Ok(())
	}

	pub fn plan(&self) -> &DayPlan {
		&self.plan
	}

	pub fn stage(&self) -> Stage {
		self.plan.stage
	}

	pub fn history(&self) -> &HistoryArchive {
		&self.history
	}

	pub fn set_stage(&mut self, stage: Stage) -> Result<(), StoreError> {
		if self.plan.stage != stage {
			debug!(from = %self.plan.stage, to = %stage, "stage change");
			self.update(|plan| plan.stage = stage)?;
		}
		Ok(())
	}

	pub fn set_input(&mut self, text: &str, stage: Stage) -> Result<(), StoreError> {
		self.update(|plan| {
			plan.input = text.to_string();
			plan.stage = stage;
		})
	}

	pub fn set_available_minutes(
		&mut self,
		minutes: u32,
		source: TimeSource,
	) -> Result<(), StoreError> {
		self.update(|plan| {
			plan.available_minutes = Some(minutes);
			plan.time_source = Some(source);
		})
	}

	/// Install a fresh classification with empty checklist and deletions.
	pub fn install(&mut self, result: ClassificationResult) -> Result<(), StoreError> {
		let date = self.plan.date;
		self.update(|plan| {
			let previous = std::mem::replace(plan, DayPlan::empty(date));
			plan.input = previous.input;
			plan.available_minutes = previous.available_minutes;
			plan.time_source = previous.time_source;
			plan.result = Some(result);
			plan.stage = Stage::Result;
		})?;
		info!(%date, "installed classification");
		Ok(())
	}

	/// Back to editing an archived day. The next mutation that finds the
	/// top-priority list complete archives it again.
	pub fn reopen(&mut self) -> Result<(), StoreError> {
		self.update(|plan| {
			plan.done = false;
			plan.stage = Stage::Result;
		})
	}

	/// Drop the active plan without archiving it.
	pub fn clear(&mut self, today: NaiveDate) -> Result<(), StoreError> {
		self.update(|plan| *plan = DayPlan::empty(today))
	}

	fn editable(&self, key: &ItemKey) -> Result<&ClassificationResult, PlanError> {
		if self.plan.stage != Stage::Result {
			return Err(PlanError::NotEditable(self.plan.stage));
		}
		let result = self.plan.result.as_ref().ok_or(PlanError::NoPlan)?;
		if !result.contains(key) {
			return Err(PlanError::UnknownItem(*key));
		}
		Ok(result)
	}

	pub fn toggle_check(&mut self, key: ItemKey) -> Result<Mutation, PlanError> {
		self.editable(&key)?;
		self.mutate(key, |plan| plan.checks.toggle(key))
	}

	/// Tombstone a shallow/deep/micro item. Its checklist flag is kept.
	pub fn delete(&mut self, key: ItemKey) -> Result<Mutation, PlanError> {
		self.editable(&key)?;
		if !key.is_deletable() {
			return Err(PlanError::NotDeletable(key));
		}
		self.mutate(key, |plan| {
			plan.deleted.insert(key);
			plan.checks.is_checked(&key)
		})
	}

	/// Apply a checklist change, archive the day if it just completed, then
	/// write through. On any failure the in-memory plan is put back.
	fn mutate(
		&mut self,
		key: ItemKey,
		change: impl FnOnce(&mut DayPlan) -> bool,
	) -> Result<Mutation, PlanError> {
		let before = self.plan.clone();
		let checked = change(&mut self.plan);
		let outcome = self.after_mutation(key, checked);
		if let Err(e) = &outcome {
			warn!(%key, error = %e, "checklist change not saved; rolled back");
			self.plan = before;
		}
		outcome
	}

	fn after_mutation(&mut self, key: ItemKey, checked: bool) -> Result<Mutation, PlanError> {
		let complete = self.is_complete();
		let mut mutation = Mutation {
			key,
			checked,
			archived: None,
			reopened: false,
		};
		// `done` is only set once the history entry exists.
		if complete && !self.plan.done {
			mutation.archived = Some(self.archive_today()?);
			self.plan.done = true;
		} else if !complete && self.plan.done {
			self.plan.done = false;
			mutation.reopened = true;
		}
		self.persist()?;
		Ok(mutation)
	}

	/// Completion condition: a non-empty top-priority list with every item checked.
	pub fn is_complete(&self) -> bool {
		self.plan.progress().is_some_and(|p| p.all_done())
	}

	pub fn progress(&self) -> Option<Progress> {
		self.plan.progress()
	}

	/// Snapshot the current result and checklist into history under the plan's date.
	pub fn archive_today(&self) -> Result<HistoryEntry, PlanError> {
		let result = self.plan.result.as_ref().ok_or(PlanError::NoPlan)?;
		Ok(self
			.history
			.save(self.plan.date, result, &self.plan.checks)?)
	}

	pub fn is_deleted(&self, key: &ItemKey) -> bool {
		self.plan.deleted.contains(key)
	}

	/// Non-deleted items of a category, in list order.
	pub fn visible_items(&self, category: Category) -> Vec<(ItemKey, &str)> {
		let Some(result) = self.plan.result.as_ref() else {
			return Vec::new();
		};
		result
			.keys(category)
			.into_iter()
			.filter(|key| !self.plan.deleted.contains(key))
			.filter_map(|key| result.item(&key).map(|text| (key, text)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::{Clock, FixedClock};
	use crate::model::{sample_result, ChecklistState};
	use crate::store::{FailingStore, HISTORY_KEY};
	use std::sync::Arc;

	fn date(y: i32, m: u32, d: u32) -> NaiveDate {
		NaiveDate::from_ymd_opt(y, m, d).unwrap()
	}

	fn setup(today: NaiveDate) -> (Gateway, HistoryArchive, PlanStore) {
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date(today));
		let gateway = Gateway::in_memory();
		let history = HistoryArchive::new(gateway.clone(), clock);
		let store = PlanStore::open(gateway.clone(), history.clone(), today).unwrap();
		(gateway, history, store)
	}

	fn with_result(today: NaiveDate) -> (Gateway, HistoryArchive, PlanStore) {
		let (gw, history, mut store) = setup(today);
		store.install(sample_result()).unwrap();
		(gw, history, store)
	}

	fn failing_with_result(today: NaiveDate) -> (Arc<FailingStore>, Gateway, HistoryArchive, PlanStore) {
		let backend = Arc::new(FailingStore::default());
		let gateway = Gateway::new(backend.clone());
		let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date(today));
		let history = HistoryArchive::new(gateway.clone(), clock);
		let mut store = PlanStore::open(gateway.clone(), history.clone(), today).unwrap();
		store.install(sample_result()).unwrap();
		(backend, gateway, history, store)
	}

	#[test]
	fn test_empty_store_starts_at_input() {
		let (_gw, history, store) = setup(date(2026, 10, 19));
		assert_eq!(store.stage(), Stage::Input);
		assert!(store.plan().result.is_none());
		assert_eq!(history.total_days(), 0);
	}

	#[test]
	fn test_corrupt_plan_loads_as_default() {
		let today = date(2026, 10, 19);
		let (gw, history, _store) = setup(today);
		gw.save_raw(ACTIVE_PLAN_KEY, "{\"date\": 12").unwrap();
		let store = PlanStore::open(gw, history, today).unwrap();
		assert_eq!(store.plan(), &DayPlan::empty(today));
	}

	#[test]
	fn test_same_day_restores_verbatim() {
		let today = date(2026, 10, 19);
		let (gw, history, mut store) = with_result(today);
		store.toggle_check(ItemKey::Shallow(0)).unwrap();
		store.delete(ItemKey::Deep(0)).unwrap();
		store
			.set_available_minutes(120, TimeSource::Manual)
			.unwrap();
		let saved = store.plan().clone();

		let reopened = PlanStore::open(gw, history, today).unwrap();
		assert_eq!(reopened.plan(), &saved);
	}

	#[test]
	fn test_rollover_archives_stale_plan() {
		let yesterday = date(2026, 10, 18);
		let today = date(2026, 10, 19);
		let (gw, history, mut store) = with_result(yesterday);
		store.toggle_check(ItemKey::Top3(0)).unwrap();

		let store = PlanStore::open(gw.clone(), history.clone(), today).unwrap();
		assert_eq!(store.plan(), &DayPlan::empty(today));
		let entry = history.query(yesterday).unwrap();
		assert!(entry.checks.is_checked(&ItemKey::Top3(0)));
		assert!(history.query(today).is_none());

		let stored: DayPlan = gw.load(ACTIVE_PLAN_KEY).unwrap();
		assert_eq!(stored.date, today);
	}

	#[test]
	fn test_rollover_without_result_archives_nothing() {
		let (gw, history, mut store) = setup(date(2026, 10, 18));
		store.set_input("buy milk", Stage::TimeConfig).unwrap();
		let store = PlanStore::open(gw, history.clone(), date(2026, 10, 19)).unwrap();
		assert_eq!(store.stage(), Stage::Input);
		assert_eq!(history.total_days(), 0);
	}

	#[test]
	fn test_rollover_mid_session() {
		let (_gw, history, mut store) = with_result(date(2026, 10, 18));
		assert!(!store.roll_over(date(2026, 10, 18)).unwrap());
		assert!(store.roll_over(date(2026, 10, 19)).unwrap());
		assert!(!store.roll_over(date(2026, 10, 19)).unwrap());
		assert_eq!(history.total_days(), 1);
		assert_eq!(store.plan().date, date(2026, 10, 19));
	}

	#[test]
	fn test_awaiting_is_not_restored() {
		let today = date(2026, 10, 19);
		let (gw, history, mut store) = setup(today);
		store.set_input("x", Stage::AwaitingClassification).unwrap();
		let store = PlanStore::open(gw, history, today).unwrap();
		assert_eq!(store.stage(), Stage::TimeConfig);
		assert_eq!(store.plan().input, "x");
	}

	#[test]
	fn test_toggle_persists() {
		let today = date(2026, 10, 19);
		let (gw, _history, mut store) = with_result(today);
		let mutation = store.toggle_check(ItemKey::Top3(1)).unwrap();
		assert!(mutation.checked);
		let stored: DayPlan = gw.load(ACTIVE_PLAN_KEY).unwrap();
		assert!(stored.checks.is_checked(&ItemKey::Top3(1)));

		let mutation = store.toggle_check(ItemKey::Top3(1)).unwrap();
		assert!(!mutation.checked);
		let stored: DayPlan = gw.load(ACTIVE_PLAN_KEY).unwrap();
		assert!(stored.checks.contains_key(&ItemKey::Top3(1)));
		assert!(!stored.checks.is_checked(&ItemKey::Top3(1)));
	}

	#[test]
	fn test_unknown_and_locked_items() {
		let (_gw, _history, mut store) = setup(date(2026, 10, 19));
		assert!(matches!(
			store.toggle_check(ItemKey::Top3(0)),
			Err(PlanError::NotEditable(Stage::Input))
		));
		store.install(sample_result()).unwrap();
		assert!(matches!(
			store.toggle_check(ItemKey::Top3(9)),
			Err(PlanError::UnknownItem(_))
		));
		assert!(matches!(
			store.delete(ItemKey::Top3(0)),
			Err(PlanError::NotDeletable(_))
		));
		assert!(matches!(
			store.delete(ItemKey::Sequence { phase: 0, task: 0 }),
			Err(PlanError::NotDeletable(_))
		));
	}

	#[test]
	fn test_deletion_is_a_tombstone() {
		let (_gw, _history, mut store) = with_result(date(2026, 10, 19));
		store.toggle_check(ItemKey::Shallow(0)).unwrap();
		store.delete(ItemKey::Shallow(0)).unwrap();

		assert!(store.is_deleted(&ItemKey::Shallow(0)));
		assert!(store.plan().checks.is_checked(&ItemKey::Shallow(0)));
		assert_eq!(
			store.plan().result.as_ref().unwrap().shallow.len(),
			2,
			"backing list untouched"
		);
		let visible = store.visible_items(Category::Shallow);
		assert_eq!(visible, vec![(ItemKey::Shallow(1), "reply to email")]);

		// Toggling after deletion still works and keeps the tombstone.
		let mutation = store.toggle_check(ItemKey::Shallow(0)).unwrap();
		assert!(!mutation.checked);
		assert!(store.is_deleted(&ItemKey::Shallow(0)));
	}

	#[test]
	fn test_completion_archives_once() {
		let today = date(2026, 10, 19);
		let (_gw, history, mut store) = with_result(today);

		let first = store.toggle_check(ItemKey::Top3(0)).unwrap();
		assert!(first.archived.is_none());
		assert!(history.query(today).is_none());

		let second = store.toggle_check(ItemKey::Top3(1)).unwrap();
		let entry = second.archived.expect("completing top3 archives the day");
		assert_eq!(entry.date, today);
		assert!(store.plan().done);
		assert_eq!(history.query(today).unwrap().checks, store.plan().checks);

		// Unrelated changes after completion do not re-archive.
		let third = store.toggle_check(ItemKey::Micro(0)).unwrap();
		assert!(third.archived.is_none());
		assert!(!history
			.query(today)
			.unwrap()
			.checks
			.is_checked(&ItemKey::Micro(0)));
	}

	#[test]
	fn test_non_top3_completion_does_not_archive() {
		let today = date(2026, 10, 19);
		let (_gw, history, mut store) = with_result(today);
		for key in [
			ItemKey::Shallow(0),
			ItemKey::Shallow(1),
			ItemKey::Deep(0),
			ItemKey::Micro(0),
			ItemKey::Sequence { phase: 0, task: 0 },
			ItemKey::Sequence { phase: 0, task: 1 },
		] {
			assert!(store.toggle_check(key).unwrap().archived.is_none());
		}
		assert!(history.query(today).is_none());
		assert!(!store.plan().done);
	}

	#[test]
	fn test_unchecking_reopens_done_flag() {
		let (_gw, _history, mut store) = with_result(date(2026, 10, 19));
		store.toggle_check(ItemKey::Top3(0)).unwrap();
		store.toggle_check(ItemKey::Top3(1)).unwrap();
		let mutation = store.toggle_check(ItemKey::Top3(1)).unwrap();
		assert!(mutation.reopened);
		assert!(!store.plan().done);
	}

	#[test]
	fn test_empty_top3_never_completes() {
		let today = date(2026, 10, 19);
		let (_gw, history, mut store) = setup(today);
		let mut result = sample_result();
		result.top3.clear();
		store.install(result).unwrap();
		let mutation = store.toggle_check(ItemKey::Shallow(0)).unwrap();
		assert!(mutation.archived.is_none());
		assert!(!store.is_complete());
		assert_eq!(history.total_days(), 0);
	}

	#[test]
	fn test_install_resets_checks_and_keeps_time() {
		let (_gw, _history, mut store) = setup(date(2026, 10, 19));
		store.set_input("a\nb", Stage::TimeConfig).unwrap();
		store
			.set_available_minutes(90, TimeSource::Timetable)
			.unwrap();
		store.install(sample_result()).unwrap();
		store.toggle_check(ItemKey::Top3(0)).unwrap();
		store.install(sample_result()).unwrap();

		let plan = store.plan();
		assert_eq!(plan.checks, ChecklistState::default());
		assert!(plan.deleted.is_empty());
		assert_eq!(plan.available_minutes, Some(90));
		assert_eq!(plan.time_source, Some(TimeSource::Timetable));
		assert_eq!(plan.stage, Stage::Result);
	}

	#[test]
	fn test_done_result_restores_as_archived() {
		let today = date(2026, 10, 19);
		let (gw, history, mut store) = with_result(today);
		store.toggle_check(ItemKey::Top3(0)).unwrap();
		store.toggle_check(ItemKey::Top3(1)).unwrap();
		assert_eq!(store.stage(), Stage::Result);

		let store = PlanStore::open(gw, history, today).unwrap();
		assert_eq!(store.stage(), Stage::Archived);
	}

	#[test]
	fn test_failed_archive_leaves_day_open() {
		let today = date(2026, 10, 19);
		let (backend, gw, history, mut store) = failing_with_result(today);
		store.toggle_check(ItemKey::Top3(0)).unwrap();

		backend.break_writes(HISTORY_KEY);
		assert!(matches!(
			store.toggle_check(ItemKey::Top3(1)),
			Err(PlanError::Store(_))
		));
		assert!(!store.plan().done);
		assert!(!store.plan().checks.is_checked(&ItemKey::Top3(1)));
		let stored: DayPlan = gw.load(ACTIVE_PLAN_KEY).unwrap();
		assert!(!stored.done);
		assert!(!stored.checks.is_checked(&ItemKey::Top3(1)));

		backend.heal();
		assert!(history.query(today).is_none());
		let reopened = PlanStore::open(gw.clone(), history.clone(), today).unwrap();
		assert_eq!(reopened.stage(), Stage::Result);

		// Retrying the same check archives the day.
		let mutation = store.toggle_check(ItemKey::Top3(1)).unwrap();
		assert!(mutation.archived.is_some());
		assert!(store.plan().done);
		assert!(history.query(today).is_some());
	}

	#[test]
	fn test_failed_write_rolls_back_toggle_and_delete() {
		let today = date(2026, 10, 19);
		let (backend, gw, _history, mut store) = failing_with_result(today);
		backend.break_writes(ACTIVE_PLAN_KEY);

		assert!(store.toggle_check(ItemKey::Shallow(0)).is_err());
		assert!(!store.plan().checks.contains_key(&ItemKey::Shallow(0)));
		assert!(store.delete(ItemKey::Deep(0)).is_err());
		assert!(!store.is_deleted(&ItemKey::Deep(0)));
		assert!(store.set_available_minutes(30, TimeSource::Manual).is_err());
		assert_eq!(store.plan().available_minutes, None);

		backend.heal();
		let stored: DayPlan = gw.load(ACTIVE_PLAN_KEY).unwrap();
		assert_eq!(&stored, store.plan());
	}

	#[test]
	fn test_failed_rollover_keeps_stale_day_active() {
		let yesterday = date(2026, 10, 18);
		let today = date(2026, 10, 19);
		let (backend, gw, history, mut store) = failing_with_result(yesterday);
		store.toggle_check(ItemKey::Top3(0)).unwrap();

		backend.break_writes(HISTORY_KEY);
		assert!(store.roll_over(today).is_err());
		assert_eq!(store.plan().date, yesterday);
		assert!(store.plan().result.is_some());
		let stored: DayPlan = gw.load(ACTIVE_PLAN_KEY).unwrap();
		assert_eq!(stored.date, yesterday);

		// History is readable but the plan slot is not writable.
		backend.heal();
		backend.break_writes(ACTIVE_PLAN_KEY);
		assert!(store.roll_over(today).is_err());
		assert_eq!(store.plan().date, yesterday);

		backend.heal();
		assert!(store.roll_over(today).unwrap());
		assert_eq!(store.plan(), &DayPlan::empty(today));
		assert_eq!(history.total_days(), 1);
		assert!(history
			.query(yesterday)
			.unwrap()
			.checks
			.is_checked(&ItemKey::Top3(0)));
	}

	#[test]
	fn test_unreadable_plan_fails_open() {
		let today = date(2026, 10, 19);
		let (backend, gw, history, _store) = failing_with_result(today);
		backend.break_reads(ACTIVE_PLAN_KEY);
		assert!(PlanStore::open(gw, history, today).is_err());
	}
}
