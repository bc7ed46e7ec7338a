use crate::clock::Clock;
use crate::model::{ChecklistState, ClassificationResult, HistoryEntry, Progress};
use crate::store::{Gateway, StoreError, HISTORY_KEY};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub type History = BTreeMap<NaiveDate, HistoryEntry>;

/// One cell of the calendar view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
	pub date: NaiveDate,
	pub done: usize,
	pub total: usize,
	pub all_done: bool,
}

impl From<&HistoryEntry> for DaySummary {
	fn from(entry: &HistoryEntry) -> Self {
		let Progress { done, total } = entry.progress();
		Self {
			date: entry.date,
			done,
			total,
			all_done: total > 0 && done == total,
		}
	}
}

impl DaySummary {
	/// `✓` for a finished day, otherwise one dot per top-priority item.
	pub fn marker(&self) -> String {
		if self.all_done {
			return "✓".to_string();
		}
		(0..self.total)
			.map(|i| if i < self.done { '●' } else { '○' })
			.collect()
	}
}

/// Per-day archive of finished (or rolled-over) plans. At most one entry per date.
#[derive(Clone)]
pub struct HistoryArchive {
	gateway: Gateway,
	clock: Arc<dyn Clock>,
}

impl HistoryArchive {
	pub fn new(gateway: Gateway, clock: Arc<dyn Clock>) -> Self {
		Self { gateway, clock }
	}

	fn load(&self) -> History {
		self.gateway.load(HISTORY_KEY).unwrap_or_default()
	}

	/// Write or replace the entry for `date` with a fresh timestamp.
	///
	/// Fails without writing when the stored history cannot be read.
	pub fn save(
		&self,
		date: NaiveDate,
		result: &ClassificationResult,
		checks: &ChecklistState,
	) -> Result<HistoryEntry, StoreError> {
		let mut history: History = self.gateway.try_load(HISTORY_KEY)?.unwrap_or_default();
		let entry = HistoryEntry {
			date,
			result: result.clone(),
			checks: checks.clone(),
			saved_at: self.clock.now(),
		};
		let replaced = history.insert(date, entry.clone()).is_some();
		self.gateway.save(HISTORY_KEY, &history)?;
		info!(%date, replaced, progress = ?entry.progress(), "archived day plan");
		Ok(entry)
	}

	pub fn query(&self, date: NaiveDate) -> Option<HistoryEntry> {
		self.load().remove(&date)
	}

	/// Entries with `from <= date <= to`, oldest first.
	pub fn query_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<HistoryEntry> {
		if from > to {
			return Vec::new();
		}
		self.load()
			.range(from..=to)
			.map(|(_, entry)| entry.clone())
			.collect()
	}

	pub fn query_all(&self) -> History {
		self.load()
	}

	pub fn total_days(&self) -> usize {
		self.load().len()
	}

	/// Calendar summary for every archived day of `year`-`month`.
	pub fn month(&self, year: i32, month: u32) -> Vec<DaySummary> {
		let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
			return Vec::new();
		};
		let last = first
			.checked_add_months(chrono::Months::new(1))
			.and_then(|d| d.pred_opt())
			.unwrap_or(first);
		self.query_range(first, last)
			.iter()
			.filter(|e| e.date.month() == month)
			.map(DaySummary::from)
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::FixedClock;
	use crate::model::{sample_result, ItemKey};
	use crate::store::FailingStore;

	fn date(y: i32, m: u32, d: u32) -> NaiveDate {
		NaiveDate::from_ymd_opt(y, m, d).unwrap()
	}

	fn setup() -> (Arc<FixedClock>, Gateway, HistoryArchive) {
		let clock = Arc::new(FixedClock::at_date(date(2026, 10, 19)));
		let gateway = Gateway::in_memory();
		let archive = HistoryArchive::new(gateway.clone(), clock.clone());
		(clock, gateway, archive)
	}

	#[test]
	fn test_save_and_query() {
		let (_clock, _gw, archive) = setup();
		let result = sample_result();
		let mut checks = ChecklistState::default();
		checks.toggle(ItemKey::Top3(0));

		archive.save(date(2026, 10, 19), &result, &checks).unwrap();

		let entry = archive.query(date(2026, 10, 19)).unwrap();
		assert_eq!(entry.result, result);
		assert!(entry.checks.is_checked(&ItemKey::Top3(0)));
		assert!(archive.query(date(2026, 10, 18)).is_none());
	}

	#[test]
	fn test_save_is_idempotent_apart_from_timestamp() {
		let (clock, _gw, archive) = setup();
		let result = sample_result();
		let checks = ChecklistState::default();

		let first = archive.save(date(2026, 10, 19), &result, &checks).unwrap();
		clock.advance(chrono::Duration::minutes(5));
		let second = archive.save(date(2026, 10, 19), &result, &checks).unwrap();

		let stored = archive.query(date(2026, 10, 19)).unwrap();
		assert_eq!(stored.result, first.result);
		assert_eq!(stored.checks, first.checks);
		assert_eq!(stored.saved_at, second.saved_at);
		assert!(second.saved_at > first.saved_at);
		assert_eq!(archive.total_days(), 1);
	}

	#[test]
	fn test_later_save_replaces_entry() {
		let (_clock, _gw, archive) = setup();
		let result = sample_result();
		archive
			.save(date(2026, 10, 19), &result, &ChecklistState::default())
			.unwrap();
		let mut checks = ChecklistState::default();
		checks.set(ItemKey::Top3(0), true);
		checks.set(ItemKey::Top3(1), true);
		archive.save(date(2026, 10, 19), &result, &checks).unwrap();

		assert_eq!(archive.total_days(), 1);
		assert!(archive.query(date(2026, 10, 19)).unwrap().progress().all_done());
	}

	#[test]
	fn test_queries_do_not_mutate() {
		let (_clock, gw, archive) = setup();
		archive
			.save(date(2026, 10, 1), &sample_result(), &ChecklistState::default())
			.unwrap();
		let before: Option<History> = gw.load(HISTORY_KEY);
		let _ = archive.query(date(2026, 10, 1));
		let _ = archive.query_range(date(2026, 9, 1), date(2026, 12, 1));
		let _ = archive.query_all();
		let _ = archive.month(2026, 10);
		let after: Option<History> = gw.load(HISTORY_KEY);
		assert_eq!(before, after);
	}

	#[test]
	fn test_range_and_month() {
		let (_clock, _gw, archive) = setup();
		let result = sample_result();
		let mut all = ChecklistState::default();
		all.set(ItemKey::Top3(0), true);
		all.set(ItemKey::Top3(1), true);
		archive.save(date(2026, 9, 30), &result, &all).unwrap();
		archive.save(date(2026, 10, 2), &result, &all).unwrap();
		archive
			.save(date(2026, 10, 31), &result, &ChecklistState::default())
			.unwrap();
		archive.save(date(2026, 11, 1), &result, &all).unwrap();

		let range = archive.query_range(date(2026, 10, 1), date(2026, 10, 31));
		assert_eq!(range.len(), 2);
		assert!(archive
			.query_range(date(2026, 10, 31), date(2026, 10, 1))
			.is_empty());

		let october = archive.month(2026, 10);
		assert_eq!(october.len(), 2);
		assert_eq!(october[0].date, date(2026, 10, 2));
		assert!(october[0].all_done);
		assert_eq!((october[1].done, october[1].total), (0, 2));
		assert!(!october[1].all_done);
		assert!(archive.month(2026, 13).is_empty());
		assert_eq!(archive.total_days(), 4);
	}

	#[test]
	fn test_failed_read_keeps_other_days() {
		let clock = Arc::new(FixedClock::at_date(date(2026, 10, 19)));
		let store = Arc::new(FailingStore::default());
		let archive = HistoryArchive::new(Gateway::new(store.clone()), clock);
		let result = sample_result();
		let checks = ChecklistState::default();
		archive.save(date(2026, 10, 1), &result, &checks).unwrap();
		archive.save(date(2026, 10, 2), &result, &checks).unwrap();

		store.break_reads(HISTORY_KEY);
		assert!(archive.save(date(2026, 10, 3), &result, &checks).is_err());

		store.heal();
		assert_eq!(archive.total_days(), 2);
		assert!(archive.query(date(2026, 10, 3)).is_none());
		archive.save(date(2026, 10, 3), &result, &checks).unwrap();
		assert_eq!(archive.total_days(), 3);
	}

	#[test]
	fn test_marker_shows_every_item() {
		let day = |done, total| DaySummary {
			date: date(2026, 10, 19),
			done,
			total,
			all_done: total > 0 && done == total,
		};
		assert_eq!(day(3, 5).marker(), "●●●○○");
		assert_eq!(day(0, 2).marker(), "○○");
		assert_eq!(day(4, 4).marker(), "✓");
	}

	#[test]
	fn test_corrupt_history_reads_as_empty() {
		let (_clock, gw, archive) = setup();
		gw.save_raw(HISTORY_KEY, "[[[").unwrap();
		assert_eq!(archive.total_days(), 0);
		archive
			.save(date(2026, 10, 19), &sample_result(), &ChecklistState::default())
			.unwrap();
		assert_eq!(archive.total_days(), 1);
	}
}
