use chrono::{DateTime, Local, NaiveDate, Utc};
use std::sync::Mutex;

/// Source of "today" and "now" for the day-plan engine.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;

	/// Calendar date in the user's local time zone.
	fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}

	fn today(&self) -> NaiveDate {
		Local::now().date_naive()
	}
}

/// Manually driven clock for tests and replays.
pub struct FixedClock {
	now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(now),
		}
	}

	pub fn at_date(date: NaiveDate) -> Self {
		let noon = date.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc();
		Self::new(noon)
	}

	pub fn set(&self, now: DateTime<Utc>) {
		if let Ok(mut guard) = self.now.lock() {
			*guard = now;
		}
	}

	pub fn advance(&self, by: chrono::Duration) {
		if let Ok(mut guard) = self.now.lock() {
			*guard += by;
		}
	}
}

impl Clock for FixedClock {
	fn now(&self) -> DateTime<Utc> {
		self.now.lock().map(|g| *g).unwrap_or_else(|e| *e.into_inner())
	}

	fn today(&self) -> NaiveDate {
		self.now().date_naive()
	}
}
