use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Where the day is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	#[default]
	Input,
	TimeConfig,
	AwaitingClassification,
	Result,
	Archived,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Stage::Input => "input",
			Stage::TimeConfig => "time-config",
			Stage::AwaitingClassification => "awaiting-classification",
			Stage::Result => "result",
			Stage::Archived => "archived",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
	Manual,
	Timetable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
	Top3,
	Shallow,
	Deep,
	Micro,
	Sequence,
}

impl Category {
	pub fn prefix(self) -> &'static str {
		match self {
			Category::Top3 => "top3",
			Category::Shallow => "shallow",
			Category::Deep => "deep",
			Category::Micro => "micro",
			Category::Sequence => "seq",
		}
	}
}

/// Synthetic checklist key: category plus position in the backing list.
///
/// Serialized as `top3-0`, `shallow-2`, `seq-1-0` so stored plans stay readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ItemKey {
	Top3(usize),
	Shallow(usize),
	Deep(usize),
	Micro(usize),
	Sequence { phase: usize, task: usize },
}

impl ItemKey {
	pub fn category(&self) -> Category {
		match self {
			ItemKey::Top3(_) => Category::Top3,
			ItemKey::Shallow(_) => Category::Shallow,
			ItemKey::Deep(_) => Category::Deep,
			ItemKey::Micro(_) => Category::Micro,
			ItemKey::Sequence { .. } => Category::Sequence,
		}
	}

	/// Only the lightweight buckets can be dismissed.
	pub fn is_deletable(&self) -> bool {
		matches!(
			self.category(),
			Category::Shallow | Category::Deep | Category::Micro
		)
	}

	fn in_list(category: Category, index: usize) -> Option<Self> {
		match category {
			Category::Top3 => Some(ItemKey::Top3(index)),
			Category::Shallow => Some(ItemKey::Shallow(index)),
			Category::Deep => Some(ItemKey::Deep(index)),
			Category::Micro => Some(ItemKey::Micro(index)),
			Category::Sequence => None,
		}
	}
}

impl fmt::Display for ItemKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ItemKey::Top3(i) | ItemKey::Shallow(i) | ItemKey::Deep(i) | ItemKey::Micro(i) => {
				write!(f, "{}-{}", self.category().prefix(), i)
			}
			ItemKey::Sequence { phase, task } => write!(f, "seq-{}-{}", phase, task),
		}
	}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid item key '{0}' (expected e.g. top3-0, shallow-1, seq-0-2)")]
pub struct ParseItemKeyError(pub String);

impl FromStr for ItemKey {
	type Err = ParseItemKeyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let err = || ParseItemKeyError(s.to_string());
		let mut parts = s.trim().split('-');
		let prefix = parts.next().ok_or_else(err)?;
		let mut next_index = || -> Result<usize, ParseItemKeyError> {
			parts
				.next()
				.and_then(|p| p.parse::<usize>().ok())
				.ok_or_else(err)
		};
		let key = match prefix {
			"top3" => ItemKey::Top3(next_index()?),
			"shallow" => ItemKey::Shallow(next_index()?),
			"deep" => ItemKey::Deep(next_index()?),
			"micro" => ItemKey::Micro(next_index()?),
			"seq" => {
				let phase = next_index()?;
				let task = next_index()?;
				ItemKey::Sequence { phase, task }
			}
			_ => return Err(err()),
		};
		if parts.next().is_some() {
			return Err(err());
		}
		Ok(key)
	}
}

impl From<ItemKey> for String {
	fn from(key: ItemKey) -> Self {
		key.to_string()
	}
}

impl TryFrom<String> for ItemKey {
	type Error = ParseItemKeyError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeblock {
	pub label: String,
	pub minutes: u32,
}

impl Timeblock {
	/// `90` -> `1h 30m`, `60` -> `1h`, `45` -> `45m`
	pub fn duration_label(&self) -> String {
		format_minutes(self.minutes)
	}
}

pub fn format_minutes(minutes: u32) -> String {
	if minutes < 60 {
		return format!("{}m", minutes);
	}
	match minutes % 60 {
		0 => format!("{}h", minutes / 60),
		rest => format!("{}h {}m", minutes / 60, rest),
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
	pub category: String,
	pub emoji: String,
	pub tasks: Vec<String>,
	pub tip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePhase {
	pub phase: String,
	pub tasks: Vec<String>,
	pub reason: String,
}

/// The classified day. Never rewritten after it is received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
	pub top3: Vec<String>,
	#[serde(default)]
	pub shallow: Vec<String>,
	#[serde(default)]
	pub deep: Vec<String>,
	#[serde(default)]
	pub micro: Vec<String>,
	#[serde(default)]
	pub timeblocks: Vec<Timeblock>,
	#[serde(default)]
	pub groups: Vec<TaskGroup>,
	#[serde(default)]
	pub sequence: Vec<SequencePhase>,
}

impl ClassificationResult {
	pub fn list(&self, category: Category) -> &[String] {
		match category {
			Category::Top3 => &self.top3,
			Category::Shallow => &self.shallow,
			Category::Deep => &self.deep,
			Category::Micro => &self.micro,
			Category::Sequence => &[],
		}
	}

	/// Task text behind a key, if the key points inside this result.
	pub fn item(&self, key: &ItemKey) -> Option<&str> {
		match *key {
			ItemKey::Sequence { phase, task } => self
				.sequence
				.get(phase)
				.and_then(|p| p.tasks.get(task))
				.map(String::as_str),
			ItemKey::Top3(i) | ItemKey::Shallow(i) | ItemKey::Deep(i) | ItemKey::Micro(i) => {
				self.list(key.category()).get(i).map(String::as_str)
			}
		}
	}

	pub fn contains(&self, key: &ItemKey) -> bool {
		self.item(key).is_some()
	}

	/// Keys of a flat list, in index order.
	pub fn keys(&self, category: Category) -> Vec<ItemKey> {
		if category == Category::Sequence {
			return self
				.sequence
				.iter()
				.enumerate()
				.flat_map(|(p, phase)| {
					(0..phase.tasks.len()).map(move |t| ItemKey::Sequence { phase: p, task: t })
				})
				.collect();
		}
		(0..self.list(category).len())
			.filter_map(|i| ItemKey::in_list(category, i))
			.collect()
	}

	pub fn timeblock_minutes(&self) -> u32 {
		self.timeblocks.iter().map(|b| b.minutes).sum()
	}
}

/// Completion flags keyed by item. Toggling never removes a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChecklistState(BTreeMap<ItemKey, bool>);

impl ChecklistState {
	pub fn is_checked(&self, key: &ItemKey) -> bool {
		self.0.get(key).copied().unwrap_or(false)
	}

	/// Flip the flag and return the new value.
	pub fn toggle(&mut self, key: ItemKey) -> bool {
		let flag = self.0.entry(key).or_insert(false);
		*flag = !*flag;
		*flag
	}

	pub fn set(&mut self, key: ItemKey, value: bool) {
		self.0.insert(key, value);
	}

	pub fn contains_key(&self, key: &ItemKey) -> bool {
		self.0.contains_key(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&ItemKey, &bool)> {
		self.0.iter()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Tombstones for dismissed items. The backing lists are never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletionSet(BTreeSet<ItemKey>);

impl DeletionSet {
	pub fn insert(&mut self, key: ItemKey) -> bool {
		self.0.insert(key)
	}

	pub fn contains(&self, key: &ItemKey) -> bool {
		self.0.contains(key)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
	pub done: usize,
	pub total: usize,
}

impl Progress {
	/// Top-priority completion for a result and its checklist.
	pub fn of(result: &ClassificationResult, checks: &ChecklistState) -> Self {
		let keys = result.keys(Category::Top3);
		let done = keys.iter().filter(|k| checks.is_checked(k)).count();
		Self {
			done,
			total: keys.len(),
		}
	}

	pub fn percent(&self) -> u32 {
		if self.total == 0 {
			return 0;
		}
		((self.done as f64 / self.total as f64) * 100.0).round() as u32
	}

	pub fn all_done(&self) -> bool {
		self.total > 0 && self.done == self.total
	}
}

/// The active day's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
	pub date: NaiveDate,
	#[serde(default)]
	pub input: String,
	#[serde(default)]
	pub result: Option<ClassificationResult>,
	#[serde(default)]
	pub checks: ChecklistState,
	#[serde(default)]
	pub deleted: DeletionSet,
	#[serde(default)]
	pub available_minutes: Option<u32>,
	#[serde(default)]
	pub time_source: Option<TimeSource>,
	#[serde(default)]
	pub stage: Stage,
	#[serde(default)]
	pub done: bool,
}

impl DayPlan {
	pub fn empty(date: NaiveDate) -> Self {
		Self {
			date,
			input: String::new(),
			result: None,
			checks: ChecklistState::default(),
			deleted: DeletionSet::default(),
			available_minutes: None,
			time_source: None,
			stage: Stage::Input,
			done: false,
		}
	}

	pub fn progress(&self) -> Option<Progress> {
		self.result
			.as_ref()
			.map(|result| Progress::of(result, &self.checks))
	}
}

/// Archived snapshot of one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
	pub date: NaiveDate,
	pub result: ClassificationResult,
	pub checks: ChecklistState,
	pub saved_at: DateTime<Utc>,
}

impl HistoryEntry {
	pub fn progress(&self) -> Progress {
		Progress::of(&self.result, &self.checks)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeSlot {
	pub day: String,
	pub start: String,
	pub end: String,
	#[serde(default)]
	pub label: String,
}

/// Parsed timetable. Reused across days until replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetableResult {
	pub free_hours: f32,
	#[serde(default)]
	pub total_free_minutes: u32,
	#[serde(default)]
	pub slots: Vec<FreeSlot>,
	#[serde(default)]
	pub summary: String,
}

impl TimetableResult {
	pub fn available_minutes(&self) -> u32 {
		(self.free_hours.max(0.0) * 60.0).round() as u32
	}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("classification is missing the top3 list")]
	MissingTop3,
	#[error("timetable reports no usable free hours")]
	NoFreeHours,
}

/// Classification as it comes off the wire, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawClassification {
	#[serde(default)]
	pub top3: Option<Vec<String>>,
	#[serde(default)]
	pub shallow: Option<Vec<String>>,
	#[serde(default)]
	pub deep: Option<Vec<String>>,
	#[serde(default)]
	pub micro: Option<Vec<String>>,
	#[serde(default)]
	pub timeblocks: Option<Vec<Timeblock>>,
	#[serde(default)]
	pub groups: Option<Vec<TaskGroup>>,
	#[serde(default)]
	pub sequence: Option<Vec<SequencePhase>>,
}

fn clean(items: Option<Vec<String>>) -> Vec<String> {
	items
		.unwrap_or_default()
		.into_iter()
		.map(|s| s.trim().to_string())
		.filter(|s| !s.is_empty())
		.collect()
}

impl TryFrom<RawClassification> for ClassificationResult {
	type Error = ValidationError;

	fn try_from(raw: RawClassification) -> Result<Self, Self::Error> {
		let top3 = raw.top3.ok_or(ValidationError::MissingTop3)?;
		Ok(Self {
			top3: clean(Some(top3)),
			shallow: clean(raw.shallow),
			deep: clean(raw.deep),
			micro: clean(raw.micro),
			timeblocks: raw
				.timeblocks
				.unwrap_or_default()
				.into_iter()
				.filter(|b| b.minutes > 0 && !b.label.trim().is_empty())
				.collect(),
			groups: raw
				.groups
				.unwrap_or_default()
				.into_iter()
				.map(|g| TaskGroup {
					tasks: clean(Some(g.tasks)),
					..g
				})
				.filter(|g| !g.tasks.is_empty())
				.collect(),
			sequence: raw
				.sequence
				.unwrap_or_default()
				.into_iter()
				.map(|p| SequencePhase {
					tasks: clean(Some(p.tasks)),
					..p
				})
				.filter(|p| !p.tasks.is_empty())
				.collect(),
		})
	}
}

impl TimetableResult {
	pub fn validate(self) -> Result<Self, ValidationError> {
		// Anything under half a minute rounds to no time at all.
		if !self.free_hours.is_finite() || self.available_minutes() == 0 {
			return Err(ValidationError::NoFreeHours);
		}
		Ok(self)
	}
}

#[cfg(test)]
pub(crate) fn sample_result() -> ClassificationResult {
	ClassificationResult {
		top3: vec!["write report".into(), "call bank".into()],
		shallow: vec!["buy milk".into(), "reply to email".into()],
		deep: vec!["draft proposal".into()],
		micro: vec!["install duolingo".into()],
		timeblocks: vec![
			Timeblock {
				label: "deep work".into(),
				minutes: 90,
			},
			Timeblock {
				label: "errands".into(),
				minutes: 30,
			},
		],
		groups: vec![],
		sequence: vec![SequencePhase {
			phase: "warm-up".into(),
			tasks: vec!["buy milk".into(), "reply to email".into()],
			reason: "easy wins first".into(),
		}],
	}
}
