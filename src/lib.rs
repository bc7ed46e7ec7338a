//! Daily-plan lifecycle engine.
//!
//! A brain dump goes in, gets classified by an external service into a plan for
//! the day, is checked off through the day, and ends up in a per-day history.

pub mod clock;
pub mod config;
pub mod history;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod plan;
pub mod service;
pub mod store;
pub mod timer;

pub use clock::{Clock, SystemClock};
pub use history::HistoryArchive;
pub use lifecycle::{Applied, LifecycleController, LifecycleError, Notice, Ticket};
pub use model::{ClassificationResult, DayPlan, HistoryEntry, ItemKey, Stage};
pub use plan::PlanStore;
pub use store::Gateway;
pub use timer::{FocusSession, TimerEngine};
