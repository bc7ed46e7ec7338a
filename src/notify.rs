use crate::config::Notifications;
use std::process::Command;
use tracing::debug;

/// User-facing notification sink. Delivery is best effort: failures are
/// swallowed, never retried.
pub trait Notifier: Send + Sync {
	fn notify(&self, title: &str, body: &str);
}

/// Native notifications via `osascript` (macOS) or `notify-send` (Linux).
pub struct DesktopNotifier {
	enabled: bool,
	sound: String,
}

impl DesktopNotifier {
	pub fn new(cfg: &Notifications) -> Self {
		Self {
			enabled: cfg.enabled,
			sound: cfg.sound.clone(),
		}
	}
}

fn applescript_escape(s: &str) -> String {
	s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Notifier for DesktopNotifier {
	fn notify(&self, title: &str, body: &str) {
		if !self.enabled {
			return;
		}
		let status = if cfg!(target_os = "macos") {
			let script = format!(
				"display notification \"{}\" with title \"{}\" sound name \"{}\"",
				applescript_escape(body),
				applescript_escape(title),
				applescript_escape(&self.sound)
			);
			Command::new("osascript").arg("-e").arg(script).status()
		} else if cfg!(target_os = "linux") {
			Command::new("notify-send").arg(title).arg(body).status()
		} else {
			return;
		};
		match status {
			Ok(s) if s.success() => {}
			Ok(s) => debug!(code = ?s.code(), "notification command failed"),
			Err(e) => debug!(error = %e, "notifications unavailable"),
		}
	}
}

/// Discards everything.
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
	fn notify(&self, _title: &str, _body: &str) {}
}

pub fn notify_focus_done(notifier: &dyn Notifier, task: &str) {
	notifier.notify("Focus session done", &format!("Time's up: {}", task));
}
