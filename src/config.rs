use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = r#"
[general]
data_dir = "~/.zzwarak/data"
completion_delay_ms = 1200
log_level = "info"

[focus]
session_minutes = 25

[classifier]
endpoint = "https://generativelanguage.googleapis.com/v1beta"
model = "gemini-2.5-flash"
api_key_env = "GEMINI_API_KEY"
timeout_secs = 60

[notifications]
enabled = true
sound = "Glass"
"#;

/// Process-wide settings. Built once in `main` and handed to whatever needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub general: General,
	#[serde(default)]
	pub focus: Focus,
	pub classifier: ClassifierConfig,
	#[serde(default)]
	pub notifications: Notifications,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct General {
	pub data_dir: String,
	#[serde(default = "default_completion_delay_ms")]
	pub completion_delay_ms: u64,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

fn default_completion_delay_ms() -> u64 {
	1200
}

fn default_log_level() -> String {
	"info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Focus {
	pub session_minutes: u32,
}

impl Default for Focus {
	fn default() -> Self {
		Self {
			session_minutes: 25,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
	pub endpoint: String,
	pub model: String,
	pub api_key_env: String,
	#[serde(default = "default_timeout_secs")]
	pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
	60
}

impl ClassifierConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}

	pub fn api_key(&self) -> Option<String> {
		std::env::var(&self.api_key_env)
			.ok()
			.filter(|k| !k.trim().is_empty())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notifications {
	pub enabled: bool,
	pub sound: String,
}

impl Default for Notifications {
	fn default() -> Self {
		Self {
			enabled: true,
			sound: "Glass".to_string(),
		}
	}
}

impl Config {
	pub fn completion_delay(&self) -> Duration {
		Duration::from_millis(self.general.completion_delay_ms)
	}

	pub fn session_length(&self) -> Duration {
		Duration::from_secs(u64::from(self.focus.session_minutes.max(1)) * 60)
	}

	pub fn data_dir(&self) -> PathBuf {
		PathBuf::from(&self.general.data_dir)
	}

	pub fn from_toml(content: &str) -> Result<Self> {
		let mut cfg: Config = toml::from_str(content)?;
		cfg.general.data_dir = expand_path(&cfg.general.data_dir);
		Ok(cfg)
	}
}

pub fn load_or_init() -> Result<Config> {
	let base_dir = base_dir()?;
	fs::create_dir_all(&base_dir)?;
	fs::create_dir_all(logs_dir()?)?;

	let config_path = base_dir.join("config.toml");
	if !config_path.exists() {
		fs::write(&config_path, DEFAULT_CONFIG.trim_start())?;
	}
	let content = fs::read_to_string(&config_path)?;
	let cfg = Config::from_toml(&content)?;
	fs::create_dir_all(cfg.data_dir())?;
	Ok(cfg)
}

pub fn expand_path(input: &str) -> String {
	if input.starts_with("~/") {
		if let Some(home) = dirs::home_dir() {
			return home
				.join(input.trim_start_matches("~/"))
				.to_string_lossy()
				.into_owned();
		}
	}
	input.to_string()
}

pub fn base_dir() -> Result<PathBuf> {
	dirs::home_dir()
		.map(|p| p.join(".zzwarak"))
		.ok_or_else(|| anyhow::anyhow!("Failed to resolve home directory"))
}

pub fn logs_dir() -> Result<PathBuf> {
	Ok(base_dir()?.join("logs"))
}
