//! `set` / `unset` support for individual configuration keys.

use std::fmt;

use crate::core::backend::HistoryPolicy;
use crate::core::config::data::Config;
use crate::core::engine_state::Mode;
use crate::core::remote::RemoteRoute;

/// Every key accepted by [`Config::set_value`], in display order.
pub const SETTING_KEYS: &[&str] = &[
    "mode",
    "history",
    "log-level",
    "remote.base-url",
    "remote.route",
    "remote.turbo",
    "remote.use-mlx",
    "remote.health-timeout-ms",
    "studio.base-url",
    "studio.mirror",
    "local.base-url",
    "local.model",
    "local.api-key",
];

/// Errors that can occur when modifying configuration settings.
#[derive(Debug, PartialEq, Eq)]
pub enum SettingError {
    /// The provided setting key is not recognized.
    UnknownKey(String),
    /// The provided value could not be parsed as a boolean.
    InvalidBoolean(String),
    InvalidValue { key: &'static str, message: String },
}

impl SettingError {
    /// Print the error message to stderr with appropriate formatting.
    pub fn print(&self) {
        match self {
            SettingError::UnknownKey(key) => {
                eprintln!("❌ Unknown config key: {key}");
                eprintln!("   Known keys: {}", SETTING_KEYS.join(", "));
            }
            SettingError::InvalidBoolean(input) => {
                eprintln!("❌ Invalid boolean value: {input}");
                eprintln!("   Use 'on' or 'off' (also accepts true/false, yes/no)");
            }
            SettingError::InvalidValue { key, message } => {
                eprintln!("❌ Invalid value for {key}: {message}");
            }
        }
    }
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(f, "Unknown config key: {key}"),
            SettingError::InvalidBoolean(input) => write!(f, "Invalid boolean value: {input}"),
            SettingError::InvalidValue { key, message } => {
                write!(f, "Invalid value for {key}: {message}")
            }
        }
    }
}

impl std::error::Error for SettingError {}

fn canonical_key(key: &str) -> Result<&'static str, SettingError> {
    let normalized = key.trim().to_ascii_lowercase().replace('_', "-");
    SETTING_KEYS
        .iter()
        .copied()
        .find(|known| *known == normalized)
        .ok_or_else(|| SettingError::UnknownKey(key.to_string()))
}

fn parse_bool(value: &str) -> Result<bool, SettingError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(SettingError::InvalidBoolean(value.to_string())),
    }
}

fn parse_with<T>(
    key: &'static str,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, SettingError> {
    parse(value).map_err(|message| SettingError::InvalidValue { key, message })
}

fn non_empty(key: &'static str, value: &str) -> Result<String, SettingError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SettingError::InvalidValue {
            key,
            message: "value must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

impl Config {
    /// Sets `key` to `value`, returning a confirmation line.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<String, SettingError> {
        let key = canonical_key(key)?;
        match key {
            "mode" => self.mode = Some(parse_with(key, value, |raw| Mode::try_from(raw))?),
            "history" => {
                self.history = Some(parse_with(key, value, |raw| HistoryPolicy::try_from(raw))?)
            }
            "log-level" => self.log_level = Some(non_empty(key, value)?),
            "remote.base-url" => self.remote.base_url = Some(non_empty(key, value)?),
            "remote.route" => {
                let route = parse_with(key, value, |raw| RemoteRoute::try_from(raw))?;
                self.remote.route = Some(route);
            }
            "remote.turbo" => self.remote.turbo = Some(parse_bool(value)?),
            "remote.use-mlx" => self.remote.use_mlx = Some(parse_bool(value)?),
            "remote.health-timeout-ms" => {
                let timeout = parse_with(key, value, |raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|err| format!("{raw} is not a number of milliseconds ({err})"))
                })?;
                self.remote.health_timeout_ms = Some(timeout);
            }
            "studio.base-url" => self.studio.base_url = Some(non_empty(key, value)?),
            "studio.mirror" => self.studio.mirror = Some(parse_bool(value)?),
            "local.base-url" => self.local.base_url = Some(non_empty(key, value)?),
            "local.model" => self.local.model = Some(non_empty(key, value)?),
            "local.api-key" => self.local.api_key = Some(non_empty(key, value)?),
            _ => return Err(SettingError::UnknownKey(key.to_string())),
        }
        Ok(format!("✅ Set {key} to: {}", self.format_value(key)))
    }

    pub fn unset_value(&mut self, key: &str) -> Result<String, SettingError> {
        let key = canonical_key(key)?;
        match key {
            "mode" => self.mode = None,
            "history" => self.history = None,
            "log-level" => self.log_level = None,
            "remote.base-url" => self.remote.base_url = None,
            "remote.route" => self.remote.route = None,
            "remote.turbo" => self.remote.turbo = None,
            "remote.use-mlx" => self.remote.use_mlx = None,
            "remote.health-timeout-ms" => self.remote.health_timeout_ms = None,
            "studio.base-url" => self.studio.base_url = None,
            "studio.mirror" => self.studio.mirror = None,
            "local.base-url" => self.local.base_url = None,
            "local.model" => self.local.model = None,
            "local.api-key" => self.local.api_key = None,
            _ => return Err(SettingError::UnknownKey(key.to_string())),
        }
        Ok(format!("✅ Unset {key} (now {})", self.format_value(key)))
    }

    /// Effective value of `key`, with defaults resolved and secrets masked.
    pub fn format_value(&self, key: &str) -> String {
        let on_off = |value: bool| (if value { "on" } else { "off" }).to_string();
        let remote = self.remote_settings();
        match key {
            "mode" => self.mode().to_string(),
            "history" => self.history().as_str().to_string(),
            "log-level" => self.log_level().to_string(),
            "remote.base-url" => remote.base_url,
            "remote.route" => remote.route.as_str().to_string(),
            "remote.turbo" => on_off(remote.turbo),
            "remote.use-mlx" => on_off(remote.use_mlx),
            "remote.health-timeout-ms" => remote.health_timeout.as_millis().to_string(),
            "studio.base-url" => self.studio_url().to_string(),
            "studio.mirror" => on_off(self.mirror_studio()),
            "local.base-url" => self.local_url().to_string(),
            "local.model" => self.local_model().to_string(),
            "local.api-key" => match &self.local.api_key {
                Some(_) => "(set)".to_string(),
                None => "(unset)".to_string(),
            },
            _ => String::new(),
        }
    }
}
