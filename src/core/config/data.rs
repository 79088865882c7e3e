use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::backend::HistoryPolicy;
use crate::core::engine_state::Mode;
use crate::core::remote::{RemoteRoute, RemoteSettings};

pub const DEFAULT_REMOTE_URL: &str = "http://localhost:8000";
pub const DEFAULT_STUDIO_URL: &str = "http://localhost:8080";
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:8081/v1";
pub const DEFAULT_LOCAL_MODEL: &str = "Llama-3-8B-Instruct";
pub const DEFAULT_HEALTH_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// `[remote]`: the RAG service and its chat routes.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub route: Option<RemoteRoute>,
    /// Ask the service for its faster, shallower retrieval path
    pub turbo: Option<bool>,
    /// Let the service generate with its MLX backend
    pub use_mlx: Option<bool>,
    pub health_timeout_ms: Option<u64>,
}

/// `[studio]`: the live-preview watcher that receives mirrored buffers.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct StudioConfig {
    pub base_url: Option<String>,
    pub mirror: Option<bool>,
}

/// `[local]`: an OpenAI-compatible inference server on this machine.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct LocalConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Backend used at startup ("local" or "remote")
    pub mode: Option<Mode>,
    /// How much of the conversation each request carries
    pub history: Option<HistoryPolicy>,
    /// Filter directive for logs when RUST_LOG is unset (e.g. "debug")
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "is_default")]
    pub remote: RemoteConfig,
    #[serde(default, skip_serializing_if = "is_default")]
    pub studio: StudioConfig,
    #[serde(default, skip_serializing_if = "is_default")]
    pub local: LocalConfig,
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or_default()
    }

    pub fn history(&self) -> HistoryPolicy {
        self.history.unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn remote_url(&self) -> &str {
        self.remote.base_url.as_deref().unwrap_or(DEFAULT_REMOTE_URL)
    }

    pub fn studio_url(&self) -> &str {
        self.studio.base_url.as_deref().unwrap_or(DEFAULT_STUDIO_URL)
    }

    pub fn mirror_studio(&self) -> bool {
        self.studio.mirror.unwrap_or(true)
    }

    pub fn local_url(&self) -> &str {
        self.local.base_url.as_deref().unwrap_or(DEFAULT_LOCAL_URL)
    }

    pub fn local_model(&self) -> &str {
        self.local.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL)
    }

    pub fn remote_settings(&self) -> RemoteSettings {
        RemoteSettings {
            base_url: self.remote_url().to_string(),
            route: self.remote.route.unwrap_or_default(),
            turbo: self.remote.turbo.unwrap_or(false),
            use_mlx: self.remote.use_mlx.unwrap_or(true),
            health_timeout: Duration::from_millis(
                self.remote
                    .health_timeout_ms
                    .unwrap_or(DEFAULT_HEALTH_TIMEOUT_MS),
            ),
        }
    }
}
