use crate::core::config::data::Config;
use crate::core::config::settings::SETTING_KEYS;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        for line in self.describe() {
            println!("  {line}");
        }
    }

    /// One `key: value` line per setting; defaults are marked.
    pub fn describe(&self) -> Vec<String> {
        let defaults = Config::default();
        SETTING_KEYS
            .iter()
            .map(|key| {
                let value = self.format_value(key);
                if value == defaults.format_value(key) && !self.is_explicit(key) {
                    format!("{key}: {value} (default)")
                } else {
                    format!("{key}: {value}")
                }
            })
            .collect()
    }

    fn is_explicit(&self, key: &str) -> bool {
        match key {
            "mode" => self.mode.is_some(),
            "history" => self.history.is_some(),
            "log-level" => self.log_level.is_some(),
            "remote.base-url" => self.remote.base_url.is_some(),
            "remote.route" => self.remote.route.is_some(),
            "remote.turbo" => self.remote.turbo.is_some(),
            "remote.use-mlx" => self.remote.use_mlx.is_some(),
            "remote.health-timeout-ms" => self.remote.health_timeout_ms.is_some(),
            "studio.base-url" => self.studio.base_url.is_some(),
            "studio.mirror" => self.studio.mirror.is_some(),
            "local.base-url" => self.local.base_url.is_some(),
            "local.model" => self.local.model.is_some(),
            "local.api-key" => self.local.api_key.is_some(),
            _ => false,
        }
    }
}
