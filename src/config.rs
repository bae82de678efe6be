use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "THREADSCOUT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub images: ImagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Root of the forum search service. Left empty, the app runs on
    /// built-in sample data.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("threadscout/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    #[serde(default = "default_per_page")]
    pub per_page: usize,
    #[serde(default = "default_page_window")]
    pub page_window: usize,
    /// Channels offered by the channel filter cycle. An empty list means
    /// no channel filtering.
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Guild that hosts the forum threads; used to build open-in-Discord
    /// links. Empty disables opening.
    #[serde(default)]
    pub guild_id: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            per_page: default_per_page(),
            page_window: default_page_window(),
            channels: Vec::new(),
            guild_id: String::new(),
        }
    }
}

fn default_per_page() -> usize {
    crate::pagination::DEFAULT_PER_PAGE
}

fn default_page_window() -> usize {
    crate::pagination::DEFAULT_WINDOW
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImagesConfig {
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            debounce: default_debounce(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_debounce() -> Duration {
    crate::images::DEFAULT_DEBOUNCE
}

fn default_max_attempts() -> u32 {
    crate::images::DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.api.base_url.is_empty() {
        base.api.base_url = other.api.base_url;
    }
    if !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if other.api.timeout != default_timeout() {
        base.api.timeout = other.api.timeout;
    }

    if other.ui.per_page != 0 {
        base.ui.per_page = other.ui.per_page;
    }
    if other.ui.page_window != 0 {
        base.ui.page_window = other.ui.page_window;
    }
    if !other.ui.channels.is_empty() {
        base.ui.channels = other.ui.channels;
    }
    if !other.ui.guild_id.is_empty() {
        base.ui.guild_id = other.ui.guild_id;
    }

    if other.images.debounce != default_debounce() {
        base.images.debounce = other.images.debounce;
    }
    if other.images.max_attempts != 0 {
        base.images.max_attempts = other.images.max_attempts;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "ui.per_page" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.ui.per_page = parsed;
            }
        }
        "ui.page_window" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.ui.page_window = parsed;
            }
        }
        // id:name pairs, comma separated
        "ui.channels" => {
            cfg.ui.channels = value
                .split(',')
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, ':');
                    let id = parts.next()?.trim();
                    let name = parts.next().unwrap_or(id).trim();
                    if id.is_empty() {
                        None
                    } else {
                        Some(Channel {
                            id: id.to_string(),
                            name: name.to_string(),
                        })
                    }
                })
                .collect();
        }
        "ui.guild_id" => cfg.ui.guild_id = value,
        "images.debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.images.debounce = duration;
            }
        }
        "images.max_attempts" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.images.max_attempts = parsed;
            }
        }
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("threadscout").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("THREADSCOUT_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.per_page, crate::pagination::DEFAULT_PER_PAGE);
        assert_eq!(cfg.images.debounce, Duration::from_secs(5));
        assert!(cfg.api.base_url.is_empty());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
api:
  base_url: https://forum.example/api
ui:
  per_page: 12
  channels:
    - id: "123"
      name: general
"#,
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("THREADSCOUT_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.base_url, "https://forum.example/api");
        assert_eq!(cfg.ui.per_page, 12);
        assert_eq!(cfg.ui.channels.len(), 1);
        assert_eq!(cfg.ui.channels[0].name, "general");
    }

    #[test]
    fn file_timeout_survives_env_merge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "api:\n  timeout: 45s\nimages:\n  debounce: 2s\n").unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("THREADSCOUT_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.api.timeout, Duration::from_secs(45));
        assert_eq!(cfg.images.debounce, Duration::from_secs(2));
    }

    #[test]
    fn env_overrides() {
        env::set_var("THREADSCOUT_ENVTEST_UI__PER_PAGE", "48");
        env::set_var("THREADSCOUT_ENVTEST_UI__CHANNELS", "1:general,2:help");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/config.yaml")),
            env_prefix: Some("THREADSCOUT_ENVTEST".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.per_page, 48);
        assert_eq!(cfg.ui.channels[1].id, "2");
        env::remove_var("THREADSCOUT_ENVTEST_UI__PER_PAGE");
        env::remove_var("THREADSCOUT_ENVTEST_UI__CHANNELS");
    }
}
