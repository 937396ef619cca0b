use std::{collections::HashMap, fs, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::data_source::ResponseOrdering;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub default_page_size: u32,
    pub response_ordering: ResponseOrdering,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".into(),
            request_timeout_secs: 30,
            default_page_size: 10,
            response_ordering: ResponseOrdering::LatestIssuedWins,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Defaults, then `client.toml` in the working directory, then the process environment.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if let Ok(raw) = fs::read_to_string(DEFAULT_SETTINGS_FILE) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Like [`load_settings`] but with an explicit file, which must exist.
pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read client settings '{}'", path.display()))?;
    let mut settings = ClientSettings::default();
    apply_file(&mut settings, &raw);
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    let get = |key: &str| {
        file_cfg.get(key).map(|value| match value {
            toml::Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    };

    if let Some(v) = get("api_base_url") {
        settings.api_base_url = v;
    }
    if let Some(v) = get("request_timeout_secs").and_then(|v| v.parse().ok()) {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = get("default_page_size").and_then(|v| parse_page_size(&v)) {
        settings.default_page_size = v;
    }
    if let Some(v) = get("response_ordering").and_then(|v| v.parse().ok()) {
        settings.response_ordering = v;
    }
}

fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = lookup("APP__DEFAULT_PAGE_SIZE") {
        if let Some(parsed) = parse_page_size(&v) {
            settings.default_page_size = parsed;
        }
    }

    if let Some(v) = lookup("APP__RESPONSE_ORDERING") {
        if let Ok(parsed) = ResponseOrdering::from_str(&v) {
            settings.response_ordering = parsed;
        }
    }
}

fn parse_page_size(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|size| *size > 0)
}
