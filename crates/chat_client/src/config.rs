use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use url::Url;

const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub ws_base_url: Option<String>,
    pub history_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080".into(),
            ws_base_url: None,
            history_timeout_secs: 10,
        }
    }
}

/// Parsed endpoints handed to the history loader and the live connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub api_base: Url,
    pub ws_base: Url,
    pub history_timeout: Duration,
}

impl ClientSettings {
    pub fn endpoints(&self) -> Result<Endpoints> {
        let api_base = Url::parse(self.api_base_url.trim())
            .with_context(|| format!("invalid api base url '{}'", self.api_base_url))?;
        let ws_raw = match &self.ws_base_url {
            Some(raw) => raw.trim().to_string(),
            None => derive_ws_base_url(api_base.as_str())?,
        };
        let ws_base =
            Url::parse(&ws_raw).with_context(|| format!("invalid websocket base url '{ws_raw}'"))?;
        Ok(Endpoints {
            api_base,
            ws_base,
            history_timeout: Duration::from_secs(self.history_timeout_secs.max(1)),
        })
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

/// Defaults, then the settings file, then environment overrides.
pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("api_base_url") {
                settings.api_base_url = v.clone();
            }
            if let Some(v) = file_cfg.get("ws_base_url") {
                settings.ws_base_url = Some(v.clone());
            }
            if let Some(v) = file_cfg
                .get("history_timeout_secs")
                .and_then(|v| v.parse().ok())
            {
                settings.history_timeout_secs = v;
            }
        }
    }

    if let Some(v) = env("CHAT_API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("CHAT_WS_BASE_URL") {
        settings.ws_base_url = Some(v);
    }
    if let Some(v) = env("APP__WS_BASE_URL") {
        settings.ws_base_url = Some(v);
    }

    if let Some(v) = env("APP__HISTORY_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.history_timeout_secs = parsed;
        }
    }

    settings
}

pub fn derive_ws_base_url(api_base_url: &str) -> Result<String> {
    if let Some(rest) = api_base_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(anyhow!("api base url must start with http:// or https://"))
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
