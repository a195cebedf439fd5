//! Runtime configuration.
//!
//! User-editable settings live in the persisted settings document; this is
//! the fixed wiring (endpoints, file location, timings) chosen at startup.

use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{DEFAULT_OLLAMA_URL, DEFAULT_TRANSLATE_URL};
use crate::geometry::GeometryConstants;
use crate::settings_store::DEFAULT_SETTINGS_DEBOUNCE;

pub const ENV_OLLAMA_URL: &str = "SPOTLIGHT_OLLAMA_URL";
pub const ENV_TRANSLATE_URL: &str = "SPOTLIGHT_TRANSLATE_URL";
pub const ENV_SETTINGS_PATH: &str = "SPOTLIGHT_SETTINGS_PATH";

const APP_DIR_NAME: &str = "spotlight-assistant";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Upper bound on a single backend call
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a toast stays visible
pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(2);

/// Timing for one query orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTiming {
    /// Quiet period after the last keystroke before a call is issued
    pub debounce: Duration,
    /// Inputs shorter than this (in chars, after trimming) are not queried
    pub min_chars: usize,
    /// Upper bound on a single backend call
    pub timeout: Duration,
}

impl QueryTiming {
    /// Quick answers run a model with a tool round, so wait longer.
    pub fn quick_answer() -> Self {
        Self {
            debounce: Duration::from_millis(600),
            min_chars: 2,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn translation() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            min_chars: 1,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ollama_url: String,
    pub translate_url: String,
    pub settings_path: PathBuf,
    pub settings_debounce: Duration,
    pub quick_answer: QueryTiming,
    pub translation: QueryTiming,
    pub toast_duration: Duration,
    pub geometry: GeometryConstants,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            translate_url: DEFAULT_TRANSLATE_URL.to_string(),
            settings_path: default_settings_path(),
            settings_debounce: DEFAULT_SETTINGS_DEBOUNCE,
            quick_answer: QueryTiming::quick_answer(),
            translation: QueryTiming::translation(),
            toast_duration: DEFAULT_TOAST_DURATION,
            geometry: GeometryConstants::default(),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with any `SPOTLIGHT_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_OLLAMA_URL) {
            self.ollama_url = url;
        }
        if let Some(url) = lookup(ENV_TRANSLATE_URL) {
            self.translate_url = url;
        }
        if let Some(path) = lookup(ENV_SETTINGS_PATH) {
            self.settings_path = PathBuf::from(path);
        }
        self
    }
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join(SETTINGS_FILE_NAME)
}
