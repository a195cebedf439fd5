use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::persistence::KeyValueStore;

// ============================================================================
// DEFAULT SETTINGS - Single source of truth for every persisted default
// ============================================================================

/// Default model selection (empty means "unconfigured")
pub const DEFAULT_SELECTED_MODEL: &str = "";

/// Default thinking mode
pub const DEFAULT_ENABLE_THINKING: bool = false;

/// Default web search endpoint (empty means "not configured")
pub const DEFAULT_WEB_SEARCH_API_URL: &str = "";

/// Default secondary translation language (empty means English only)
pub const DEFAULT_SECOND_LANGUAGE: &str = "";

/// Placeholder written in place of sensitive values in logs
pub const REDACTED: &str = "[redacted]";

// ============================================================================

/// Keys of the persisted settings document.
///
/// The serialized form is the key used in the persistence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SettingsKey {
    SelectedModel,
    EnableThinking,
    WebSearchApiUrl,
    WebSearchApiKey,
    SecondLanguage,
}

impl SettingsKey {
    pub const ALL: [SettingsKey; 5] = [
        SettingsKey::SelectedModel,
        SettingsKey::EnableThinking,
        SettingsKey::WebSearchApiUrl,
        SettingsKey::WebSearchApiKey,
        SettingsKey::SecondLanguage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsKey::SelectedModel => "selectedModel",
            SettingsKey::EnableThinking => "enableThinking",
            SettingsKey::WebSearchApiUrl => "webSearchApiUrl",
            SettingsKey::WebSearchApiKey => "webSearchApiKey",
            SettingsKey::SecondLanguage => "secondLanguage",
        }
    }

    /// Values under sensitive keys never reach logs or notifications.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, SettingsKey::WebSearchApiKey)
    }
}

impl fmt::Display for SettingsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user-facing settings document shared by every surface.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsDocument {
    /// Inference model id (empty = unconfigured)
    pub selected_model: String,
    /// Ask the model to think before answering
    pub enable_thinking: bool,
    /// Web search endpoint used by the quick-answer tool call
    pub web_search_api_url: String,
    /// Web search credential (sensitive)
    pub web_search_api_key: String,
    /// Secondary translation language code (empty = English only)
    pub second_language: String,
}

impl Default for SettingsDocument {
    fn default() -> Self {
        Self {
            selected_model: DEFAULT_SELECTED_MODEL.to_string(),
            enable_thinking: DEFAULT_ENABLE_THINKING,
            web_search_api_url: DEFAULT_WEB_SEARCH_API_URL.to_string(),
            web_search_api_key: String::new(),
            second_language: DEFAULT_SECOND_LANGUAGE.to_string(),
        }
    }
}

impl fmt::Debug for SettingsDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsDocument")
            .field("selected_model", &self.selected_model)
            .field("enable_thinking", &self.enable_thinking)
            .field("web_search_api_url", &self.web_search_api_url)
            .field("has_web_search_api_key", &!self.web_search_api_key.is_empty())
            .field("second_language", &self.second_language)
            .finish()
    }
}

/// Helper to read a setting from the store with a default fallback
fn get_setting_from_store<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: SettingsKey,
    default: T,
) -> T {
    store
        .get(key.as_str())
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(default)
}

impl SettingsDocument {
    /// Read the document field by field, falling back to defaults for any
    /// missing, null or malformed value.
    pub fn from_store(store: &dyn KeyValueStore) -> Self {
        let defaults = Self::default();
        Self {
            selected_model: get_setting_from_store(
                store,
                SettingsKey::SelectedModel,
                defaults.selected_model,
            ),
            enable_thinking: get_setting_from_store(
                store,
                SettingsKey::EnableThinking,
                defaults.enable_thinking,
            ),
            web_search_api_url: get_setting_from_store(
                store,
                SettingsKey::WebSearchApiUrl,
                defaults.web_search_api_url,
            ),
            web_search_api_key: get_setting_from_store(
                store,
                SettingsKey::WebSearchApiKey,
                defaults.web_search_api_key,
            ),
            second_language: get_setting_from_store(
                store,
                SettingsKey::SecondLanguage,
                defaults.second_language,
            ),
        }
    }

    /// Re-read a single key from the store into this document.
    pub fn reload_key(&mut self, store: &dyn KeyValueStore, key: SettingsKey) {
        let fresh = Self::from_store(store);
        match key {
            SettingsKey::SelectedModel => self.selected_model = fresh.selected_model,
            SettingsKey::EnableThinking => self.enable_thinking = fresh.enable_thinking,
            SettingsKey::WebSearchApiUrl => self.web_search_api_url = fresh.web_search_api_url,
            SettingsKey::WebSearchApiKey => self.web_search_api_key = fresh.web_search_api_key,
            SettingsKey::SecondLanguage => self.second_language = fresh.second_language,
        }
    }

    pub fn value_of(&self, key: SettingsKey) -> Value {
        match key {
            SettingsKey::SelectedModel => json!(self.selected_model),
            SettingsKey::EnableThinking => json!(self.enable_thinking),
            SettingsKey::WebSearchApiUrl => json!(self.web_search_api_url),
            SettingsKey::WebSearchApiKey => json!(self.web_search_api_key),
            SettingsKey::SecondLanguage => json!(self.second_language),
        }
    }

    /// Merge a partial edit into the document.
    pub fn apply(&mut self, partial: &PartialSettings) {
        if let Some(model) = &partial.selected_model {
            self.selected_model = model.clone();
        }
        if let Some(enabled) = partial.enable_thinking {
            self.enable_thinking = enabled;
        }
        if let Some(url) = &partial.web_search_api_url {
            self.web_search_api_url = url.clone();
        }
        if let Some(key) = &partial.web_search_api_key {
            self.web_search_api_key = key.clone();
        }
        if let Some(language) = &partial.second_language {
            self.second_language = language.clone();
        }
    }

    pub fn is_model_configured(&self) -> bool {
        !self.selected_model.trim().is_empty()
    }
}

/// A field-by-field edit of the settings document.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_search_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_language: Option<String>,
}

impl fmt::Debug for PartialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartialSettings({})", self.redacted())
    }
}

impl PartialSettings {
    pub fn selected_model(model: impl Into<String>) -> Self {
        Self {
            selected_model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn enable_thinking(enabled: bool) -> Self {
        Self {
            enable_thinking: Some(enabled),
            ..Self::default()
        }
    }

    pub fn web_search(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            web_search_api_url: Some(url.into()),
            web_search_api_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn second_language(language: impl Into<String>) -> Self {
        Self {
            second_language: Some(language.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_keys().is_empty()
    }

    pub fn contains(&self, key: SettingsKey) -> bool {
        match key {
            SettingsKey::SelectedModel => self.selected_model.is_some(),
            SettingsKey::EnableThinking => self.enable_thinking.is_some(),
            SettingsKey::WebSearchApiUrl => self.web_search_api_url.is_some(),
            SettingsKey::WebSearchApiKey => self.web_search_api_key.is_some(),
            SettingsKey::SecondLanguage => self.second_language.is_some(),
        }
    }

    pub fn changed_keys(&self) -> BTreeSet<SettingsKey> {
        SettingsKey::ALL
            .into_iter()
            .filter(|key| self.contains(*key))
            .collect()
    }

    /// Fold a newer partial into this one; fields set in `newer` win.
    pub fn merge(&mut self, newer: &PartialSettings) {
        if newer.selected_model.is_some() {
            self.selected_model = newer.selected_model.clone();
        }
        if newer.enable_thinking.is_some() {
            self.enable_thinking = newer.enable_thinking;
        }
        if newer.web_search_api_url.is_some() {
            self.web_search_api_url = newer.web_search_api_url.clone();
        }
        if newer.web_search_api_key.is_some() {
            self.web_search_api_key = newer.web_search_api_key.clone();
        }
        if newer.second_language.is_some() {
            self.second_language = newer.second_language.clone();
        }
    }

    /// Store entries for every field present in this partial.
    pub fn entries(&self) -> Vec<(SettingsKey, Value)> {
        let mut doc = SettingsDocument::default();
        doc.apply(self);
        self.changed_keys()
            .into_iter()
            .map(|key| (key, doc.value_of(key)))
            .collect()
    }

    /// JSON view with sensitive values replaced, safe to log.
    pub fn redacted(&self) -> Value {
        let mut safe_values = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(obj) = safe_values.as_object_mut() {
            for key in SettingsKey::ALL.iter().filter(|k| k.is_sensitive()) {
                if obj.contains_key(key.as_str()) {
                    obj.insert(key.as_str().to_string(), json!(REDACTED));
                }
            }
        }
        safe_values
    }
}
