use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::backend::{BackendError, ModelCatalog};
use crate::notifier::{CrossSurfaceNotifier, ListenerHandle, SurfaceLabel};
use crate::persistence::KeyValueStore;
use crate::settings::{PartialSettings, SettingsDocument};
use crate::settings_store::{SaveStatus, SettingsStore};

/// Settings window: edits go through its own cache and reach the spotlight
/// through the notifier once committed.
pub struct OptionsSurface {
    settings: SettingsStore,
    catalog: Arc<dyn ModelCatalog>,
    models: Mutex<Vec<String>>,
    _settings_listener: ListenerHandle,
}

impl OptionsSurface {
    /// Must be called from within a tokio runtime.
    pub fn open(
        engine: Arc<dyn KeyValueStore>,
        notifier: CrossSurfaceNotifier,
        catalog: Arc<dyn ModelCatalog>,
        debounce: Duration,
    ) -> Self {
        let settings = SettingsStore::open(engine, notifier, SurfaceLabel::options(), debounce);
        let settings_listener = settings.follow();
        Self {
            settings,
            catalog,
            models: Mutex::new(Vec::new()),
            _settings_listener: settings_listener,
        }
    }

    pub fn settings(&self) -> SettingsDocument {
        self.settings.snapshot()
    }

    pub fn store(&self) -> &SettingsStore {
        &self.settings
    }

    /// Re-populate the model dropdown from the inference server.
    pub async fn refresh_models(&self) -> Result<Vec<String>, BackendError> {
        let models = self.catalog.list_models().await?;
        log::info!("[options] {} model(s) available", models.len());

        let selected = self.settings.snapshot().selected_model;
        if !selected.is_empty() && !models.contains(&selected) {
            log::warn!("[options] selected model '{}' is not installed", selected);
        }

        *self
            .models
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = models.clone();
        Ok(models)
    }

    /// Last fetched model list.
    pub fn models(&self) -> Vec<String> {
        self.models
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_selected_model(&self, model: &str) {
        self.settings
            .update(PartialSettings::selected_model(model.trim()));
    }

    pub fn set_enable_thinking(&self, enabled: bool) {
        self.settings.update(PartialSettings::enable_thinking(enabled));
    }

    pub fn set_web_search(&self, api_url: &str, api_key: &str) {
        self.settings
            .update(PartialSettings::web_search(api_url.trim(), api_key.trim()));
    }

    pub fn set_web_search_url(&self, api_url: &str) {
        self.settings.update(PartialSettings {
            web_search_api_url: Some(api_url.trim().to_string()),
            ..Default::default()
        });
    }

    pub fn set_web_search_key(&self, api_key: &str) {
        self.settings.update(PartialSettings {
            web_search_api_key: Some(api_key.trim().to_string()),
            ..Default::default()
        });
    }

    pub fn set_second_language(&self, language: &str) {
        self.settings
            .update(PartialSettings::second_language(language.trim()));
    }

    pub fn save_status(&self) -> watch::Receiver<SaveStatus> {
        self.settings.save_status()
    }

    /// Whether the "saving failed" indicator should show.
    pub fn is_save_failed(&self) -> bool {
        self.settings.save_status().borrow().is_failed()
    }

    /// Flush pending edits before the window closes.
    pub fn close(&self) {
        self.settings.shutdown();
    }
}
