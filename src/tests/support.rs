//! Shared fixtures for the scenario tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendError, ModelCatalog, QuickAnswerBackend, QuickAnswerRequest, Translation,
    TranslationBackend,
};
use crate::config::AppConfig;
use crate::notifier::CrossSurfaceNotifier;
use crate::persistence::{KeyValueStore, MemoryStore};
use crate::surfaces::{OptionsSurface, SpotlightSurface, ToastSurface};

pub const DEFAULT_LATENCY: Duration = Duration::from_millis(50);

/// Scriptable backend that records every call it receives.
#[derive(Default)]
pub struct MockBackend {
    pub quick_calls: Mutex<Vec<QuickAnswerRequest>>,
    /// (text, second language)
    pub translate_calls: Mutex<Vec<(String, String)>>,
    latencies: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    already_english: Mutex<HashSet<String>>,
    pub quick_cancels: AtomicUsize,
    pub translate_cancels: AtomicUsize,
}

impl MockBackend {
    pub fn set_latency(&self, text: &str, latency: Duration) {
        self.latencies
            .lock()
            .unwrap()
            .insert(text.to_string(), latency);
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn english_source(&self, text: &str) {
        self.already_english.lock().unwrap().insert(text.to_string());
    }

    fn latency(&self, text: &str) -> Duration {
        self.latencies
            .lock()
            .unwrap()
            .get(text)
            .copied()
            .unwrap_or(DEFAULT_LATENCY)
    }

    fn fails(&self, text: &str) -> bool {
        self.failing.lock().unwrap().contains(text)
    }

    pub fn quick_texts(&self) -> Vec<String> {
        self.quick_calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.clone())
            .collect()
    }

    pub fn translate_texts(&self) -> Vec<String> {
        self.translate_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }
}

#[async_trait]
impl QuickAnswerBackend for MockBackend {
    async fn quick_answer(
        &self,
        request: QuickAnswerRequest,
        _cancel: CancellationToken,
    ) -> Result<String, BackendError> {
        let text = request.text.clone();
        self.quick_calls.lock().unwrap().push(request);
        tokio::time::sleep(self.latency(&text)).await;
        if self.fails(&text) {
            return Err(BackendError::Api(format!("model crashed on {}", text)));
        }
        Ok(format!("answer to {}", text))
    }

    fn cancel_quick_answer(&self) {
        self.quick_cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranslationBackend for MockBackend {
    async fn translate(
        &self,
        text: &str,
        second_language: &str,
        _cancel: CancellationToken,
    ) -> Result<Translation, BackendError> {
        self.translate_calls
            .lock()
            .unwrap()
            .push((text.to_string(), second_language.to_string()));
        tokio::time::sleep(self.latency(text)).await;
        if self.already_english.lock().unwrap().contains(text) {
            return Err(BackendError::SourceMatchesTarget("en".to_string()));
        }
        if self.fails(text) {
            return Err(BackendError::ProviderNotAvailable("translate unreachable".to_string()));
        }
        Ok(Translation {
            text: format!("{} (en)", text),
            detected_language: "de".to_string(),
        })
    }

    fn cancel_translation(&self) {
        self.translate_cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelCatalog for MockBackend {
    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["m1".to_string(), "m2".to_string()])
    }
}

/// Spotlight, options and toast surfaces over one in-memory engine.
pub struct Harness {
    pub engine: Arc<MemoryStore>,
    pub notifier: CrossSurfaceNotifier,
    pub backend: Arc<MockBackend>,
    pub config: AppConfig,
    pub spotlight: SpotlightSurface,
    pub options: OptionsSurface,
    pub toast: ToastSurface,
}

impl Harness {
    /// Open every surface with `model` already persisted and the spotlight shown.
    pub fn with_model(model: &str) -> Self {
        let engine = Arc::new(MemoryStore::new());
        engine.set("selectedModel", serde_json::json!(model));
        let notifier = CrossSurfaceNotifier::default();
        let backend = Arc::new(MockBackend::default());
        let config = AppConfig::default();

        let spotlight = SpotlightSurface::open(
            engine.clone(),
            notifier.clone(),
            backend.clone(),
            backend.clone(),
            &config,
        );
        let options = OptionsSurface::open(
            engine.clone(),
            notifier.clone(),
            backend.clone(),
            config.settings_debounce,
        );
        let toast = ToastSurface::open(&notifier, config.toast_duration);
        spotlight.show();

        Self {
            engine,
            notifier,
            backend,
            config,
            spotlight,
            options,
            toast,
        }
    }
}

pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Wait (in paused time) until the watched value satisfies `predicate`.
pub async fn wait_for<T: Clone>(rx: &mut watch::Receiver<T>, predicate: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(300), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed")
        .clone()
}

/// Every state published from now on, including ones a watcher would skip.
pub fn record<T: Clone + Send + 'static>(
    mut rx: broadcast::Receiver<T>,
) -> (Arc<Mutex<Vec<T>>>, JoinHandle<()>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(value) => sink.lock().unwrap().push(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    panic!("recorder fell behind by {} states", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    (seen, task)
}
