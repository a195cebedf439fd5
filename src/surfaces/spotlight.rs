use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};

use crate::backend::{QuickAnswerBackend, Translation, TranslationBackend};
use crate::config::AppConfig;
use crate::geometry::GeometryReactor;
use crate::notifier::{CrossSurfaceNotifier, ListenerHandle, SurfaceEvent, SurfaceLabel};
use crate::orchestrator::QueryState;
use crate::persistence::KeyValueStore;
use crate::queries::{QuickAnswerOrchestrator, QuickAnswerQuery, TranslationOrchestrator, TranslationQuery};
use crate::settings_store::SettingsStore;

pub const COPIED_TOAST_MESSAGE: &str = "Copied to clipboard";

struct Geometry {
    reactor: Mutex<GeometryReactor>,
    height: watch::Sender<f64>,
}

impl Geometry {
    fn update(&self, change: impl FnOnce(&mut GeometryReactor) -> Option<f64>) {
        let mut reactor = self
            .reactor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(height) = change(&mut reactor) {
            log::debug!("[spotlight] resize to {}", height);
            self.height.send_replace(height);
        }
    }
}

/// The floating input window with its quick-answer and translation panels.
pub struct SpotlightSurface {
    label: SurfaceLabel,
    settings: SettingsStore,
    notifier: CrossSurfaceNotifier,
    quick_answer: QuickAnswerOrchestrator,
    translation: TranslationOrchestrator,
    geometry: Arc<Geometry>,
    visible: AtomicBool,
    input: Mutex<String>,
    _settings_listener: ListenerHandle,
}

impl SpotlightSurface {
    /// Build the surface hidden. Must be called from within a tokio runtime.
    pub fn open(
        engine: Arc<dyn KeyValueStore>,
        notifier: CrossSurfaceNotifier,
        quick_answer: Arc<dyn QuickAnswerBackend>,
        translation: Arc<dyn TranslationBackend>,
        config: &AppConfig,
    ) -> Self {
        let label = SurfaceLabel::spotlight();
        let settings = SettingsStore::open(engine, notifier.clone(), label.clone(), config.settings_debounce);
        let settings_listener = settings.follow();

        let reactor = GeometryReactor::new(config.geometry);
        let (height, _) = watch::channel(reactor.height());
        let geometry = Arc::new(Geometry {
            reactor: Mutex::new(reactor),
            height,
        });

        // Height follows each published state before the state is readable.
        let answer_geometry = Arc::clone(&geometry);
        let quick_answer = QuickAnswerOrchestrator::with_observer(
            QuickAnswerQuery::new(quick_answer),
            settings.clone(),
            config.quick_answer,
            move |state: &QueryState<String>| {
                answer_geometry.update(|reactor| match state {
                    QueryState::Debouncing { .. } => reactor.answer_restarted(),
                    _ => reactor.set_answer_visible(state.is_visible()),
                })
            },
        );
        let translation_geometry = Arc::clone(&geometry);
        let translation = TranslationOrchestrator::with_observer(
            TranslationQuery::new(translation),
            settings.clone(),
            config.translation,
            move |state: &QueryState<Translation>| {
                translation_geometry.update(|reactor| reactor.set_translation_visible(state.is_visible()))
            },
        );

        Self {
            label,
            settings,
            notifier,
            quick_answer,
            translation,
            geometry,
            visible: AtomicBool::new(false),
            input: Mutex::new(String::new()),
            _settings_listener: settings_listener,
        }
    }

    fn input(&self) -> MutexGuard<'_, String> {
        self.input.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    pub fn show(&self) {
        if self.visible.swap(true, Ordering::SeqCst) {
            return;
        }
        // Other surfaces may have committed while this one was hidden.
        self.settings.load();
        log::info!("[spotlight] shown");
    }

    /// Hiding unmounts the panels: pending and in-flight queries are dropped.
    pub fn hide(&self) {
        if !self.visible.swap(false, Ordering::SeqCst) {
            return;
        }
        self.input().clear();
        self.quick_answer.cancel();
        self.translation.cancel();
        log::info!("[spotlight] hidden");
    }

    /// Hotkey behaviour. Returns the new visibility.
    pub fn toggle(&self) -> bool {
        if self.is_visible() {
            self.hide();
        } else {
            self.show();
        }
        self.is_visible()
    }

    /// The input field changed; both panels re-query independently.
    pub fn on_input(&self, text: &str) {
        if !self.is_visible() {
            log::debug!("[spotlight] input ignored while hidden");
            return;
        }
        {
            let mut input = self.input();
            if *input == text {
                return;
            }
            input.clear();
            input.push_str(text);
        }
        self.quick_answer.on_input(text);
        self.translation.on_input(text);
    }

    pub fn current_input(&self) -> String {
        self.input().clone()
    }

    pub fn answer_state(&self) -> QueryState<String> {
        self.quick_answer.state()
    }

    pub fn translation_state(&self) -> QueryState<Translation> {
        self.translation.state()
    }

    pub fn watch_answer(&self) -> watch::Receiver<QueryState<String>> {
        self.quick_answer.subscribe()
    }

    pub fn watch_translation(&self) -> watch::Receiver<QueryState<Translation>> {
        self.translation.subscribe()
    }

    /// Every answer state from now on, including ones a watcher would skip.
    pub fn answer_transitions(&self) -> broadcast::Receiver<QueryState<String>> {
        self.quick_answer.subscribe_transitions()
    }

    pub fn translation_transitions(&self) -> broadcast::Receiver<QueryState<Translation>> {
        self.translation.subscribe_transitions()
    }

    pub fn height(&self) -> f64 {
        *self.geometry.height.borrow()
    }

    pub fn watch_height(&self) -> watch::Receiver<f64> {
        self.geometry.height.subscribe()
    }

    /// The answer panel rendered and measured its content.
    pub fn report_answer_height(&self, height: f64) {
        self.geometry
            .update(|reactor| reactor.set_measured_answer_height(height));
    }

    /// Text to put on the clipboard: the answer if there is one, else the
    /// translation. Announces the copy on the toast surface.
    pub fn copy_result(&self) -> Option<String> {
        let text = self
            .quick_answer
            .state()
            .payload()
            .cloned()
            .or_else(|| self.translation.state().payload().map(|t| t.text.clone()))?;

        self.notifier.publish_to(
            Some(&self.label),
            &SurfaceLabel::toast(),
            SurfaceEvent::Toast {
                message: COPIED_TOAST_MESSAGE.to_string(),
            },
        );
        Some(text)
    }
}

impl Drop for SpotlightSurface {
    fn drop(&mut self) {
        self.quick_answer.cancel();
        self.translation.cancel();
        self.settings.shutdown();
    }
}
