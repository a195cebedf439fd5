//! Per-surface settings cache with debounced write-back.
//!
//! Every surface owns one `SettingsStore` over the shared persistence engine.
//! Edits apply to the in-memory document immediately, coalesce into one
//! pending write, and are committed after a quiet period. A commit announces
//! the changed key names to the other surfaces, which re-read those keys from
//! the engine.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::notifier::{
    CrossSurfaceNotifier, ListenerHandle, SurfaceEvent, SurfaceLabel, SETTINGS_CHANGED_EVENT,
};
use crate::persistence::KeyValueStore;
use crate::settings::{PartialSettings, SettingsDocument, SettingsKey};

/// Default quiet period before pending edits are written
pub const DEFAULT_SETTINGS_DEBOUNCE: Duration = Duration::from_millis(250);

/// Upper bound on the wait between retries of a failing write
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Write-back indicator for the settings UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    /// Nothing has been edited yet
    Idle,
    /// Edits are waiting for the debounce window
    Pending,
    Saved,
    /// Last write failed; the in-memory document is kept and the next cycle retries
    Failed(String),
}

impl SaveStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, SaveStatus::Failed(_))
    }
}

struct StoreState {
    document: SettingsDocument,
    pending: PartialSettings,
    flush_timer: Option<CancellationToken>,
    /// Consecutive failed commits
    failed_attempts: u32,
}

struct StoreInner {
    engine: Arc<dyn KeyValueStore>,
    notifier: CrossSurfaceNotifier,
    origin: SurfaceLabel,
    debounce: Duration,
    state: Mutex<StoreState>,
    status: watch::Sender<SaveStatus>,
}

/// Shared handle; clones refer to the same cache.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl SettingsStore {
    /// Create the store for `origin` and load the current document.
    pub fn open(
        engine: Arc<dyn KeyValueStore>,
        notifier: CrossSurfaceNotifier,
        origin: SurfaceLabel,
        debounce: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        let store = Self {
            inner: Arc::new(StoreInner {
                engine,
                notifier,
                origin,
                debounce,
                state: Mutex::new(StoreState {
                    document: SettingsDocument::default(),
                    pending: PartialSettings::default(),
                    flush_timer: None,
                    failed_attempts: 0,
                }),
                status,
            }),
        };
        store.load();
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn origin(&self) -> &SurfaceLabel {
        &self.inner.origin
    }

    /// Re-read the persisted document, filling defaults for absent fields.
    ///
    /// Edits still waiting for write-back stay applied on top.
    pub fn load(&self) -> SettingsDocument {
        seed_missing_defaults(self.inner.engine.as_ref());

        let mut document = SettingsDocument::from_store(self.inner.engine.as_ref());
        let mut state = self.lock();
        document.apply(&state.pending);
        state.document = document.clone();
        log::debug!("[settings][{}] loaded {:?}", self.inner.origin, document);
        document
    }

    /// Latest in-memory document, including edits not yet persisted.
    pub fn snapshot(&self) -> SettingsDocument {
        self.lock().document.clone()
    }

    /// Apply an edit now and schedule its write-back.
    ///
    /// Must be called from within a tokio runtime.
    pub fn update(&self, partial: PartialSettings) {
        if partial.is_empty() {
            return;
        }
        log::info!(
            "[settings][{}] Updated values: {}",
            self.inner.origin,
            partial.redacted()
        );

        {
            let mut state = self.lock();
            state.document.apply(&partial);
            state.pending.merge(&partial);
            self.schedule_flush(&mut state, self.inner.debounce);
        }
        self.inner.status.send_replace(SaveStatus::Pending);
    }

    /// (Re)start the write-back timer, replacing any running one.
    fn schedule_flush(&self, state: &mut StoreState, delay: Duration) {
        if let Some(previous) = state.flush_timer.take() {
            previous.cancel();
        }
        if tokio::runtime::Handle::try_current().is_err() {
            log::warn!(
                "[settings][{}] no runtime, write-back waits for the next flush",
                self.inner.origin
            );
            return;
        }

        let timer = CancellationToken::new();
        state.flush_timer = Some(timer.clone());
        let store = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    store.flush_now();
                }
            }
        });
    }

    fn retry_delay(&self, failed_attempts: u32) -> Duration {
        let factor = 1u32 << failed_attempts.saturating_sub(1).min(8);
        (self.inner.debounce * factor).min(MAX_RETRY_DELAY)
    }

    /// Write every pending edit as one commit, then announce the changed keys.
    ///
    /// Returns the keys that were committed (empty when nothing was pending or
    /// the write failed).
    pub fn flush_now(&self) -> Vec<SettingsKey> {
        let (pending, result) = {
            let mut state = self.lock();
            if let Some(timer) = state.flush_timer.take() {
                timer.cancel();
            }
            let pending = std::mem::take(&mut state.pending);
            if pending.is_empty() {
                return Vec::new();
            }

            let entries: Vec<(String, serde_json::Value)> = pending
                .entries()
                .into_iter()
                .map(|(key, value)| (key.as_str().to_string(), value))
                .collect();
            let result = self.inner.engine.commit(&entries);

            if result.is_err() {
                // Keep the failed edits queued beneath anything newer.
                let mut restored = pending.clone();
                restored.merge(&state.pending);
                state.pending = restored;
                state.failed_attempts += 1;
                let delay = self.retry_delay(state.failed_attempts);
                self.schedule_flush(&mut state, delay);
            } else {
                state.failed_attempts = 0;
            }
            (pending, result)
        };

        match result {
            Ok(()) => {
                let changed_keys: Vec<SettingsKey> = pending.changed_keys().into_iter().collect();
                log::info!(
                    "[settings][{}] saved keys {:?}",
                    self.inner.origin,
                    changed_keys
                );
                self.inner.status.send_replace(SaveStatus::Saved);
                self.inner.notifier.publish(
                    Some(&self.inner.origin),
                    SurfaceEvent::SettingsChanged {
                        changed_keys: changed_keys.clone(),
                    },
                );
                changed_keys
            }
            Err(e) => {
                log::error!("[settings][{}] saving failed: {}", self.inner.origin, e);
                self.inner
                    .status
                    .send_replace(SaveStatus::Failed(e.to_string()));
                Vec::new()
            }
        }
    }

    /// Re-read `keys` from the engine, leaving locally pending edits alone.
    pub fn reload_keys(&self, keys: &[SettingsKey]) {
        let mut state = self.lock();
        for key in keys {
            if state.pending.contains(*key) {
                continue;
            }
            state.document.reload_key(self.inner.engine.as_ref(), *key);
        }
    }

    /// Keep this cache in step with commits made by other surfaces.
    pub fn follow(&self) -> ListenerHandle {
        let store = self.clone();
        self.inner.notifier.listen(
            &self.inner.origin,
            SETTINGS_CHANGED_EVENT,
            move |envelope| {
                if envelope.origin.as_ref() == Some(store.origin()) {
                    return;
                }
                if let SurfaceEvent::SettingsChanged { changed_keys } = envelope.event {
                    log::debug!(
                        "[settings][{}] reloading {:?} after commit #{}",
                        store.origin(),
                        changed_keys,
                        envelope.sequence
                    );
                    store.reload_keys(&changed_keys);
                }
            },
        )
    }

    pub fn save_status(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status.subscribe()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    /// Flush outstanding edits before the surface goes away.
    pub fn shutdown(&self) {
        if self.has_pending_writes() {
            self.flush_now();
        }
    }
}

/// Write defaults for any key that is missing or null so every surface reads
/// the same values the backend falls back to.
fn seed_missing_defaults(engine: &dyn KeyValueStore) {
    let defaults = SettingsDocument::default();
    let missing: Vec<(String, serde_json::Value)> = SettingsKey::ALL
        .into_iter()
        .filter(|key| matches!(engine.get(key.as_str()), None | Some(serde_json::Value::Null)))
        .map(|key| (key.as_str().to_string(), defaults.value_of(key)))
        .collect();

    if missing.is_empty() {
        return;
    }
    // If saving fails the runtime fallbacks still apply.
    if let Err(e) = engine.commit(&missing) {
        log::warn!("[settings] Failed to save seeded default settings: {}", e);
    }
}
