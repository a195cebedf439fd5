//! Debounced, cancellable query lifecycle shared by the quick-answer and
//! translation panels.
//!
//! Every input event is stamped with a new sequence token. Only the task that
//! holds the latest token may publish a state; anything older is inert even if
//! its backend call completes later.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::config::QueryTiming;
use crate::settings::SettingsDocument;
use crate::settings_store::SettingsStore;

/// Monotonic per-orchestrator request id
pub type SequenceToken = u64;

/// Called synchronously with every state the orchestrator publishes.
pub type StateObserver<T> = Box<dyn Fn(&QueryState<T>) + Send + Sync>;

const TRANSITION_CAPACITY: usize = 64;

/// Classified outcome of a failed query
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Cancelled")]
    Cancelled,

    /// Nothing to show, e.g. the text is already in the target language
    #[error("Nothing to show: {0}")]
    NoOpCondition(String),

    #[error("Not configured: {0}")]
    Unconfigured(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{0}")]
    BackendError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    /// Whether the result panel should render this as an inline error.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            QueryError::BackendUnavailable(_) | QueryError::BackendError(_) | QueryError::Timeout(_)
        )
    }
}

impl From<BackendError> for QueryError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Cancelled => QueryError::Cancelled,
            BackendError::SourceMatchesTarget(lang) => {
                QueryError::NoOpCondition(format!("source already in {}", lang))
            }
            BackendError::EmptyInput => QueryError::NoOpCondition("empty input".to_string()),
            BackendError::NotConfigured(msg) => QueryError::Unconfigured(msg),
            BackendError::ProviderNotAvailable(msg) => QueryError::BackendUnavailable(msg),
            BackendError::Network(e) if e.is_connect() => QueryError::BackendUnavailable(e.to_string()),
            BackendError::Timeout(d) => QueryError::Timeout(d),
            other => QueryError::BackendError(other.to_string()),
        }
    }
}

/// Exposed state of one orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
    Idle,
    /// Waiting for the input to settle
    Debouncing { seq: SequenceToken },
    InFlight { seq: SequenceToken },
    /// `None` means the call succeeded with nothing to show
    Settled { seq: SequenceToken, payload: Option<T> },
    Failed { seq: SequenceToken, error: QueryError },
}

impl<T> QueryState<T> {
    pub fn seq(&self) -> Option<SequenceToken> {
        match self {
            QueryState::Idle => None,
            QueryState::Debouncing { seq }
            | QueryState::InFlight { seq }
            | QueryState::Settled { seq, .. }
            | QueryState::Failed { seq, .. } => Some(*seq),
        }
    }

    /// Whether the result region takes up space in the window.
    pub fn is_visible(&self) -> bool {
        !matches!(self, QueryState::Idle | QueryState::Settled { payload: None, .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, QueryState::Debouncing { .. } | QueryState::InFlight { .. })
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            QueryState::Settled { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        match self {
            QueryState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Input plus the settings in effect when the call was issued.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub seq: SequenceToken,
    pub settings: SettingsDocument,
}

/// One kind of backend call an orchestrator drives.
#[async_trait]
pub trait QueryOperation: Send + Sync + 'static {
    type Output: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Log prefix
    fn kind(&self) -> &'static str;

    /// Settings-derived precondition; unconfigured inputs stay Idle.
    fn is_configured(&self, settings: &SettingsDocument) -> bool;

    async fn execute(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<Self::Output, BackendError>;

    /// Ask the backend to drop the in-flight call of this kind.
    fn abandon(&self) {}
}

struct ActiveRequest {
    seq: SequenceToken,
    cancel: CancellationToken,
    in_flight: bool,
}

#[derive(Default)]
struct Control {
    latest: SequenceToken,
    active: Option<ActiveRequest>,
    /// Trimmed text behind `latest`, while it is debouncing or has an answer
    latest_text: Option<String>,
}

struct OrchestratorInner<Q: QueryOperation> {
    operation: Q,
    settings: SettingsStore,
    timing: QueryTiming,
    control: Mutex<Control>,
    state: watch::Sender<QueryState<Q::Output>>,
    transitions: broadcast::Sender<QueryState<Q::Output>>,
    observer: Option<StateObserver<Q::Output>>,
}

pub struct QueryOrchestrator<Q: QueryOperation> {
    inner: Arc<OrchestratorInner<Q>>,
}

impl<Q: QueryOperation> Clone for QueryOrchestrator<Q> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q: QueryOperation> QueryOrchestrator<Q> {
    pub fn new(operation: Q, settings: SettingsStore, timing: QueryTiming) -> Self {
        Self::build(operation, settings, timing, None)
    }

    /// Like `new`, with `observer` run inline on every published state.
    ///
    /// The observer runs under the orchestrator's lock and must not call back
    /// into it.
    pub fn with_observer(
        operation: Q,
        settings: SettingsStore,
        timing: QueryTiming,
        observer: impl Fn(&QueryState<Q::Output>) + Send + Sync + 'static,
    ) -> Self {
        Self::build(operation, settings, timing, Some(Box::new(observer)))
    }

    fn build(
        operation: Q,
        settings: SettingsStore,
        timing: QueryTiming,
        observer: Option<StateObserver<Q::Output>>,
    ) -> Self {
        let (state, _) = watch::channel(QueryState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            inner: Arc::new(OrchestratorInner {
                operation,
                settings,
                timing,
                control: Mutex::new(Control::default()),
                state,
                transitions,
                observer,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn kind(&self) -> &'static str {
        self.inner.operation.kind()
    }

    pub fn state(&self) -> QueryState<Q::Output> {
        self.inner.state.borrow().clone()
    }

    /// Latest state only; intermediate states may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<QueryState<Q::Output>> {
        self.inner.state.subscribe()
    }

    /// Every state published from now on, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<QueryState<Q::Output>> {
        self.inner.transitions.subscribe()
    }

    pub fn latest_seq(&self) -> SequenceToken {
        self.lock().latest
    }

    /// Feed the current input text. Supersedes whatever was pending.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_input(&self, text: &str) -> SequenceToken {
        let text = text.trim().to_string();
        let too_short = text.is_empty() || text.chars().count() < self.inner.timing.min_chars;
        let configured = self
            .inner
            .operation
            .is_configured(&self.inner.settings.snapshot());

        let (seq, cancel, abandon) = {
            let mut control = self.lock();
            if configured && !too_short && self.repeats_latest(&control, &text) {
                log::debug!("[{}][seq={}] same input, keeping request", self.kind(), control.latest);
                return control.latest;
            }
            control.latest += 1;
            let seq = control.latest;
            let abandon = Self::cancel_active(&mut control);

            if too_short || !configured {
                control.latest_text = None;
                self.publish(QueryState::Idle);
                (seq, None, abandon)
            } else {
                let cancel = CancellationToken::new();
                control.active = Some(ActiveRequest {
                    seq,
                    cancel: cancel.clone(),
                    in_flight: false,
                });
                control.latest_text = Some(text.clone());
                self.publish(QueryState::Debouncing { seq });
                (seq, Some(cancel), abandon)
            }
        };

        if abandon {
            self.inner.operation.abandon();
        }

        match cancel {
            Some(cancel) => {
                log::debug!("[{}][seq={}] debouncing {} chars", self.kind(), seq, text.len());
                let orchestrator = self.clone();
                tokio::spawn(async move { orchestrator.drive(text, seq, cancel).await });
            }
            None if !configured => {
                log::debug!("[{}][seq={}] not configured, staying idle", self.kind(), seq);
            }
            None => {
                log::debug!("[{}][seq={}] input below minimum length", self.kind(), seq);
            }
        }
        seq
    }

    /// Drop pending and in-flight work and clear the panel (surface hidden).
    pub fn cancel(&self) {
        let abandon = {
            let mut control = self.lock();
            // Retire the current token so nothing issued before this can surface.
            control.latest += 1;
            control.latest_text = None;
            let abandon = Self::cancel_active(&mut control);
            self.publish(QueryState::Idle);
            abandon
        };
        if abandon {
            self.inner.operation.abandon();
        }
        log::debug!("[{}] cancelled", self.kind());
    }

    /// Whether `text` is what the current request is already working on (or
    /// has answered), so issuing it again would only repeat the call.
    fn repeats_latest(&self, control: &Control, text: &str) -> bool {
        if control.latest_text.as_deref() != Some(text) {
            return false;
        }
        let state = self.inner.state.borrow();
        state.seq() == Some(control.latest)
            && matches!(
                *state,
                QueryState::Debouncing { .. } | QueryState::InFlight { .. } | QueryState::Settled { .. }
            )
    }

    /// Hand `next` to the observer, the transition log and the watch channel.
    ///
    /// Callers hold the control lock so every consumer sees the same order.
    fn publish(&self, next: QueryState<Q::Output>) {
        if let Some(observer) = &self.inner.observer {
            observer(&next);
        }
        // No transition subscribers is fine.
        let _ = self.inner.transitions.send(next.clone());
        self.inner.state.send_replace(next);
    }

    /// Returns whether the cancelled request had already reached the backend.
    fn cancel_active(control: &mut Control) -> bool {
        match control.active.take() {
            Some(active) => {
                active.cancel.cancel();
                active.in_flight
            }
            None => false,
        }
    }

    async fn drive(self, text: String, seq: SequenceToken, cancel: CancellationToken) {
        let timing = self.inner.timing;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(timing.debounce) => {}
        }

        // Settings may have changed while debouncing.
        let settings = self.inner.settings.snapshot();
        if !self.inner.operation.is_configured(&settings) {
            log::debug!("[{}][seq={}] unconfigured at fire time", self.kind(), seq);
            self.publish_if_current(seq, QueryState::Idle);
            return;
        }
        if !self.mark_in_flight(seq) {
            return;
        }

        log::info!("[{}][seq={}] issuing request", self.kind(), seq);
        let request = QueryRequest {
            text,
            seq,
            settings,
        };

        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(QueryError::Cancelled),

            _ = tokio::time::sleep(timing.timeout) => {
                log::warn!("[{}][seq={}] timed out after {:?}", self.kind(), seq, timing.timeout);
                self.inner.operation.abandon();
                Err(QueryError::Timeout(timing.timeout))
            }

            result = self.inner.operation.execute(&request, cancel.clone()) => {
                result.map_err(QueryError::from)
            }
        };

        let next = match outcome {
            Ok(payload) => QueryState::Settled {
                seq,
                payload: Some(payload),
            },
            Err(QueryError::NoOpCondition(reason)) => {
                log::debug!("[{}][seq={}] no-op: {}", self.kind(), seq, reason);
                QueryState::Settled { seq, payload: None }
            }
            Err(QueryError::Cancelled) | Err(QueryError::Unconfigured(_)) => QueryState::Idle,
            Err(error) => {
                log::warn!("[{}][seq={}] failed: {}", self.kind(), seq, error);
                QueryState::Failed { seq, error }
            }
        };

        if !self.publish_if_current(seq, next) {
            log::debug!("[{}][seq={}] discarding stale result", self.kind(), seq);
        }
    }

    fn mark_in_flight(&self, seq: SequenceToken) -> bool {
        let mut control = self.lock();
        if control.latest != seq {
            return false;
        }
        match control.active.as_mut() {
            Some(active) if active.seq == seq => active.in_flight = true,
            _ => return false,
        }
        self.publish(QueryState::InFlight { seq });
        true
    }

    /// Publish a terminal state for `seq` unless a newer token was issued.
    fn publish_if_current(&self, seq: SequenceToken, next: QueryState<Q::Output>) -> bool {
        let mut control = self.lock();
        if control.latest != seq {
            return false;
        }
        if control.active.as_ref().map(|a| a.seq) == Some(seq) {
            control.active = None;
        }
        if !matches!(next, QueryState::Settled { .. }) {
            control.latest_text = None;
        }
        self.publish(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{CrossSurfaceNotifier, SurfaceLabel};
    use crate::persistence::MemoryStore;
    use crate::settings::PartialSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upper-cases its input; a few magic inputs map to errors.
    struct ShoutOperation {
        calls: AtomicUsize,
        abandoned: AtomicUsize,
        latency: Duration,
    }

    impl ShoutOperation {
        fn new(latency: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                abandoned: AtomicUsize::new(0),
                latency,
            }
        }
    }

    #[async_trait]
    impl QueryOperation for Arc<ShoutOperation> {
        type Output = String;

        fn kind(&self) -> &'static str {
            "shout"
        }

        fn is_configured(&self, settings: &SettingsDocument) -> bool {
            settings.is_model_configured()
        }

        async fn execute(
            &self,
            request: &QueryRequest,
            _cancel: CancellationToken,
        ) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            match request.text.as_str() {
                "same" => Err(BackendError::SourceMatchesTarget("en".to_string())),
                "boom" => Err(BackendError::Api("HTTP error: 500".to_string())),
                "offline" => Err(BackendError::ProviderNotAvailable("connection refused".to_string())),
                text => Ok(text.to_uppercase()),
            }
        }

        fn abandon(&self) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn timing() -> QueryTiming {
        QueryTiming {
            debounce: Duration::from_millis(300),
            min_chars: 2,
            timeout: Duration::from_secs(30),
        }
    }

    fn setup(latency: Duration) -> (QueryOrchestrator<Arc<ShoutOperation>>, Arc<ShoutOperation>, SettingsStore) {
        let store = SettingsStore::open(
            Arc::new(MemoryStore::new()),
            CrossSurfaceNotifier::default(),
            SurfaceLabel::spotlight(),
            Duration::from_millis(250),
        );
        store.update(PartialSettings::selected_model("llama3"));
        let operation = Arc::new(ShoutOperation::new(latency));
        let orchestrator = QueryOrchestrator::new(Arc::clone(&operation), store.clone(), timing());
        (orchestrator, operation, store)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            QueryError::from(BackendError::SourceMatchesTarget("en".to_string())),
            QueryError::NoOpCondition("source already in en".to_string())
        );
        assert_eq!(QueryError::from(BackendError::Cancelled), QueryError::Cancelled);
        assert!(matches!(
            QueryError::from(BackendError::NotConfigured("model".to_string())),
            QueryError::Unconfigured(_)
        ));
        let visible = QueryError::from(BackendError::InvalidResponse("No response from model".to_string()));
        assert!(visible.is_user_visible());
        assert!(!QueryError::Cancelled.is_user_visible());
    }

    #[test]
    fn test_visibility() {
        assert!(!QueryState::<String>::Idle.is_visible());
        assert!(QueryState::<String>::Debouncing { seq: 1 }.is_visible());
        assert!(!QueryState::<String>::Settled { seq: 1, payload: None }.is_visible());
        assert!(QueryState::Settled { seq: 1, payload: Some("x".to_string()) }.is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_debounce() {
        let (orchestrator, operation, _store) = setup(Duration::from_millis(100));

        let seq = orchestrator.on_input("hello");
        assert_eq!(orchestrator.state(), QueryState::Debouncing { seq });

        advance(301).await;
        assert_eq!(orchestrator.state(), QueryState::InFlight { seq });

        advance(100).await;
        assert_eq!(
            orchestrator.state(),
            QueryState::Settled { seq, payload: Some("HELLO".to_string()) }
        );
        assert_eq!(operation.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_input_stays_idle() {
        let (orchestrator, operation, _store) = setup(Duration::from_millis(100));

        orchestrator.on_input("h");
        assert_eq!(orchestrator.state(), QueryState::Idle);
        advance(1000).await;
        assert_eq!(operation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_stays_idle() {
        let (orchestrator, operation, store) = setup(Duration::from_millis(100));
        store.update(PartialSettings::selected_model(""));

        orchestrator.on_input("hello");
        assert_eq!(orchestrator.state(), QueryState::Idle);
        advance(1000).await;
        assert_eq!(operation.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_op_settles_empty() {
        let (orchestrator, _operation, _store) = setup(Duration::from_millis(10));

        let seq = orchestrator.on_input("same");
        advance(400).await;
        assert_eq!(orchestrator.state(), QueryState::Settled { seq, payload: None });
        assert!(!orchestrator.state().is_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failures_are_classified() {
        let (orchestrator, _operation, _store) = setup(Duration::from_millis(10));

        let seq = orchestrator.on_input("boom");
        advance(400).await;
        assert_eq!(
            orchestrator.state().error(),
            Some(&QueryError::BackendError("API error: HTTP error: 500".to_string()))
        );

        let seq2 = orchestrator.on_input("offline");
        assert!(seq2 > seq);
        advance(400).await;
        assert!(matches!(
            orchestrator.state(),
            QueryState::Failed { error: QueryError::BackendUnavailable(_), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_abandons_backend() {
        let (orchestrator, operation, _store) = setup(Duration::from_secs(120));

        let seq = orchestrator.on_input("hello");
        advance(300 + 30_000 + 1).await;
        assert_eq!(
            orchestrator.state(),
            QueryState::Failed { seq, error: QueryError::Timeout(Duration::from_secs(30)) }
        );
        assert_eq!(operation.abandoned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_in_flight() {
        let (orchestrator, operation, _store) = setup(Duration::from_millis(500));

        orchestrator.on_input("hello");
        advance(350).await;
        assert!(matches!(orchestrator.state(), QueryState::InFlight { .. }));

        orchestrator.cancel();
        assert_eq!(orchestrator.state(), QueryState::Idle);
        assert_eq!(operation.abandoned.load(Ordering::SeqCst), 1);

        advance(1000).await;
        assert_eq!(orchestrator.state(), QueryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_whitespace_keeps_request() {
        let (orchestrator, operation, _store) = setup(Duration::from_millis(10));

        let seq = orchestrator.on_input("hello");
        advance(100).await;
        assert_eq!(orchestrator.on_input("hello "), seq);
        assert_eq!(orchestrator.on_input(" hello"), seq);
        advance(1000).await;
        assert_eq!(orchestrator.on_input("hello  "), seq);
        advance(1000).await;

        assert_eq!(operation.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            orchestrator.state(),
            QueryState::Settled { seq, payload: Some("HELLO".to_string()) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_input_is_retried_when_repeated() {
        let (orchestrator, operation, _store) = setup(Duration::from_millis(10));

        let seq = orchestrator.on_input("boom");
        advance(400).await;
        assert!(orchestrator.state().error().is_some());

        assert!(orchestrator.on_input("boom ") > seq);
        advance(400).await;
        assert_eq!(operation.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_include_states_a_watcher_would_skip() {
        let (orchestrator, _operation, _store) = setup(Duration::from_millis(10));
        let mut transitions = orchestrator.subscribe_transitions();

        let first = orchestrator.on_input("hello");
        orchestrator.on_input("");
        let second = orchestrator.on_input("other");

        let mut seen = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                QueryState::Debouncing { seq: first },
                QueryState::Idle,
                QueryState::Debouncing { seq: second },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_runs_before_state_is_readable() {
        let store = SettingsStore::open(
            Arc::new(MemoryStore::new()),
            CrossSurfaceNotifier::default(),
            SurfaceLabel::spotlight(),
            Duration::from_millis(250),
        );
        store.update(PartialSettings::selected_model("llama3"));
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        let orchestrator = QueryOrchestrator::with_observer(
            Arc::new(ShoutOperation::new(Duration::from_millis(10))),
            store,
            timing(),
            move |state: &QueryState<String>| sink.lock().unwrap().push(state.clone()),
        );

        let seq = orchestrator.on_input("hello");
        assert_eq!(*observed.lock().unwrap(), vec![QueryState::Debouncing { seq }]);

        advance(400).await;
        assert_eq!(observed.lock().unwrap().len(), 3);
        assert_eq!(observed.lock().unwrap().last(), Some(&orchestrator.state()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_debouncing_does_not_abandon() {
        let (orchestrator, operation, _store) = setup(Duration::from_millis(10));

        orchestrator.on_input("hello");
        orchestrator.cancel();
        advance(1000).await;
        assert_eq!(operation.calls.load(Ordering::SeqCst), 0);
        assert_eq!(operation.abandoned.load(Ordering::SeqCst), 0);
    }
}
