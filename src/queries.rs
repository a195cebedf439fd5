//! The two concrete query kinds driven by the spotlight input.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, QuickAnswerBackend, QuickAnswerRequest, Translation, TranslationBackend};
use crate::orchestrator::{QueryOperation, QueryOrchestrator, QueryRequest};
use crate::settings::SettingsDocument;

pub type QuickAnswerOrchestrator = QueryOrchestrator<QuickAnswerQuery>;
pub type TranslationOrchestrator = QueryOrchestrator<TranslationQuery>;

/// Model answer for the typed text, optionally grounded by web search.
pub struct QuickAnswerQuery {
    backend: Arc<dyn QuickAnswerBackend>,
}

impl QuickAnswerQuery {
    pub fn new(backend: Arc<dyn QuickAnswerBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl QueryOperation for QuickAnswerQuery {
    type Output = String;

    fn kind(&self) -> &'static str {
        "quick_answer"
    }

    fn is_configured(&self, settings: &SettingsDocument) -> bool {
        settings.is_model_configured()
    }

    async fn execute(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<String, BackendError> {
        let settings = &request.settings;
        let answer = self
            .backend
            .quick_answer(
                QuickAnswerRequest {
                    text: request.text.clone(),
                    model: settings.selected_model.clone(),
                    enable_thinking: settings.enable_thinking,
                    web_search_api_url: settings.web_search_api_url.clone(),
                    web_search_api_key: settings.web_search_api_key.clone(),
                },
                cancel,
            )
            .await?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(BackendError::InvalidResponse("No response from model".to_string()));
        }
        Ok(answer.to_string())
    }

    fn abandon(&self) {
        self.backend.cancel_quick_answer();
    }
}

/// Translation between English and the user's secondary language.
pub struct TranslationQuery {
    backend: Arc<dyn TranslationBackend>,
}

impl TranslationQuery {
    pub fn new(backend: Arc<dyn TranslationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl QueryOperation for TranslationQuery {
    type Output = Translation;

    fn kind(&self) -> &'static str {
        "translate_text"
    }

    /// English is always available as a target.
    fn is_configured(&self, _settings: &SettingsDocument) -> bool {
        true
    }

    async fn execute(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> Result<Translation, BackendError> {
        self.backend
            .translate(&request.text, &request.settings.second_language, cancel)
            .await
    }

    fn abandon(&self) {
        self.backend.cancel_translation();
    }
}
