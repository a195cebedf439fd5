//! Inference, web search and translation backends.
//!
//! The orchestrators only see the traits below. `InferenceService` is the
//! production binding: a local Ollama server for quick answers and model
//! listing, and the batch translate endpoint for translations.

mod ollama;
mod slots;
mod translate;
mod web_search;

pub use ollama::{ChatMessage, OllamaClient, StreamEvent, DEFAULT_OLLAMA_URL};
pub use slots::{OperationSlot, RequestSlots};
pub use translate::{TranslateClient, DEFAULT_TRANSLATE_URL};
pub use web_search::execute_web_search;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while talking to a backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider not available: {0}")]
    ProviderNotAvailable(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Source language already matches target ({0})")]
    SourceMatchesTarget(String),

    #[error("Empty text")]
    EmptyInput,

    #[error("Cancelled")]
    Cancelled,
}

/// Parameters for one quick-answer call.
#[derive(Clone)]
pub struct QuickAnswerRequest {
    pub text: String,
    pub model: String,
    pub enable_thinking: bool,
    pub web_search_api_url: String,
    pub web_search_api_key: String,
}

impl fmt::Debug for QuickAnswerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickAnswerRequest")
            .field("text", &self.text)
            .field("model", &self.model)
            .field("enable_thinking", &self.enable_thinking)
            .field("url_len", &self.web_search_api_url.trim().len())
            .field("has_key", &!self.web_search_api_key.trim().is_empty())
            .finish()
    }
}

/// A translated text and the language the service detected in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub text: String,
    pub detected_language: String,
}

#[async_trait]
pub trait QuickAnswerBackend: Send + Sync {
    async fn quick_answer(
        &self,
        request: QuickAnswerRequest,
        cancel: CancellationToken,
    ) -> Result<String, BackendError>;

    /// Abort the in-flight quick answer, whoever started it.
    fn cancel_quick_answer(&self);
}

#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Translate `text`; `second_language` is the user's optional secondary language.
    async fn translate(
        &self,
        text: &str,
        second_language: &str,
        cancel: CancellationToken,
    ) -> Result<Translation, BackendError>;

    /// Abort the in-flight translation, whoever started it.
    fn cancel_translation(&self);
}

#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

/// Production backend bundle.
pub struct InferenceService {
    ollama: OllamaClient,
    translator: TranslateClient,
    slots: RequestSlots,
}

impl InferenceService {
    pub fn new(ollama: OllamaClient, translator: TranslateClient) -> Self {
        Self {
            ollama,
            translator,
            slots: RequestSlots::default(),
        }
    }

    pub fn with_urls(ollama_url: &str, translate_url: &str) -> Self {
        Self::new(
            OllamaClient::with_url(ollama_url.to_string()),
            TranslateClient::with_url(translate_url.to_string()),
        )
    }

    pub fn ollama(&self) -> &OllamaClient {
        &self.ollama
    }
}

#[async_trait]
impl QuickAnswerBackend for InferenceService {
    async fn quick_answer(
        &self,
        request: QuickAnswerRequest,
        cancel: CancellationToken,
    ) -> Result<String, BackendError> {
        self.slots
            .run(
                &self.slots.quick_answer,
                "quick_answer",
                &cancel,
                self.ollama.quick_answer(&request),
            )
            .await
    }

    fn cancel_quick_answer(&self) {
        self.slots.cancel(&self.slots.quick_answer, "quick_answer");
    }
}

#[async_trait]
impl TranslationBackend for InferenceService {
    async fn translate(
        &self,
        text: &str,
        second_language: &str,
        cancel: CancellationToken,
    ) -> Result<Translation, BackendError> {
        self.slots
            .run(
                &self.slots.translation,
                "translate_text",
                &cancel,
                self.translator.translate_text(text, second_language),
            )
            .await
    }

    fn cancel_translation(&self) {
        self.slots.cancel(&self.slots.translation, "translate_text");
    }
}

#[async_trait]
impl ModelCatalog for InferenceService {
    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        self.ollama.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_debug_hides_key() {
        let request = QuickAnswerRequest {
            text: "weather".to_string(),
            model: "qwen3".to_string(),
            enable_thinking: false,
            web_search_api_url: "https://search".to_string(),
            web_search_api_key: "sk-live".to_string(),
        };
        let printed = format!("{:?}", request);
        assert!(printed.contains("has_key: true"));
        assert!(!printed.contains("sk-live"));
    }

    #[tokio::test]
    async fn test_empty_text_fails_fast() {
        let service = InferenceService::with_urls("http://127.0.0.1:9", "http://127.0.0.1:9");
        let err = service
            .translate("   ", "", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyInput));
    }
}
