//! Translation via the batch translate web endpoint.

use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{BackendError, Translation};

pub const DEFAULT_TRANSLATE_URL: &str = "https://translate.google.com";
const DEFAULT_TRANSLATE_TIMEOUT: Duration = Duration::from_secs(15);
const RPC_ID: &str = "MkEWBc";
const ENGLISH: &str = "en";

/// Translation client
pub struct TranslateClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    next_req_id: AtomicU32,
}

impl TranslateClient {
    pub fn new() -> Self {
        Self::with_url(DEFAULT_TRANSLATE_URL.to_string())
    }

    pub fn with_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TRANSLATE_TIMEOUT,
            next_req_id: AtomicU32::new(1000),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Translate following the secondary-language policy.
    ///
    /// Without a secondary language (or with English), text is translated to
    /// English and English input is a no-op. With one, English input goes to
    /// the secondary language and anything else goes to English.
    pub async fn translate_text(
        &self,
        text: &str,
        second_language: &str,
    ) -> Result<Translation, BackendError> {
        if text.trim().is_empty() {
            return Err(BackendError::EmptyInput);
        }

        let second_language = second_language.trim();
        if second_language.is_empty() || second_language == ENGLISH {
            let english = self.translate_with_target(text, ENGLISH).await?;
            if english.detected_language == ENGLISH {
                return Err(BackendError::SourceMatchesTarget(ENGLISH.to_string()));
            }
            return Ok(english);
        }

        let second = self.translate_with_target(text, second_language).await?;
        if second.detected_language == ENGLISH {
            return Ok(second);
        }
        if second.detected_language == second_language {
            log::debug!(
                "[translate_text] source already in {}, translating to English",
                second_language
            );
        }
        self.translate_with_target(text, ENGLISH).await
    }

    /// Translate `text` into `target_language`, auto-detecting the source.
    pub async fn translate_with_target(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<Translation, BackendError> {
        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed) % 9000 + 1000;
        let url = format!(
            "{}/_/TranslateWebserverUi/data/batchexecute?rpcids={}&source-path=/&f.sid=&bl=&hl=en-US&soc-app=1&soc-platform=1&soc-device=1&_reqid={}&rt=c",
            self.base_url, RPC_ID, req_id
        );

        // [[["MkEWBc","[[\"text\",\"auto\",\"en\",true],[null]]",null,"0"]]]
        let freq_inner = json!([[text, "auto", target_language.trim(), true], [null]]);
        let freq = json!([[[RPC_ID, freq_inner.to_string(), null, "0"]]]);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .form(&[("f.req", freq.to_string())])
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    BackendError::ProviderNotAvailable(format!("Translation service unreachable: {}", e))
                } else if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Network(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(BackendError::Api(format!("HTTP error: {}", response.status())));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to read response: {}", e)))?;

        parse_batch_response(&response_text)
    }
}

impl Default for TranslateClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the chunked batchexecute body (`)]}'` guard, length lines, JSON lines).
pub(crate) fn parse_batch_response(response_text: &str) -> Result<Translation, BackendError> {
    let json_text = response_text
        .strip_prefix(")]}'")
        .ok_or_else(|| BackendError::InvalidResponse("Invalid response format".to_string()))?;

    for line in json_text.lines() {
        let line = line.trim();
        if !line.starts_with('[') || line.contains("\"e\"") {
            continue;
        }

        let outer: Value = serde_json::from_str(line).map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse response JSON: {}", e))
        })?;

        // [["wrb.fr", "MkEWBc", "<json payload>", ...], ...]
        let payloads = outer
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| item.as_array())
            .filter(|item| item.first().and_then(Value::as_str) == Some("wrb.fr"))
            .filter_map(|item| item.get(2).and_then(Value::as_str));

        for data_str in payloads {
            let data: Value = serde_json::from_str(data_str).map_err(|e| {
                BackendError::InvalidResponse(format!("Failed to parse translation data: {}", e))
            })?;
            if let Some(translation) = extract_translation(&data) {
                return Ok(translation);
            }
        }
    }

    Err(BackendError::InvalidResponse(
        "Could not parse translation from response".to_string(),
    ))
}

fn extract_translation(data: &Value) -> Option<Translation> {
    let parts = data.get(1)?.get(0)?.get(0)?.get(5)?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get(0).and_then(Value::as_str))
        .collect();

    let detected_language = data
        .get(1)
        .and_then(|v| v.get(3))
        .and_then(Value::as_str)
        .or_else(|| data.get(2).and_then(Value::as_str))
        .unwrap_or("auto")
        .to_string();

    Some(Translation {
        text,
        detected_language,
    })
}

#[cfg(test)]
pub(crate) fn batch_response_for(text: &str, detected: &str) -> String {
    let data = json!([
        null,
        [[[null, null, null, null, null, [[text, null]]]], null, null, detected]
    ]);
    let outer = json!([["wrb.fr", RPC_ID, data.to_string(), null, null, null, "generic"]]);
    format!(")]}}'\n\n{}\n{}\n", outer.to_string().len(), outer)
}
