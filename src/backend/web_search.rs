use reqwest::Client;

use super::BackendError;

/// Run `query` against the configured search endpoint and return the raw body.
pub async fn execute_web_search(
    client: &Client,
    query: &str,
    api_url: &str,
    api_key: &str,
) -> Result<String, BackendError> {
    let api_url = api_url.trim();
    let api_key = api_key.trim();
    log::info!(
        "[quick_answer] execute_web_search received url_len={}, has_key={}",
        api_url.len(),
        !api_key.is_empty()
    );
    if api_url.is_empty() {
        return Err(BackendError::NotConfigured(
            "Search API URL not configured in Options".to_string(),
        ));
    }
    if api_key.is_empty() {
        return Err(BackendError::NotConfigured(
            "Search API key not configured in Options".to_string(),
        ));
    }

    let response = client
        .post(format!("{}?format=json", api_url))
        .bearer_auth(api_key)
        .form(&[("q", query)])
        .send()
        .await
        .map_err(|e| BackendError::Api(format!("Search request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(BackendError::Api(format!(
            "Search API error: {}",
            response.status()
        )));
    }

    response
        .text()
        .await
        .map_err(|e| BackendError::InvalidResponse(format!("Failed to read search response: {}", e)))
}
