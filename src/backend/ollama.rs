//! Ollama client for quick answers, model listing and streamed chat.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{execute_web_search, BackendError, QuickAnswerRequest};

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
/// Local models may be slow to load on first use
const DEFAULT_OLLAMA_TIMEOUT: Duration = Duration::from_secs(120);

const WEB_SEARCH_TOOL: &str = "web_search";

// System prompt for quick AI responses
const QUICK_ANSWER_SYSTEM_PROMPT: &str = r#"You are a web search agent. Your only job is to answer the user's query using fresh information from the internet.

Rules:
- Always call the tool `web_search` exactly once per user query.
- Use the tool results as your primary source of truth.
- Return a single, direct answer to the user based only on the tool results and common knowledge needed for readability.
- Do not ask follow-up questions. Do not start or continue a conversation. Do not add suggestions or next steps.
- If the results are conflicting, summarize the consensus and note uncertainty briefly.
- If the results are insufficient, say so in one sentence and state what could not be verified.

Output:
- Respond with only the final answer text (no tool logs, no reasoning, no citations unless the application requires them)."#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ToolFunction,
}

#[derive(Debug, Clone, Serialize)]
struct ToolFunction {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Value],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [Tool]>,
    think: bool,
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Chunks forwarded by [`OllamaClient::chat_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
}

fn web_search_tool() -> Tool {
    Tool {
        tool_type: "function",
        function: ToolFunction {
            name: WEB_SEARCH_TOOL,
            description: "Search the internet for current information. Use this when you need to find up-to-date information or facts you don't know.",
            parameters: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to look up on the internet"
                    }
                }
            }),
        },
    }
}

/// Ollama HTTP client
pub struct OllamaClient {
    client: Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl OllamaClient {
    /// Create a client for the default local server
    pub fn new() -> Self {
        Self::with_url(DEFAULT_OLLAMA_URL.to_string())
    }

    /// Create with a custom base URL
    pub fn with_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Some(DEFAULT_OLLAMA_TIMEOUT),
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            match self.timeout {
                Some(timeout) => BackendError::Timeout(timeout),
                None => BackendError::Network(e),
            }
        } else if e.is_connect() {
            BackendError::ProviderNotAvailable(format!(
                "Failed to connect to Ollama at {}: {}. Make sure Ollama is running.",
                self.base_url, e
            ))
        } else {
            BackendError::Network(e)
        }
    }

    /// List installed models in the order the server reports them
    pub async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::ProviderNotAvailable(format!(
                "Failed to list Ollama models ({})",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await.map_err(|e| {
            BackendError::InvalidResponse(format!("Failed to parse models response: {}", e))
        })?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/api/chat", self.base_url);
        let mut req = self.client.post(&url).json(request);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_text) {
                return Err(BackendError::Api(format!(
                    "Ollama error ({}): {}",
                    status, error_response.error
                )));
            }
            return Err(BackendError::Api(format!(
                "Ollama error ({}): {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Answer `request.text`, letting the model run one round of web search tool calls.
    pub async fn quick_answer(&self, request: &QuickAnswerRequest) -> Result<String, BackendError> {
        if request.text.trim().is_empty() {
            log::warn!("[quick_answer] Empty text provided");
            return Err(BackendError::EmptyInput);
        }
        if request.model.trim().is_empty() {
            return Err(BackendError::NotConfigured("No model selected".to_string()));
        }
        log::info!(
            "[quick_answer] model={}, enable_thinking={}, url_len={}, has_key={}",
            request.model,
            request.enable_thinking,
            request.web_search_api_url.trim().len(),
            !request.web_search_api_key.trim().is_empty()
        );

        // Qwen3-style models read a /think or /no_think suffix.
        let thinking_suffix = if request.enable_thinking {
            " /think"
        } else {
            " /no_think"
        };
        let mut messages = vec![
            json!({ "role": "system", "content": QUICK_ANSWER_SYSTEM_PROMPT }),
            json!({ "role": "user", "content": format!("{}{}", request.text, thinking_suffix) }),
        ];
        let tools = [web_search_tool()];

        let first = self
            .chat(&ChatRequest {
                model: &request.model,
                messages: &messages,
                stream: false,
                tools: Some(&tools[..]),
                think: request.enable_thinking,
            })
            .await?;

        let Some(message) = first.message else {
            return Err(BackendError::InvalidResponse(
                "No response from model".to_string(),
            ));
        };
        let tool_calls = message.tool_calls.clone().unwrap_or_default();
        if tool_calls.is_empty() {
            return Ok(message.content);
        }

        let mut tool_results = Vec::new();
        for tool_call in &tool_calls {
            if tool_call.function.name != WEB_SEARCH_TOOL {
                continue;
            }
            let query = tool_call
                .function
                .arguments
                .get("query")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if query.is_empty() {
                continue;
            }

            log::info!("[quick_answer] Executing web_search with query=\"{}\"", query);
            let result = match execute_web_search(
                &self.client,
                query,
                &request.web_search_api_url,
                &request.web_search_api_key,
            )
            .await
            {
                Ok(result) => result,
                Err(e) => {
                    log::warn!("[quick_answer] web_search failed: {}", e);
                    format!("Search failed: {}", e)
                }
            };
            tool_results.push((tool_call.function.name.clone(), result));
        }

        messages.push(json!({
            "role": "assistant",
            "content": message.content,
            "tool_calls": tool_calls,
        }));
        for (tool_name, result) in tool_results {
            messages.push(json!({
                "role": "tool",
                "tool_name": tool_name,
                "content": result,
            }));
        }

        let follow_up = self
            .chat(&ChatRequest {
                model: &request.model,
                messages: &messages,
                stream: false,
                tools: Some(&tools[..]),
                think: request.enable_thinking,
            })
            .await?;

        follow_up
            .message
            .map(|m| m.content)
            .ok_or_else(|| BackendError::InvalidResponse("No response from model".to_string()))
    }

    /// Stream a chat completion, forwarding tokens to `events` as they arrive.
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[ChatMessage],
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Result<(), BackendError> {
        let url = format!("{}/api/chat", self.base_url);
        let mut response = self
            .client
            .post(&url)
            .json(&StreamRequest {
                model,
                messages,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(BackendError::Api(format!(
                "Ollama error ({})",
                response.status()
            )));
        }

        let mut buffer = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            buffer.extend_from_slice(&chunk);
            for line in drain_complete_lines(&mut buffer) {
                if forward_stream_line(&line, &events) {
                    let _ = events.send(StreamEvent::Done);
                    return Ok(());
                }
            }
        }

        // Stream ended without an explicit done flag
        let _ = events.send(StreamEvent::Done);
        Ok(())
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove and return every newline-terminated line in `buffer`.
fn drain_complete_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
        if line.len() > 1 {
            lines.push(line);
        }
    }
    lines
}

/// Forward one NDJSON chunk; returns true once the server reports completion.
fn forward_stream_line(line: &[u8], events: &mpsc::UnboundedSender<StreamEvent>) -> bool {
    match serde_json::from_slice::<ChatResponse>(line) {
        Ok(chunk) => {
            if let Some(message) = chunk.message {
                if !message.content.is_empty() {
                    let _ = events.send(StreamEvent::Token(message.content));
                }
            }
            chunk.done
        }
        Err(e) => {
            log::warn!("[chat_stream] Failed to parse JSON line: {}", e);
            false
        }
    }
}
