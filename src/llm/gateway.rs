use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::{CompletionRequest, Message, TextGenerator};
use crate::error::BackendError;
use crate::util::SecretString;

// ============================================================================
// OpenAI-compatible gateway client
// ============================================================================

pub struct GatewayClient {
    api_key: SecretString,
    model: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// One decoded server-sent event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Fragment(String),
    Done,
    Ignored,
}

/// Decode a single SSE line. Non-`data:` lines, keep-alives, and frames
/// without content are `Ignored`; `[DONE]` terminates the stream.
pub fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return SseEvent::Ignored;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|c| !c.is_empty())
            .map(SseEvent::Fragment)
            .unwrap_or(SseEvent::Ignored),
        Err(_) => SseEvent::Ignored,
    }
}

/// Pull the gateway's `error.message` out of a failure body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn map_transport(err: reqwest::Error, request: &CompletionRequest) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(request.timeout)
    } else {
        BackendError::Transport(err.to_string())
    }
}

impl GatewayClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Result<Self, BackendError> {
        Ok(Self {
            api_key: api_key.into(),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder()
                .build()
                .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &CompletionRequest) -> Result<reqwest::Response, BackendError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: request.stream,
        };

        debug!(
            "Calling gateway at {} with model: {} (stream: {})",
            self.base_url, self.model, request.stream
        );

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(request.timeout)
            .header("content-type", "application/json")
            .json(&body);

        if !self.api_key.is_empty() {
            req = req.header("authorization", format!("Bearer {}", self.api_key.expose()));
        }

        let response = req.send().await.map_err(|e| map_transport(e, request))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status,
                message: error_message(&text),
            });
        }
        Ok(response)
    }

    async fn complete_plain(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let response = self.send(request).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Transport(format!("invalid response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(BackendError::EmptyResponse)
    }

    /// Concatenate SSE fragments in arrival order until `[DONE]` or EOF.
    async fn complete_streaming(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let mut response = self.send(request).await?;
        let mut buffer = String::new();
        let mut output = String::new();

        'read: while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_transport(e, request))?
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                match parse_sse_line(&line) {
                    SseEvent::Fragment(text) => output.push_str(&text),
                    SseEvent::Done => break 'read,
                    SseEvent::Ignored => {}
                }
            }
        }

        // Trailing line without newline
        if let SseEvent::Fragment(text) = parse_sse_line(&buffer) {
            output.push_str(&text);
        }

        if output.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(output)
    }
}

#[async_trait]
impl TextGenerator for GatewayClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        if request.stream {
            self.complete_streaming(request).await
        } else {
            self.complete_plain(request).await
        }
    }
}
