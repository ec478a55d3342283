use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::prompts;
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One completion round-trip. The model id is supplied by the backend.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            max_tokens: 1024,
            temperature: 0.7,
            timeout: Duration::from_secs(90),
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Content of the last user message.
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Text-completion capability. Every stage depends on this interface;
/// the remote/local choice is made once, in the factory.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `false` means every stage should take its deterministic path directly.
    fn is_available(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;
}

/// Deterministic-local generator used when no backend is configured.
pub struct LocalGenerator;

#[async_trait]
impl TextGenerator for LocalGenerator {
    fn is_available(&self) -> bool {
        false
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, BackendError> {
        Err(BackendError::Unavailable)
    }
}

/// Canned responses for `--dry-run`, keyed on which prompt is calling.
pub struct MockGenerator;

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Echo the enumerated catalog back with descending scores.
    fn ranking_response(prompt: &str) -> String {
        let names: Vec<&str> = prompt
            .lines()
            .filter_map(|line| {
                let (number, rest) = line.split_once(". ")?;
                number.parse::<usize>().ok()?;
                rest.split_once(':').map(|(name, _)| name.trim())
            })
            .collect();
        let entries: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                format!(
                    r#"{{"name": "{}", "similarity": {:.2}}}"#,
                    name,
                    1.0 / (i as f64 + 1.0)
                )
            })
            .collect();
        format!("[{}]", entries.join(", "))
    }

    fn integration_response(prompt: &str) -> String {
        let feature = prompt
            .lines()
            .find_map(|l| l.strip_prefix(prompts::FEATURE_MARKER))
            .map(str::trim)
            .unwrap_or("feature");
        format!(
            "```filename: scripts/{feature}.py\n#!/usr/bin/env python3\n\"\"\"{feature} (dry run).\"\"\"\n\n\ndef {feature}(input_file, output_file=None):\n    return output_file or input_file\n```\n"
        )
    }

    fn rewrite_response() -> String {
        "```python\n#!/usr/bin/env python3\nimport sys\n\n\ndef main():\n    for chunk in iter(lambda: sys.stdin.buffer.read(65536), b\"\"):\n        sys.stdout.buffer.write(chunk)\n\n\nif __name__ == \"__main__\":\n    main()\n```".to_string()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let prompt = request.user_prompt();
        if prompt.contains(prompts::RANKING_MARKER) {
            Ok(Self::ranking_response(prompt))
        } else if prompt.contains(prompts::FEATURE_MARKER) {
            Ok(Self::integration_response(prompt))
        } else if prompt.contains(prompts::ORIGINAL_CODE_MARKER) {
            Ok(Self::rewrite_response())
        } else {
            Ok("Mock response".to_string())
        }
    }
}
