//! Anthropic Messages API backend (streaming).

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{EventStream, ModelBackend, Role, StreamEvent, ToolSpec, Turn};
use crate::{Error, Result};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build(self) -> AnthropicBackend {
        AnthropicBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
        }
    }
}

/// Anthropic API backend speaking the streaming Messages endpoint.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicBackend {
    pub fn builder(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(api_key, model)
    }

    fn turn_to_api(turn: &Turn) -> ApiMessage {
        ApiMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: turn.content.clone(),
        }
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool {
        ApiTool {
            name: spec.name.clone(),
            description: spec.description.clone(),
            input_schema: spec.input_schema.clone(),
        }
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({})", self.model)
    }
}

impl ModelBackend for AnthropicBackend {
    async fn open_stream(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<EventStream> {
        let api_request = ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: turns.iter().map(Self::turn_to_api).collect(),
            tools: tools.iter().map(Self::tool_to_api).collect(),
            stream: true,
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .header("x-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let state = SseState {
            response,
            parser: SseParser::default(),
        };

        let stream = futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.parser.pending.pop_front() {
                    return Ok(Some((event, state)));
                }
                match state.response.chunk().await {
                    Ok(Some(bytes)) => state.parser.feed(&bytes)?,
                    Ok(None) => return Ok(None),
                    Err(e) => return Err(Error::Network(e.to_string())),
                }
            }
        });

        Ok(Box::pin(stream) as EventStream)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Parsing
// ─────────────────────────────────────────────────────────────────────────────

struct SseState {
    response: reqwest::Response,
    parser: SseParser,
}

/// Incremental SSE parser turning Anthropic wire events into [`StreamEvent`]s.
///
/// Chunk boundaries do not align with line boundaries, so a trailing partial
/// line is carried between feeds. Tool-use blocks arrive as a start event
/// plus a sequence of JSON argument fragments; they are accumulated and
/// emitted as one `ToolCall` when the block closes.
#[derive(Default)]
struct SseParser {
    partial_line: String,
    pending: VecDeque<StreamEvent>,
    tool_call: Option<ToolCallAccumulator>,
}

struct ToolCallAccumulator {
    name: String,
    input_json: String,
}

impl ToolCallAccumulator {
    fn finish(self) -> StreamEvent {
        let arguments = if self.input_json.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str::<Value>(&self.input_json)
                .unwrap_or_else(|_| serde_json::json!({ "raw": self.input_json }))
        };
        StreamEvent::ToolCall {
            name: self.name,
            arguments,
        }
    }
}

impl SseParser {
    fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(bytes);
        let combined = format!("{}{}", self.partial_line, text);

        let lines: Vec<&str> = combined.lines().collect();
        let complete = if combined.ends_with('\n') {
            lines.len()
        } else {
            lines.len().saturating_sub(1)
        };

        for line in lines.iter().take(complete) {
            // Skip blank separators, comments, and `event:` labels; the
            // payload type is repeated inside the data JSON.
            if let Some(data) = line.strip_prefix("data: ") {
                self.handle_data(data)?;
            }
        }

        self.partial_line = if combined.ends_with('\n') {
            String::new()
        } else {
            lines.last().copied().unwrap_or("").to_string()
        };

        Ok(())
    }

    fn handle_data(&mut self, data: &str) -> Result<()> {
        let Ok(json) = serde_json::from_str::<Value>(data) else {
            warn!(data, "ignoring unparseable SSE event");
            return Ok(());
        };

        let event_type = json.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match event_type {
            "message_start" => self.pending.push_back(StreamEvent::MessageStart),
            "content_block_start" => {
                let block = json.get("content_block");
                let block_type = block
                    .and_then(|b| b.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("");
                if block_type == "tool_use" {
                    let name = block
                        .and_then(|b| b.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or("")
                        .to_string();
                    self.tool_call = Some(ToolCallAccumulator {
                        name,
                        input_json: String::new(),
                    });
                }
                self.pending.push_back(StreamEvent::BlockStart);
            }
            "content_block_delta" => {
                let delta = json.get("delta");
                let delta_type = delta
                    .and_then(|d| d.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("");
                match delta_type {
                    "text_delta" => {
                        if let Some(text) = delta.and_then(|d| d.get("text")).and_then(|t| t.as_str())
                        {
                            self.pending
                                .push_back(StreamEvent::TextDelta(text.to_string()));
                        }
                    }
                    "input_json_delta" => {
                        if let Some(fragment) = delta
                            .and_then(|d| d.get("partial_json"))
                            .and_then(|p| p.as_str())
                        {
                            if let Some(accumulator) = &mut self.tool_call {
                                accumulator.input_json.push_str(fragment);
                            }
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => match self.tool_call.take() {
                Some(accumulator) => self.pending.push_back(accumulator.finish()),
                None => self.pending.push_back(StreamEvent::BlockStop),
            },
            "message_stop" => self.pending.push_back(StreamEvent::MessageStop),
            "message_delta" | "ping" => {}
            "error" => {
                let message = json
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown stream error");
                return Err(Error::Api(message.to_string()));
            }
            other => debug!(event_type = other, "ignoring SSE event"),
        }

        Ok(())
    }
}
