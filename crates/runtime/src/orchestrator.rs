//! Streaming conversation loop with tool dispatch.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::llm::{ModelBackend, StreamEvent, Turn};
use crate::registry::ConnectionRegistry;
use crate::{Error, Result};

/// Hard cap on tool rounds within one query, so a model that keeps calling
/// tools cannot spin forever.
pub const MAX_TOOL_ROUNDS: usize = 25;

/// Receiver for text as it streams in, ahead of the assembled transcript.
pub trait ProgressSink: Send {
    fn text_delta(&mut self, text: &str);
}

/// Sink that discards all progress output.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn text_delta(&mut self, _text: &str) {}
}

/// Adapter turning a closure into a [`ProgressSink`].
pub struct FnSink<F>(pub F);

impl<F: FnMut(&str) + Send> ProgressSink for FnSink<F> {
    fn text_delta(&mut self, text: &str) {
        (self.0)(text)
    }
}

/// Drives one query through the model, executing tool calls as they arrive.
///
/// The transcript interleaves model text with bracketed annotations marking
/// each tool invocation. Tool results are fed back as user turns and the
/// stream reopened; tool failures are annotated inline and the current
/// stream simply continues.
pub struct ConversationOrchestrator<B> {
    backend: B,
    catalog: ToolCatalog,
    max_tool_rounds: usize,
}

impl<B: ModelBackend> ConversationOrchestrator<B> {
    pub fn new(backend: B, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            backend,
            catalog: ToolCatalog::new(registry),
            max_tool_rounds: MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Run one query to completion and return the assembled transcript.
    ///
    /// Text deltas are forwarded to `sink` as they arrive.
    pub async fn process_query(&self, query: &str, sink: &mut dyn ProgressSink) -> Result<String> {
        let tools = self.catalog.build_model_tools().await;
        debug!(tools = tools.len(), "opening query stream");

        let mut turns = vec![Turn::user(query)];
        let mut stream = self.backend.open_stream(&turns, &tools).await?;

        let mut segments: Vec<String> = Vec::new();
        let mut block = String::new();
        let mut assistant_text = String::new();
        let mut rounds = 0usize;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::MessageStart | StreamEvent::BlockStart => {}
                StreamEvent::TextDelta(text) => {
                    sink.text_delta(&text);
                    block.push_str(&text);
                }
                StreamEvent::BlockStop | StreamEvent::MessageStop => {
                    flush_block(&mut block, &mut assistant_text, &mut segments);
                }
                StreamEvent::ToolCall { name, arguments } => {
                    rounds += 1;
                    if rounds > self.max_tool_rounds {
                        return Err(Error::ToolLoopExceeded(self.max_tool_rounds));
                    }

                    flush_block(&mut block, &mut assistant_text, &mut segments);

                    let key = match self.catalog.resolve(&name).await {
                        Ok(key) => key,
                        Err(e) => {
                            let (server, capability) =
                                name.split_once('_').unwrap_or((name.as_str(), ""));
                            let annotation =
                                format!("Error calling {server}.{capability}: {e}");
                            warn!(tool = %name, error = %e, "tool resolution failed");
                            sink.text_delta(&format!("\n{annotation}\n"));
                            segments.push(annotation);
                            continue;
                        }
                    };

                    // The text preceding this call becomes the assistant's
                    // turn for the follow-up request.
                    if !assistant_text.is_empty() {
                        turns.push(Turn::assistant(assistant_text.clone()));
                        assistant_text.clear();
                    }

                    info!(tool = %key, "dispatching tool call");
                    match self.catalog.invoke(&key, Some(arguments.clone())).await {
                        Ok(result) => {
                            let annotation =
                                format!("[Called {key} with args {arguments}]");
                            sink.text_delta(&format!("\n{annotation}\n"));
                            segments.push(annotation);

                            turns.push(Turn::user(result.render_text()));
                            stream = self.backend.open_stream(&turns, &[]).await?;
                        }
                        Err(e) => {
                            let annotation = format!("Error calling {key}: {e}");
                            warn!(tool = %key, error = %e, "tool invocation failed");
                            sink.text_delta(&format!("\n{annotation}\n"));
                            segments.push(annotation);
                        }
                    }
                }
            }
        }

        flush_block(&mut block, &mut assistant_text, &mut segments);
        Ok(segments.join("\n"))
    }
}

fn flush_block(block: &mut String, assistant_text: &mut String, segments: &mut Vec<String>) {
    if block.is_empty() {
        return;
    }
    assistant_text.push_str(block);
    segments.push(std::mem::take(block));
}
