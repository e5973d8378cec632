//! Upstream events → Anthropic SSE.
//!
//! The upstream interleaves text fragments, tool-call fragments and
//! bookkeeping events with no block structure; Anthropic clients expect a
//! strict sequence:
//!
//! ```text
//! message_start
//! ( content_block_start content_block_delta* content_block_stop )*
//! message_delta
//! message_stop
//! ```
//!
//! [`SseEmitter`] is the per-request state machine that imposes that
//! structure: it opens and closes text/tool blocks as event kinds change,
//! keeps block indices strictly increasing, and drops anything that arrives
//! after termination. Each returned string is one fully formatted SSE frame
//! (`event: <name>\ndata: <json>\n\n`) to be written and flushed as-is.
//!
//! [`ResponseAggregator`] folds the same event stream into a single
//! `MessagesResponse` for non-streaming requests.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::types::{ContentBlock, MessagesResponse, Role, Usage};
use kirogate_wire::event::{ContextUsageEvent, Event, ToolUseEvent};

/// The upstream does not report completion tokens; the wire-compatible
/// placeholder is 1.
pub const OUTPUT_TOKENS_PLACEHOLDER: u32 = 1;

/// Streaming state machine; one instance per request.
pub struct SseEmitter {
    model: String,
    message_id: String,
    context_window: u32,

    message_start_sent: bool,
    block_index: usize,
    text_open: bool,
    tool_open: bool,
    tool_id: String,
    tool_name: String,
    input_tokens: u32,
    terminated: bool,
}

impl SseEmitter {
    pub fn new(model: impl Into<String>, context_window: u32) -> Self {
        Self {
            model: model.into(),
            message_id: new_message_id(),
            context_window,
            message_start_sent: false,
            block_index: 0,
            text_open: false,
            tool_open: false,
            tool_id: String::new(),
            tool_name: String::new(),
            input_tokens: 0,
            terminated: false,
        }
    }

    /// Translate one upstream event into zero or more SSE frames.
    pub fn handle(&mut self, event: &Event) -> Vec<String> {
        if self.terminated {
            return Vec::new();
        }
        let mut out = Vec::new();

        match event {
            Event::ContextUsage(usage) => {
                self.update_input_tokens(usage);
                self.ensure_message_start(&mut out);
            }
            Event::AssistantResponse(ev) => {
                self.ensure_message_start(&mut out);
                if self.tool_open {
                    self.close_tool(&mut out);
                }
                if !ev.content.is_empty() {
                    if !self.text_open {
                        self.open_text(&mut out);
                    }
                    out.push(sse_event(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "text_delta", "text": ev.content}
                        }),
                    ));
                }
                if ev.is_completed() {
                    self.terminate("end_turn", &mut out);
                }
            }
            Event::ToolUse(ev) => {
                self.ensure_message_start(&mut out);
                if self.text_open {
                    self.close_text(&mut out);
                }
                if !self.tool_open {
                    self.open_tool(ev, &mut out);
                }
                if let Some(fragment) = input_fragment(ev) {
                    out.push(sse_event(
                        "content_block_delta",
                        &json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "input_json_delta", "partial_json": fragment}
                        }),
                    ));
                }
                if ev.stop {
                    self.terminate("tool_use", &mut out);
                }
            }
            Event::SessionEnd => {
                self.ensure_message_start(&mut out);
                self.terminate("end_turn", &mut out);
            }
            Event::Error { code, message } => {
                out.push(error_event(code, message));
                self.terminated = true;
            }
            Event::Exception { kind, message } => {
                out.push(error_event(kind, message));
                self.terminated = true;
            }
            Event::Metering
            | Event::SessionStart
            | Event::ToolCallRequest
            | Event::ToolCallError
            | Event::Unknown { .. } => {
                self.ensure_message_start(&mut out);
            }
        }

        out
    }

    /// Close out a stream whose upstream body ended without a terminator.
    pub fn finish(&mut self) -> Vec<String> {
        if self.terminated {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.ensure_message_start(&mut out);
        self.terminate("end_turn", &mut out);
        out
    }

    fn update_input_tokens(&mut self, usage: &ContextUsageEvent) {
        let window = f64::from(self.context_window);
        self.input_tokens =
            (usage.context_usage_percentage / 100.0 * window).round().max(0.0) as u32;
    }

    fn ensure_message_start(&mut self, out: &mut Vec<String>) {
        if self.message_start_sent {
            return;
        }
        self.message_start_sent = true;
        out.push(sse_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {
                        "input_tokens": self.input_tokens,
                        "output_tokens": OUTPUT_TOKENS_PLACEHOLDER
                    }
                }
            }),
        ));
    }

    fn open_text(&mut self, out: &mut Vec<String>) {
        self.text_open = true;
        out.push(sse_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": {"type": "text", "text": ""}
            }),
        ));
    }

    fn close_text(&mut self, out: &mut Vec<String>) {
        self.text_open = false;
        out.push(sse_event(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": self.block_index}),
        ));
        self.block_index += 1;
    }

    fn open_tool(&mut self, ev: &ToolUseEvent, out: &mut Vec<String>) {
        self.tool_open = true;
        self.tool_id = ev.tool_use_id.clone().unwrap_or_default();
        self.tool_name = ev.name.clone().unwrap_or_default();
        out.push(sse_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": {
                    "type": "tool_use",
                    "id": self.tool_id,
                    "name": self.tool_name,
                    "input": {}
                }
            }),
        ));
    }

    fn close_tool(&mut self, out: &mut Vec<String>) {
        self.tool_open = false;
        out.push(sse_event(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": self.block_index}),
        ));
        self.block_index += 1;
    }

    fn terminate(&mut self, stop_reason: &str, out: &mut Vec<String>) {
        if self.text_open {
            self.close_text(out);
        }
        if self.tool_open {
            self.close_tool(out);
        }
        out.push(sse_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {
                    "input_tokens": self.input_tokens,
                    "output_tokens": OUTPUT_TOKENS_PLACEHOLDER
                }
            }),
        ));
        out.push(sse_event("message_stop", &json!({"type": "message_stop"})));
        self.terminated = true;
    }
}

/// Serialize a tool-input chunk as a partial-JSON fragment.
///
/// The upstream sends either a structured object (first chunk) or string
/// fragments of the argument JSON; empty strings carry nothing.
fn input_fragment(ev: &ToolUseEvent) -> Option<String> {
    match ev.input.as_ref()? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => serde_json::to_string(other).ok(),
    }
}

fn sse_event(event: &str, data: &Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}

fn error_event(code: &str, message: &str) -> String {
    sse_event(
        "error",
        &json!({
            "type": "error",
            "error": {
                "type": "api_error",
                "message": format!("{code}: {message}")
            }
        }),
    )
}

fn new_message_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("msg_{}", &hex[..24])
}

struct PendingTool {
    id: String,
    name: String,
    fragments: String,
}

/// Folds an event stream into a single non-streaming response.
#[derive(Default)]
pub struct ResponseAggregator {
    context_window: u32,
    text: String,
    completed_tools: Vec<ContentBlock>,
    pending_tool: Option<PendingTool>,
    input_tokens: u32,
    failure: Option<(String, String)>,
}

impl ResponseAggregator {
    pub fn new(context_window: u32) -> Self {
        Self {
            context_window,
            ..Self::default()
        }
    }

    pub fn push(&mut self, event: &Event) {
        match event {
            Event::AssistantResponse(ev) => self.text.push_str(&ev.content),
            Event::ContextUsage(usage) => {
                let window = f64::from(self.context_window);
                self.input_tokens =
                    (usage.context_usage_percentage / 100.0 * window).round().max(0.0) as u32;
            }
            Event::ToolUse(ev) => {
                let pending = self.pending_tool.get_or_insert_with(|| PendingTool {
                    id: ev.tool_use_id.clone().unwrap_or_default(),
                    name: ev.name.clone().unwrap_or_default(),
                    fragments: String::new(),
                });
                if let Some(fragment) = input_fragment(ev) {
                    pending.fragments.push_str(&fragment);
                }
                if ev.stop {
                    if let Some(done) = self.pending_tool.take() {
                        let input = if done.fragments.is_empty() {
                            json!({})
                        } else {
                            serde_json::from_str(&done.fragments)
                                .unwrap_or_else(|_| json!({"raw": done.fragments}))
                        };
                        self.completed_tools.push(ContentBlock::ToolUse {
                            id: done.id,
                            name: done.name,
                            input,
                        });
                    }
                }
            }
            Event::Error { code, message } => {
                self.failure = Some((code.clone(), message.clone()));
            }
            Event::Exception { kind, message } => {
                self.failure = Some((kind.clone(), message.clone()));
            }
            Event::Metering
            | Event::SessionStart
            | Event::SessionEnd
            | Event::ToolCallRequest
            | Event::ToolCallError
            | Event::Unknown { .. } => {}
        }
    }

    pub fn finish(self, model: &str) -> Result<MessagesResponse, ApiError> {
        if let Some((code, message)) = self.failure {
            return Err(ApiError::Api(format!("{code}: {message}")));
        }

        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text {
                text: self.text,
            });
        }
        let any_tool = !self.completed_tools.is_empty();
        content.extend(self.completed_tools);

        Ok(MessagesResponse {
            id: new_message_id(),
            kind: "message".to_string(),
            role: Role::Assistant,
            content,
            model: model.to_string(),
            stop_reason: Some(if any_tool { "tool_use" } else { "end_turn" }.to_string()),
            stop_sequence: None,
            usage: Usage {
                input_tokens: self.input_tokens,
                output_tokens: OUTPUT_TOKENS_PLACEHOLDER,
            },
        })
    }
}
