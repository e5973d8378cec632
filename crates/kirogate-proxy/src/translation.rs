//! Anthropic request → upstream conversation-state conversion.
//!
//! The upstream has no separate system prompt, no free-form message list and
//! no tool-choice knob: everything rides in one `conversationState` whose
//! history must strictly alternate user/assistant. This module owns that
//! reshaping:
//!
//! - last user message → `currentMessage`, everything earlier → `history`
//! - system prompt → synthetic (user, assistant) pair at the head of history
//! - orphaned turns are padded with empty counterparts to keep alternation
//! - content blocks are split into text / images / tool results per role

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::kiro::{
    AssistantResponseMessage, ConversationState, CurrentMessage, HistoryEntry, ImageBlock,
    ImageSource as UpstreamImageSource, InputSchema, ToolResultText, ToolSpecification,
    UpstreamRequest, UpstreamTool, UpstreamToolResult, UpstreamToolUse, UserInputMessage,
    UserInputMessageContext, CHAT_TRIGGER_MANUAL, ORIGIN_AI_EDITOR,
};
use crate::models::ModelSpec;
use crate::types::{
    ContentBlock, ImageSource, Message, MessagesRequest, Role, Tool, ToolResultContent,
};

const ASSISTANT_ACK: &str = "I will follow these instructions.";
const IMAGE_IN_TOOL_RESULT: &str = "[Image content]";

/// Extracted user-side content.
#[derive(Debug, Default)]
struct UserContent {
    text: String,
    images: Vec<ImageBlock>,
    tool_results: Vec<UpstreamToolResult>,
}

/// Extracted assistant-side content.
#[derive(Debug, Default)]
struct AssistantContent {
    text: String,
    tool_uses: Vec<UpstreamToolUse>,
}

/// Convert a validated Anthropic request into the upstream shape.
pub fn to_upstream(req: &MessagesRequest, model: &ModelSpec) -> UpstreamRequest {
    let model_id = model.upstream_id.to_string();

    // The last user message becomes currentMessage; everything before it is
    // history. (Messages after a trailing assistant turn cannot exist in a
    // valid conversation, so the split point is the last user turn.)
    let current_index = req
        .messages
        .iter()
        .rposition(|m| m.role == Role::User);

    let mut history: Vec<HistoryEntry> = Vec::new();

    if let Some(system_text) = system_text(req) {
        history.push(HistoryEntry::User {
            user_input_message: UserInputMessage::text_only(system_text, model_id.clone()),
        });
        history.push(HistoryEntry::Assistant {
            assistant_response_message: AssistantResponseMessage {
                content: ASSISTANT_ACK.to_string(),
                tool_uses: Vec::new(),
            },
        });
    }

    let earlier = match current_index {
        Some(idx) => &req.messages[..idx],
        None => &req.messages[..],
    };
    for msg in earlier {
        push_paired(&mut history, msg, &model_id);
    }
    // Orphan trailing user turn gets an empty assistant reply.
    if history.len() % 2 == 1 {
        history.push(empty_assistant());
    }

    let current = match current_index {
        Some(idx) => extract_user_content(&req.messages[idx]),
        None => UserContent::default(),
    };

    let tools = convert_tools(req.tools.as_deref().unwrap_or_default());

    let context = UserInputMessageContext {
        tool_results: current.tool_results,
        tools,
    };

    let user_input_message = UserInputMessage {
        content: current.text,
        model_id,
        origin: ORIGIN_AI_EDITOR,
        images: current.images,
        user_input_message_context: (!context.is_empty()).then_some(context),
    };

    UpstreamRequest {
        conversation_state: ConversationState {
            conversation_id: Uuid::new_v4().to_string(),
            agent_continuation_id: Uuid::new_v4().to_string(),
            chat_trigger_type: CHAT_TRIGGER_MANUAL,
            current_message: CurrentMessage { user_input_message },
            history,
        },
    }
}

/// System text plus the extended-thinking directive, if either is present.
fn system_text(req: &MessagesRequest) -> Option<String> {
    let base = req
        .system
        .as_ref()
        .map(|s| s.to_plaintext())
        .filter(|s| !s.is_empty());

    let thinking = req
        .thinking
        .as_ref()
        .filter(|t| t.is_enabled())
        .map(|t| {
            format!(
                "<thinking_mode>enabled</thinking_mode>\n<max_thinking_length>{}</max_thinking_length>",
                t.budget_tokens.unwrap_or(0)
            )
        });

    match (base, thinking) {
        (Some(base), Some(thinking)) => Some(format!("{base}\n{thinking}")),
        (Some(base), None) => Some(base),
        (None, Some(thinking)) => Some(thinking),
        (None, None) => None,
    }
}

/// Append a history entry, padding with empty counterparts so the result
/// alternates user, assistant.
fn push_paired(history: &mut Vec<HistoryEntry>, msg: &Message, model_id: &str) {
    match msg.role {
        Role::User => {
            // An even length means a user entry is expected next.
            if history.len() % 2 == 1 {
                history.push(empty_assistant());
            }
            let content = extract_user_content(msg);
            let context = UserInputMessageContext {
                tool_results: content.tool_results,
                tools: Vec::new(),
            };
            history.push(HistoryEntry::User {
                user_input_message: UserInputMessage {
                    content: content.text,
                    model_id: model_id.to_string(),
                    origin: ORIGIN_AI_EDITOR,
                    images: content.images,
                    user_input_message_context: (!context.is_empty()).then_some(context),
                },
            });
        }
        Role::Assistant => {
            if history.len() % 2 == 0 {
                history.push(HistoryEntry::User {
                    user_input_message: UserInputMessage::text_only(
                        String::new(),
                        model_id.to_string(),
                    ),
                });
            }
            let content = extract_assistant_content(msg);
            history.push(HistoryEntry::Assistant {
                assistant_response_message: AssistantResponseMessage {
                    content: content.text,
                    tool_uses: content.tool_uses,
                },
            });
        }
    }
}

fn empty_assistant() -> HistoryEntry {
    HistoryEntry::Assistant {
        assistant_response_message: AssistantResponseMessage::default(),
    }
}

fn extract_user_content(msg: &Message) -> UserContent {
    let mut out = UserContent::default();
    let mut texts: Vec<String> = Vec::new();

    for block in msg.content.as_blocks() {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::Image { source } => {
                // Only inline data can ride upstream; URL sources are dropped.
                if let ImageSource::Base64 { media_type, data } = source {
                    out.images.push(ImageBlock {
                        format: media_type
                            .strip_prefix("image/")
                            .unwrap_or(&media_type)
                            .to_string(),
                        source: UpstreamImageSource { bytes: data },
                    });
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                out.tool_results.push(UpstreamToolResult {
                    tool_use_id,
                    content: tool_result_texts(&content),
                    is_error: is_error.unwrap_or(false),
                });
            }
            // Tool-use and thinking blocks do not occur in user turns.
            ContentBlock::ToolUse { .. } | ContentBlock::Thinking { .. } => {}
        }
    }

    out.text = texts.join("\n");
    out
}

fn tool_result_texts(content: &ToolResultContent) -> Vec<ToolResultText> {
    match content {
        ToolResultContent::String(s) => vec![ToolResultText { text: s.clone() }],
        ToolResultContent::Blocks(blocks) => blocks
            .iter()
            .map(|b| ToolResultText {
                text: match b {
                    ContentBlock::Image { .. } => IMAGE_IN_TOOL_RESULT.to_string(),
                    other => other.to_plaintext(),
                },
            })
            .collect(),
    }
}

fn extract_assistant_content(msg: &Message) -> AssistantContent {
    let mut out = AssistantContent::default();
    let mut texts: Vec<String> = Vec::new();

    for block in msg.content.as_blocks() {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                out.tool_uses.push(UpstreamToolUse {
                    tool_use_id: id,
                    name,
                    input,
                });
            }
            _ => {}
        }
    }

    out.text = texts.join("\n");
    out
}

/// Convert custom tools to upstream tool specifications.
///
/// Web-search variants are filtered: the upstream has its own search tool
/// and rejects shadowed names.
fn convert_tools(tools: &[Tool]) -> Vec<UpstreamTool> {
    tools
        .iter()
        .filter(|t| t.is_custom())
        .filter(|t| {
            let lower = t.name.to_lowercase();
            lower != "web_search" && lower != "websearch"
        })
        .map(|t| UpstreamTool {
            tool_specification: ToolSpecification {
                name: t.name.clone(),
                description: t.description.clone().unwrap_or_default(),
                input_schema: InputSchema {
                    json: sanitize_tool_schema(t.input_schema.as_ref()),
                },
            },
        })
        .collect()
}

/// Keep the schema keys the upstream validates (`type`, `properties`,
/// `required`); everything else — notably `additionalProperties` — is
/// dropped.
fn sanitize_tool_schema(schema: Option<&Value>) -> Value {
    let mut out = Map::new();
    if let Some(Value::Object(obj)) = schema {
        for key in ["type", "properties", "required"] {
            if let Some(v) = obj.get(key) {
                out.insert(key.to_string(), v.clone());
            }
        }
    }
    if !out.contains_key("type") {
        out.insert("type".to_string(), json!("object"));
    }
    Value::Object(out)
}
