//! Input-token estimation for `/v1/messages/count_tokens`.
//!
//! The upstream exposes no tokenizer, so the count is the conventional
//! chars/4 heuristic plus a small per-message framing overhead. Tool
//! definitions count through their serialized schema.

use crate::types::TokenCountRequest;

const CHARS_PER_TOKEN: usize = 4;
const PER_MESSAGE_OVERHEAD: usize = 3;

pub fn estimate_input_tokens(req: &TokenCountRequest) -> u32 {
    let mut chars = 0usize;
    let mut overhead = 0usize;

    if let Some(system) = &req.system {
        chars += system.to_plaintext().chars().count();
        overhead += PER_MESSAGE_OVERHEAD;
    }

    for msg in &req.messages {
        chars += msg.content.to_plaintext().chars().count();
        overhead += PER_MESSAGE_OVERHEAD;
    }

    for tool in req.tools.as_deref().unwrap_or_default() {
        chars += tool.name.len();
        if let Some(desc) = &tool.description {
            chars += desc.chars().count();
        }
        if let Some(schema) = &tool.input_schema {
            chars += schema.to_string().len();
        }
        overhead += PER_MESSAGE_OVERHEAD;
    }

    let estimate = chars / CHARS_PER_TOKEN + overhead;
    estimate.max(1) as u32
}
