//! Model catalog and Anthropic ↔ upstream model-id mapping.

use serde::Serialize;

/// One catalog entry.
///
/// `context_window` drives the input-token estimate derived from upstream
/// context-usage percentages; the upstream only reports a percentage, so the
/// window has to be a per-model parameter here.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub created_at: &'static str,
    pub upstream_id: &'static str,
    pub context_window: u32,
}

pub const DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

/// Models the gateway accepts at the public edge.
pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "claude-opus-4-5",
        display_name: "Claude Opus 4.5",
        created_at: "2025-11-24T00:00:00Z",
        upstream_id: "CLAUDE_OPUS_4_5_20251101_V1_0",
        context_window: DEFAULT_CONTEXT_WINDOW,
    },
    ModelSpec {
        id: "claude-sonnet-4-5",
        display_name: "Claude Sonnet 4.5",
        created_at: "2025-09-29T00:00:00Z",
        upstream_id: "CLAUDE_SONNET_4_5_20250929_V1_0",
        context_window: DEFAULT_CONTEXT_WINDOW,
    },
    ModelSpec {
        id: "claude-haiku-4-5",
        display_name: "Claude Haiku 4.5",
        created_at: "2025-10-15T00:00:00Z",
        upstream_id: "CLAUDE_HAIKU_4_5_20251001_V1_0",
        context_window: DEFAULT_CONTEXT_WINDOW,
    },
];

/// Exact catalog lookup, used by request validation and `GET /models/{id}`.
pub fn find(id: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.id == id)
}

/// Map a requested model name onto an upstream model.
///
/// Case-insensitive substring match on the family name; anything
/// unrecognized falls back to sonnet.
pub fn map_model(model: &str) -> &'static ModelSpec {
    let lower = model.to_lowercase();
    let family = if lower.contains("opus") {
        "opus"
    } else if lower.contains("haiku") {
        "haiku"
    } else {
        "sonnet"
    };
    MODELS
        .iter()
        .find(|m| m.id.contains(family))
        .unwrap_or(&MODELS[1])
}

/// Anthropic-style catalog entry for `GET /v1/models`.
#[derive(Debug, Serialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: &'static str,
    pub display_name: &'static str,
    pub created_at: &'static str,
}

impl From<&'static ModelSpec> for ModelInfo {
    fn from(spec: &'static ModelSpec) -> Self {
        Self {
            kind: "model",
            id: spec.id,
            display_name: spec.display_name,
            created_at: spec.created_at,
        }
    }
}

/// Anthropic-style list envelope for `GET /v1/models`.
#[derive(Debug, Serialize)]
pub struct ModelList {
    pub data: Vec<ModelInfo>,
    pub first_id: Option<&'static str>,
    pub last_id: Option<&'static str>,
    pub has_more: bool,
}

impl ModelList {
    pub fn catalog() -> Self {
        let data: Vec<ModelInfo> = MODELS.iter().map(ModelInfo::from).collect();
        Self {
            first_id: MODELS.first().map(|m| m.id),
            last_id: MODELS.last().map(|m| m.id),
            has_more: false,
            data,
        }
    }
}
