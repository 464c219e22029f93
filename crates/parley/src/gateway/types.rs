//! Provider wire types for `streamGenerateContent`.

use serde::{Deserialize, Serialize};

/// Default nucleus-sampling probability mass.
pub const DEFAULT_TOP_P: f64 = 0.95;
/// Default top-k sampling cutoff.
pub const DEFAULT_TOP_K: u32 = 50;

/// One inline binary payload, base64-encoded and tagged with a media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFile {
    pub mime_type: String,
    /// Base64-encoded file bytes.
    pub data: String,
}

/// Input to one provider call. The message text already includes any
/// conversation context the caller wants the model to see.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub message: String,
    /// Behavior-profile instruction string.
    pub instructions: Option<String>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    /// Inline attachments, placed before the text part of the prompt so
    /// the model has file context before the instruction.
    pub files: Vec<InlineFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineFile>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(file: InlineFile) -> Self {
        Self {
            text: None,
            inline_data: Some(file),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub top_p: f64,
    pub top_k: u32,
}

/// Request body for `models/{model}:streamGenerateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

/// One streamed response chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate's parts.
    pub fn fragment_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Build the provider request for a prompt. Inline files come before the
/// text part; sampling parameters fall back to the documented defaults.
pub fn build_generate_request(prompt: &Prompt) -> GenerateContentRequest {
    let mut parts = Vec::with_capacity(prompt.files.len() + 1);
    for file in &prompt.files {
        parts.push(Part::inline(file.clone()));
    }
    parts.push(Part::text(&prompt.message));

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        system_instruction: prompt.instructions.as_ref().map(|text| Content {
            role: None,
            parts: vec![Part::text(text)],
        }),
        generation_config: GenerationConfig {
            top_p: prompt.top_p.unwrap_or(DEFAULT_TOP_P),
            top_k: prompt.top_k.unwrap_or(DEFAULT_TOP_K),
        },
    }
}
