use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

use crate::attachments::Attachment;
use crate::grounding::GroundingOption;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
    FileData { mime_type: String, file_uri: String },
}

impl Part {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(s.into())],
        }
    }
    pub fn assistant<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::Assistant,
            parts: vec![Part::Text(s.into())],
        }
    }
    pub fn system<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::System,
            parts: vec![Part::Text(s.into())],
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    pub fn is_blank(&self) -> bool {
        self.parts
            .iter()
            .all(|p| p.as_text().is_some_and(|t| t.trim().is_empty()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingParams {
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub safety_settings: Vec<SafetySetting>,
}

/// One conversation as handed to the client by the chat application.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    pub turns: Vec<Turn>,
    pub system_prompt: Option<String>,
    /// Overrides the configured model for this request only.
    pub model: Option<String>,
    pub grounding: Option<GroundingOption>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub sampling: SamplingParams,
}

impl ConversationRequest {
    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            ..Default::default()
        }
    }

    pub fn last_user_text(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(Turn::text)
    }
}

/// Partial output delivered to the progress callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEvent {
    pub text: String,
    pub reply: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
}

/// Retrieval or search tool attached to a grounded call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchTool {
    VertexAiSearch { datastore: String },
    GoogleSearch,
    GoogleSearchRetrieval,
    EnterpriseWebSearch,
}

/// Backend-ready request built by the dispatch client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub contents: Vec<Turn>,
    pub system_instruction: Option<String>,
    pub config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
    pub tools: Vec<SearchTool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisionParams {
    pub vision_results: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub vision_safety: Option<String>,
    pub negative_prompt: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub params: VisionParams,
    pub user: Option<String>,
    pub storage_uri: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub file_id: String,
    pub mime_type: String,
    /// Base64 image bytes when returned inline.
    pub data: Option<String>,
    /// Storage location when the backend wrote the image itself.
    pub uri: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReply {
    pub images: Vec<GeneratedImage>,
    pub file_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Text(String),
    Images(ImageReply),
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Text(t) => Some(t),
            Reply::Images(_) => None,
        }
    }
}

/// Credentials the request carries for managed-project backends.
#[derive(Clone, Debug, Default)]
pub struct AuthOptions {
    pub project_id: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Clone, Debug)]
pub enum ChatDelta {
    Text(String),
    Grounding(serde_json::Value),
    Finish(Option<String>),
    Usage { prompt_tokens: Option<u32>, completion_tokens: Option<u32> },
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("auth error: {0}")] Auth(String),
    #[error("rate limit: {0}")] RateLimit(String),
    #[error("timeout: {0}")] Timeout(String),
    #[error("network: {0}")] Network(String),
    #[error("decode: {0}")] Decode(String),
    #[error("protocol: {0}")] Protocol(String),
    #[error("canceled")] Canceled,
    #[error("other: {0}")] Other(String),
}

/// Errors surfaced by the dispatch client.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("generation failed: {0}")]
    Generation(#[from] ChatError),
}

pub type ChatStream<'a> = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send + 'a>>;

/// Chat capability shared by the keyed, managed and grounded backends.
#[allow(async_fn_in_trait)]
pub trait ChatBackend: Send + Sync {
    /// Incremental call; fragments arrive as the backend produces them.
    async fn start_conversation<'a>(
        &'a self,
        req: GenerationRequest,
    ) -> Result<ChatStream<'a>, ChatError>;

    /// One-shot call; the whole reply arrives as a single fragment.
    async fn generate<'a>(&'a self, req: GenerationRequest) -> Result<ChatStream<'a>, ChatError>;
}

#[allow(async_fn_in_trait)]
pub trait ImageBackend: Send + Sync {
    async fn generate_images(
        &self,
        req: &ImageRequest,
        auth_header: &str,
    ) -> Result<serde_json::Value, ChatError>;
}
