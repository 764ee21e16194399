use reply_core::llm::{ChatBackend, ChatError, ChatStream, GenerationRequest};
use reqwest::Client;
use tokio::time::Duration;
use tracing::info;

use crate::google::wire;

/// Generative Language API client authenticated with an API key.
#[derive(Clone)]
pub struct GenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    idle: Duration,
}

impl GenAiClient {
    pub fn new(http: Client, base_url: &str, api_key: String, idle: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            idle,
        }
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }
}

#[allow(async_fn_in_trait)]
impl ChatBackend for GenAiClient {
    async fn start_conversation<'a>(
        &'a self,
        req: GenerationRequest,
    ) -> Result<ChatStream<'a>, ChatError> {
        let url = format!("{}?alt=sse", self.url(&req.model, "streamGenerateContent"));
        info!(target:"providers::genai","start stream model={}", req.model);
        let body = wire::request_body(&req);
        let rb = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        wire::open_stream(rb, self.idle, "genai stream").await
    }

    async fn generate<'a>(&'a self, req: GenerationRequest) -> Result<ChatStream<'a>, ChatError> {
        let url = self.url(&req.model, "generateContent");
        info!(target:"providers::genai","generate model={}", req.model);
        let body = wire::request_body(&req);
        let rb = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        wire::one_shot(rb, "genai generate").await
    }
}
