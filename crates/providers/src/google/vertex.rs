use reply_core::llm::{ChatBackend, ChatError, ChatStream, GenerationRequest};
use reqwest::Client;
use tokio::time::Duration;
use tracing::info;

use crate::google::wire;

/// Vertex AI publisher-model client for a managed project.
#[derive(Clone)]
pub struct VertexClient {
    http: Client,
    base_url: String,
    project_id: String,
    location: String,
    token: String,
    idle: Duration,
    /// Grounded calls go through `v1beta1`, where the retrieval tools live.
    beta: bool,
}

impl VertexClient {
    pub fn new(
        http: Client,
        base_url: &str,
        project_id: String,
        location: String,
        token: String,
        idle: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            location,
            token,
            idle,
            beta: false,
        }
    }

    pub fn grounded(mut self) -> Self {
        self.beta = true;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/{}/projects/{}/locations/{}/publishers/google/models/{}:{}",
            self.base_url,
            if self.beta { "v1beta1" } else { "v1" },
            self.project_id,
            self.location,
            model,
            method
        )
    }
}

#[allow(async_fn_in_trait)]
impl ChatBackend for VertexClient {
    async fn start_conversation<'a>(
        &'a self,
        req: GenerationRequest,
    ) -> Result<ChatStream<'a>, ChatError> {
        let url = format!("{}?alt=sse", self.url(&req.model, "streamGenerateContent"));
        info!(target:"providers::vertex","start stream model={} grounded={}", req.model, self.beta);
        let body = wire::request_body(&req);
        let rb = self.http.post(url).bearer_auth(&self.token).json(&body);
        wire::open_stream(rb, self.idle, "vertex stream").await
    }

    async fn generate<'a>(&'a self, req: GenerationRequest) -> Result<ChatStream<'a>, ChatError> {
        let url = self.url(&req.model, "generateContent");
        info!(target:"providers::vertex","generate model={}", req.model);
        let body = wire::request_body(&req);
        let rb = self.http.post(url).bearer_auth(&self.token).json(&body);
        wire::one_shot(rb, "vertex generate").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grounded_calls_use_the_beta_surface() {
        let c = VertexClient::new(
            Client::new(),
            "https://us-central1-aiplatform.googleapis.com/",
            "proj".into(),
            "us-central1".into(),
            "tok".into(),
            Duration::from_secs(1),
        );
        assert_eq!(
            c.url("gemini-1.5-pro", "generateContent"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/proj/locations/us-central1/publishers/google/models/gemini-1.5-pro:generateContent"
        );
        let g = c.grounded();
        assert!(g.url("gemini-2.0-flash", "x").contains("/v1beta1/projects/proj/"));
    }
}
