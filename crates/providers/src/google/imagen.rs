use reply_core::llm::{ChatError, GeneratedImage, ImageBackend, ImageReply, ImageRequest};
use reply_core::settings::{GENERATED_IMAGES_PATH, PRIVATE_STORAGE_SCHEME};
use reqwest::{header, Client};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::http::{map_reqwest_err, map_status_err};

/// Imagen `:predict` client on Vertex AI.
#[derive(Clone)]
pub struct ImagenClient {
    http: Client,
    url: String,
}

impl ImagenClient {
    pub fn new(http: Client, base_url: &str, project_id: &str, location: &str, model: &str) -> Self {
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            base_url.trim_end_matches('/'),
            project_id,
            location,
            model
        );
        Self { http, url }
    }
}

pub fn predict_body(req: &ImageRequest) -> Value {
    let p = &req.params;
    let mut params = Map::new();
    if let Some(n) = p.vision_results {
        params.insert("sampleCount".into(), json!(n));
    }
    params.insert("addWatermark".into(), json!(true));
    if let Some(r) = &p.aspect_ratio {
        params.insert("aspectRatio".into(), json!(r));
    }
    params.insert(
        "safetyFilterLevel".into(),
        json!("block_medium_and_above"),
    );
    if let Some(s) = &p.vision_safety {
        params.insert("personGeneration".into(), json!(s));
    }
    if let Some(n) = &p.negative_prompt {
        params.insert("negativePrompt".into(), json!(n));
    }
    if let Some(u) = &req.storage_uri {
        params.insert("storageUri".into(), json!(u));
    }
    json!({
        "instances": [ { "prompt": req.prompt } ],
        "parameters": params,
    })
}

/// `gs://<bucket>/generatedImages/<user>/`
pub fn storage_uri(bucket: &str, user: Option<&str>) -> String {
    let mut uri = format!("{}{}/{}/", PRIVATE_STORAGE_SCHEME, bucket, GENERATED_IMAGES_PATH);
    if let Some(u) = user.filter(|u| !u.is_empty()) {
        uri.push_str(u);
        uri.push('/');
    }
    uri
}

/// Turns a predict response into images with fresh file ids.
pub fn format_images(v: &Value) -> Result<ImageReply, ChatError> {
    let preds = v["predictions"]
        .as_array()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ChatError::Protocol("no images returned".into()))?;
    let mut reply = ImageReply::default();
    for p in preds {
        let data = p["bytesBase64Encoded"].as_str().map(str::to_string);
        let uri = p["gcsUri"].as_str().map(str::to_string);
        if data.is_none() && uri.is_none() {
            continue;
        }
        let file_id = Uuid::new_v4().to_string();
        reply.file_ids.push(file_id.clone());
        reply.images.push(GeneratedImage {
            file_id,
            mime_type: p["mimeType"].as_str().unwrap_or("image/png").to_string(),
            data,
            uri,
        });
    }
    if reply.images.is_empty() {
        return Err(ChatError::Protocol("no images returned".into()));
    }
    Ok(reply)
}

#[allow(async_fn_in_trait)]
impl ImageBackend for ImagenClient {
    async fn generate_images(
        &self,
        req: &ImageRequest,
        auth_header: &str,
    ) -> Result<Value, ChatError> {
        info!(target:"providers::imagen","predict model={} url={}", req.model, self.url);
        let body = predict_body(req);
        debug!(target:"providers::imagen","predict payload={}", body);
        let resp = self
            .http
            .post(&self.url)
            .header(header::AUTHORIZATION, auth_header)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::imagen","predict non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        resp.json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))
    }
}
