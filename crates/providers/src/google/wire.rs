//! JSON shapes shared by the Generative Language and Vertex AI endpoints.

use futures::StreamExt;
use reply_core::llm::{
    ChatDelta, ChatError, ChatStream, GenerationRequest, Part, Role, SearchTool, Turn,
};
use serde_json::{json, Map, Value};
use tokio::time::Duration;
use tracing::error;

use crate::http::{map_reqwest_err, map_status_err};
use crate::sse;

fn part_json(p: &Part) -> Value {
    match p {
        Part::Text(t) => json!({ "text": t }),
        Part::InlineData { mime_type, data } => {
            json!({ "inlineData": { "mimeType": mime_type, "data": data } })
        }
        Part::FileData {
            mime_type,
            file_uri,
        } => json!({ "fileData": { "mimeType": mime_type, "fileUri": file_uri } }),
    }
}

/// System turns become part of the system instruction; empty assistant
/// placeholders are dropped.
pub fn contents_json(turns: &[Turn]) -> (Vec<Value>, Vec<String>) {
    let mut contents = Vec::new();
    let mut system = Vec::new();
    for t in turns {
        let role = match t.role {
            Role::System => {
                let text = t.text();
                if !text.trim().is_empty() {
                    system.push(text);
                }
                continue;
            }
            Role::Assistant if t.is_blank() => continue,
            Role::Assistant => "model",
            Role::User => "user",
        };
        let parts: Vec<Value> = t.parts.iter().map(part_json).collect();
        contents.push(json!({ "role": role, "parts": parts }));
    }
    (contents, system)
}

pub fn tool_json(tool: &SearchTool) -> Value {
    match tool {
        SearchTool::VertexAiSearch { datastore } => json!({
            "retrieval": {
                "vertexAiSearch": { "datastore": datastore },
                "disableAttribution": false
            }
        }),
        SearchTool::GoogleSearch => json!({ "googleSearch": {} }),
        SearchTool::GoogleSearchRetrieval => json!({ "googleSearchRetrieval": {} }),
        SearchTool::EnterpriseWebSearch => json!({ "enterpriseWebSearch": {} }),
    }
}

pub fn request_body(req: &GenerationRequest) -> Value {
    let (contents, mut system) = contents_json(&req.contents);
    if let Some(s) = req.system_instruction.as_deref().filter(|s| !s.is_empty()) {
        system.insert(0, s.to_string());
    }

    let c = &req.config;
    let mut gen = Map::new();
    if let Some(t) = c.temperature {
        gen.insert("temperature".into(), json!(t));
    }
    if let Some(p) = c.top_p {
        gen.insert("topP".into(), json!(p));
    }
    if let Some(k) = c.top_k {
        gen.insert("topK".into(), json!(k));
    }
    if let Some(m) = c.max_output_tokens {
        gen.insert("maxOutputTokens".into(), json!(m));
    }
    if !c.stop_sequences.is_empty() {
        gen.insert("stopSequences".into(), json!(c.stop_sequences));
    }

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if !system.is_empty() {
        body.insert(
            "systemInstruction".into(),
            json!({ "parts": [ { "text": system.join("\n") } ] }),
        );
    }
    if !gen.is_empty() {
        body.insert("generationConfig".into(), Value::Object(gen));
    }
    if !req.safety_settings.is_empty() {
        body.insert("safetySettings".into(), json!(req.safety_settings));
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req.tools.iter().map(tool_json).collect();
        body.insert("tools".into(), Value::Array(tools));
    }
    Value::Object(body)
}

/// Deltas carried by one response object, finish reason last.
pub fn parse_chunk(v: &Value) -> Result<Vec<ChatDelta>, ChatError> {
    if let Some(msg) = v["error"]["message"].as_str() {
        return Err(ChatError::Protocol(msg.to_string()));
    }
    let mut out = Vec::new();
    let cand = &v["candidates"][0];
    if let Some(parts) = cand["content"]["parts"].as_array() {
        let text: String = parts
            .iter()
            .filter(|p| !p["thought"].as_bool().unwrap_or(false))
            .filter_map(|p| p["text"].as_str())
            .collect();
        if !text.is_empty() {
            out.push(ChatDelta::Text(text));
        }
    }
    if cand["groundingMetadata"].is_object() {
        out.push(ChatDelta::Grounding(cand["groundingMetadata"].clone()));
    }
    let usage = &v["usageMetadata"];
    if usage.is_object() {
        out.push(ChatDelta::Usage {
            prompt_tokens: usage["promptTokenCount"].as_u64().map(|n| n as u32),
            completion_tokens: usage["candidatesTokenCount"].as_u64().map(|n| n as u32),
        });
    }
    if let Some(reason) = cand["finishReason"].as_str() {
        out.push(ChatDelta::Finish(Some(reason.to_string())));
    }
    Ok(out)
}

async fn send_checked(
    req: reqwest::RequestBuilder,
    target: &'static str,
) -> Result<reqwest::Response, ChatError> {
    let resp = req.send().await.map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.ok();
        error!(target: "providers::google", "{} non-200 status={} body={:?}", target, status, body);
        return Err(map_status_err(status, body));
    }
    Ok(resp)
}

/// Sends a `streamGenerateContent?alt=sse` request. The finish reason is
/// held back and emitted once the body ends so trailing metadata is not cut
/// off.
pub async fn open_stream<'a>(
    req: reqwest::RequestBuilder,
    idle: Duration,
    target: &'static str,
) -> Result<ChatStream<'a>, ChatError> {
    let resp = send_checked(req, target).await?;
    let events = sse::data_events(resp, idle);
    let s = async_stream::try_stream! {
        let mut events = Box::pin(events);
        let mut finish: Option<String> = None;
        while let Some(ev) = events.next().await {
            let data = ev?;
            let v: Value = serde_json::from_str(&data).map_err(|e| ChatError::Decode(e.to_string()))?;
            for d in parse_chunk(&v)? {
                match d {
                    ChatDelta::Finish(r) => finish = r.or(finish.take()),
                    other => yield other,
                }
            }
        }
        yield ChatDelta::Finish(finish);
    };
    Ok(Box::pin(s))
}

/// Sends a `generateContent` request and replays the whole reply as one
/// fragment.
pub async fn one_shot<'a>(
    req: reqwest::RequestBuilder,
    target: &'static str,
) -> Result<ChatStream<'a>, ChatError> {
    let resp = send_checked(req, target).await?;
    let v: Value = resp
        .json()
        .await
        .map_err(|e| ChatError::Decode(e.to_string()))?;
    let deltas = parse_chunk(&v)?;
    let mut items: Vec<Result<ChatDelta, ChatError>> = Vec::with_capacity(deltas.len() + 1);
    let mut finish = None;
    for d in deltas {
        match d {
            ChatDelta::Finish(r) => finish = r,
            other => items.push(Ok(other)),
        }
    }
    items.push(Ok(ChatDelta::Finish(finish)));
    Ok(Box::pin(futures::stream::iter(items)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reply_core::llm::{GenerationConfig, SafetySetting};

    #[test]
    fn body_folds_system_turns_and_skips_placeholders() {
        let req = GenerationRequest {
            model: "gemini-2.0-flash".into(),
            contents: vec![
                Turn::system("context line"),
                Turn::user("hi"),
                Turn::assistant(""),
                Turn::assistant("hello"),
                Turn {
                    role: Role::User,
                    parts: vec![
                        Part::Text("what is this".into()),
                        Part::InlineData {
                            mime_type: "image/png".into(),
                            data: "AAA".into(),
                        },
                    ],
                },
            ],
            system_instruction: Some("be brief".into()),
            config: GenerationConfig {
                temperature: Some(0.5),
                max_output_tokens: Some(1024),
                ..Default::default()
            },
            safety_settings: vec![SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT".into(),
                threshold: "BLOCK_NONE".into(),
            }],
            tools: vec![],
        };
        let body = request_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief\ncontext line");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert!(body["generationConfig"].get("stopSequences").is_none());
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tool_shapes() {
        assert_eq!(
            tool_json(&SearchTool::VertexAiSearch {
                datastore: "projects/p/dataStores/d".into()
            }),
            json!({"retrieval": {"vertexAiSearch": {"datastore": "projects/p/dataStores/d"}, "disableAttribution": false}})
        );
        assert_eq!(tool_json(&SearchTool::GoogleSearch), json!({"googleSearch": {}}));
        assert_eq!(
            tool_json(&SearchTool::GoogleSearchRetrieval),
            json!({"googleSearchRetrieval": {}})
        );
        assert_eq!(
            tool_json(&SearchTool::EnterpriseWebSearch),
            json!({"enterpriseWebSearch": {}})
        );
    }

    #[test]
    fn chunk_yields_text_metadata_and_finish_in_order() {
        let v = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking", "thought": true},
                    {"text": "Hello"},
                    {"text": " there"}
                ]},
                "finishReason": "STOP",
                "groundingMetadata": {"groundingChunks": []}
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        });
        let d = parse_chunk(&v).unwrap();
        assert_eq!(d.len(), 4);
        assert!(matches!(&d[0], ChatDelta::Text(t) if t == "Hello there"));
        assert!(matches!(&d[1], ChatDelta::Grounding(_)));
        assert!(matches!(
            &d[2],
            ChatDelta::Usage { prompt_tokens: Some(4), completion_tokens: Some(2) }
        ));
        assert!(matches!(&d[3], ChatDelta::Finish(Some(r)) if r == "STOP"));
    }

    #[test]
    fn error_object_is_a_protocol_error() {
        let v = json!({"error": {"code": 400, "message": "bad stuff"}});
        assert!(matches!(parse_chunk(&v), Err(ChatError::Protocol(m)) if m == "bad stuff"));
    }
}
