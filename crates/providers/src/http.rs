use reply_core::ChatError;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::google::config::GoogleConfig;

pub fn build_client(cfg: &GoogleConfig) -> anyhow::Result<Client> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(2)
        .connect_timeout(cfg.timeout);
    if let Some(p) = &cfg.proxy {
        builder = builder.proxy(reqwest::Proxy::all(p)?);
    }
    Ok(builder.build()?)
}

pub fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else if e.is_decode() {
        ChatError::Decode(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}

/// Keeps the backend's own error message when the body carries one.
pub fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let body = body.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    let s = format!("{} {}", status.as_u16(), message);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(s),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(s),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ChatError::Network(s),
        StatusCode::NOT_FOUND => ChatError::Protocol(s),
        _ => ChatError::Other(s),
    }
}
