use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::llm::{ChatDelta, ChatError, StreamEvent};
use crate::settings::{DispatchSettings, Marker};

/// What a drained stream leaves behind besides the callbacks.
#[derive(Clone, Debug, Default)]
pub struct PacedReply {
    pub text: String,
    /// Last grounding metadata object the backend reported, if any.
    pub grounding: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
    pub fragments: usize,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

pub struct StreamPacer<'a> {
    settings: &'a DispatchSettings,
}

impl<'a> StreamPacer<'a> {
    pub fn new(settings: &'a DispatchSettings) -> Self {
        Self { settings }
    }

    /// Inter-fragment delay for one call. A non-zero rate wins; zero falls
    /// back to the per-model default.
    pub fn delay_for(&self, model: &str, stream_rate_ms: Option<u64>) -> Duration {
        let d = &self.settings.delays;
        let rules = &self.settings.rules;
        let ms = match stream_rate_ms.filter(|ms| *ms > 0) {
            Some(ms) => ms,
            None if rules.has(model, Marker::Generative) => d.generative_ms,
            None if rules.has(model, Marker::Flash) => d.flash_ms,
            None => d.default_ms,
        };
        Duration::from_millis(ms)
    }

    /// Drains `source`, reporting each text fragment to `on_fragment` and
    /// waiting `delay` before pulling the next one. A backend error ends the
    /// stream and no partial text is returned.
    pub async fn pace<S, F>(
        &self,
        source: S,
        mut on_fragment: F,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<PacedReply, ChatError>
    where
        S: Stream<Item = Result<ChatDelta, ChatError>>,
        F: FnMut(&StreamEvent),
    {
        let mut source = std::pin::pin!(source);
        let mut out = PacedReply::default();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Canceled),
                it = source.next() => it,
            };
            match item {
                Some(Ok(ChatDelta::Text(t))) => {
                    if t.is_empty() {
                        continue;
                    }
                    out.text.push_str(&t);
                    out.fragments += 1;
                    on_fragment(&StreamEvent {
                        text: t,
                        reply: out.text.clone(),
                    });
                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(ChatError::Canceled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Some(Ok(ChatDelta::Grounding(v))) => out.grounding = Some(v),
                Some(Ok(ChatDelta::Usage {
                    prompt_tokens,
                    completion_tokens,
                })) => {
                    out.prompt_tokens = prompt_tokens.or(out.prompt_tokens);
                    out.completion_tokens = completion_tokens.or(out.completion_tokens);
                }
                Some(Ok(ChatDelta::Finish(reason))) => {
                    out.finish_reason = reason;
                    break;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        debug!(target: "pacer", "stream done fragments={} chars={}", out.fragments, out.text.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::time::Instant;

    fn texts(items: &[&str]) -> Vec<Result<ChatDelta, ChatError>> {
        items.iter().map(|t| Ok(ChatDelta::Text(t.to_string()))).collect()
    }

    #[tokio::test]
    async fn forwards_each_fragment_in_order() {
        let settings = DispatchSettings::default();
        let pacer = StreamPacer::new(&settings);
        let mut seen = Vec::new();
        let out = pacer
            .pace(
                stream::iter(texts(&["a", "b", "c"])),
                |ev| seen.push(ev.clone()),
                Duration::ZERO,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.text, "abc");
        assert_eq!(out.fragments, 3);
        let frags: Vec<&str> = seen.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(frags, vec!["a", "b", "c"]);
        let replies: Vec<&str> = seen.iter().map(|e| e.reply.as_str()).collect();
        assert_eq!(replies, vec!["a", "ab", "abc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_fragments() {
        let settings = DispatchSettings::default();
        let pacer = StreamPacer::new(&settings);
        let start = Instant::now();
        pacer
            .pace(
                stream::iter(texts(&["x", "y", "z", "w"])),
                |_| {},
                Duration::from_millis(12),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(48));
    }

    #[tokio::test]
    async fn keeps_grounding_and_stops_at_finish() {
        let settings = DispatchSettings::default();
        let pacer = StreamPacer::new(&settings);
        let items = vec![
            Ok(ChatDelta::Text("hi".into())),
            Ok(ChatDelta::Grounding(serde_json::json!({"groundingChunks": []}))),
            Ok(ChatDelta::Usage {
                prompt_tokens: Some(3),
                completion_tokens: Some(1),
            }),
            Ok(ChatDelta::Finish(Some("STOP".into()))),
            Ok(ChatDelta::Text("ignored".into())),
        ];
        let out = pacer
            .pace(stream::iter(items), |_| {}, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.text, "hi");
        assert!(out.grounding.is_some());
        assert_eq!(out.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(out.prompt_tokens, Some(3));
    }

    #[tokio::test]
    async fn backend_error_discards_partial_text() {
        let settings = DispatchSettings::default();
        let pacer = StreamPacer::new(&settings);
        let items = vec![
            Ok(ChatDelta::Text("partial".into())),
            Err(ChatError::Network("reset".into())),
        ];
        let err = pacer
            .pace(stream::iter(items), |_| {}, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "network: reset");
    }

    #[tokio::test]
    async fn canceled_token_stops_the_stream() {
        let settings = DispatchSettings::default();
        let pacer = StreamPacer::new(&settings);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pacer
            .pace(stream::pending::<Result<ChatDelta, ChatError>>(), |_| {}, Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Canceled));
    }

    #[test]
    fn delay_precedence() {
        let settings = DispatchSettings::default();
        let pacer = StreamPacer::new(&settings);
        assert_eq!(pacer.delay_for("gemini-2.0-flash", Some(30)), Duration::from_millis(30));
        assert_eq!(pacer.delay_for("gemini-2.0-flash", Some(0)), Duration::from_millis(12));
        assert_eq!(pacer.delay_for("medlm-flash", Some(0)), Duration::from_millis(5));
        assert_eq!(pacer.delay_for("gemini-2.0-flash", None), Duration::from_millis(12));
        assert_eq!(pacer.delay_for("learnlm-1.5-pro", None), Duration::from_millis(12));
        assert_eq!(pacer.delay_for("medlm-flash", None), Duration::from_millis(5));
        assert_eq!(pacer.delay_for("medlm-large", None), Duration::from_millis(8));
    }
}
