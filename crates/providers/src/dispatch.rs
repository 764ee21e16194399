use futures::StreamExt;
use reply_core::attachments::{Attachment, AttachmentEncoder, EncodeMode, InlineEncoder};
use reply_core::budget::{BudgetConfig, TokenBudgetManager};
use reply_core::grounding::{append_sources, GroundingOption};
use reply_core::llm::{
    AuthOptions, ChatBackend, ChatDelta, ChatError, ChatStream, ConversationRequest,
    DispatchError, GenerationConfig, GenerationRequest, ImageBackend, ImageReply, ImageRequest,
    Reply, Role, SafetySetting, SamplingParams, SearchTool, StreamEvent,
};
use reply_core::options::ClientOptions;
use reply_core::pacer::StreamPacer;
use reply_core::profile::{CallShape, Family, ModelProfileResolver};
use reply_core::select::{select_kind, BackendKind};
use reply_core::settings::DispatchSettings;
use reqwest::Client;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::google::config::GoogleConfig;
use crate::google::imagen::{format_images, storage_uri, ImagenClient};
use crate::http::build_client;
use crate::selector::{BackendHandle, BackendSelector};

/// Endpoint name handed to the attachment encoder.
const ENCODER_ENDPOINT: &str = "goreply";

pub type ProgressFn<'a> = Box<dyn FnMut(&StreamEvent) + Send + 'a>;

/// Per-call options for `get_reply` and `get_title`.
#[derive(Default)]
pub struct ReplyOptions<'a> {
    pub on_progress: Option<ProgressFn<'a>>,
    pub abort: CancellationToken,
    pub user: Option<String>,
    pub auth: AuthOptions,
}

/// Everything the chat path needs once the backend is chosen.
struct ChatCall<'r> {
    request: &'r ConversationRequest,
    attachments: &'r [Attachment],
    model: String,
    shape: CallShape,
    grounding: Option<GroundingOption>,
    tool: Option<SearchTool>,
    budget: BudgetConfig,
}

/// Single entry point for chat, grounded and image replies. Configuration is
/// mutated only through `configure*`; replies borrow the client immutably.
pub struct ModelDispatchClient {
    cfg: GoogleConfig,
    http: Client,
    settings: DispatchSettings,
    options: ClientOptions,
    budget: Option<BudgetConfig>,
    system_prompt: String,
    attachments: Vec<Attachment>,
    encoder: Arc<dyn AttachmentEncoder>,
}

impl ModelDispatchClient {
    pub fn new(cfg: GoogleConfig) -> anyhow::Result<Self> {
        Self::with_settings(cfg, DispatchSettings::default())
    }

    pub fn with_settings(cfg: GoogleConfig, settings: DispatchSettings) -> anyhow::Result<Self> {
        let http = build_client(&cfg)?;
        let options = cfg.options.clone();
        Ok(Self {
            cfg,
            http,
            settings,
            system_prompt: options.system_prompt(),
            options,
            budget: None,
            attachments: Vec::new(),
            encoder: Arc::new(InlineEncoder),
        })
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn AttachmentEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn budget(&self) -> Option<BudgetConfig> {
        self.budget
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Merges `options` over the current ones and recomputes the token
    /// budget. On error the previous configuration stays in place.
    pub fn configure(&mut self, options: ClientOptions) -> Result<(), DispatchError> {
        let mut next = self.options.clone();
        next.merge(options);
        self.commit(next, None)
    }

    /// Like `configure`, but waits for the attachments first and lets them
    /// switch the configured model to or from its vision variant.
    pub async fn configure_with_attachments<F>(
        &mut self,
        options: ClientOptions,
        attachments: F,
    ) -> Result<(), DispatchError>
    where
        F: IntoFuture<Output = Vec<Attachment>>,
    {
        let mut next = self.options.clone();
        next.merge(options);
        let attachments = attachments.await;
        let resolver = ModelProfileResolver::new(&self.settings.rules);
        let rewritten = resolver.rewrite_for_vision(
            next.model(),
            &attachments,
            next.models_config.as_deref(),
            self.vision_default(&next),
        );
        if let Some(m) = rewritten {
            info!(target:"dispatch","configured model {} -> {}", next.model(), m);
            next.model_options.model = Some(m);
        }
        self.commit(next, Some(attachments))
    }

    fn commit(
        &mut self,
        next: ClientOptions,
        attachments: Option<Vec<Attachment>>,
    ) -> Result<(), DispatchError> {
        if next.model().is_empty() {
            return Err(DispatchError::Configuration(
                "modelOptions.model is required".into(),
            ));
        }
        let budget = TokenBudgetManager::new(&self.settings).compute(&next.budget_options())?;
        debug!(
            target:"dispatch",
            "budget model={} context={} prompt={} response={}",
            next.model(),
            budget.max_context_tokens,
            budget.max_prompt_tokens,
            budget.max_response_tokens
        );
        self.system_prompt = next.system_prompt();
        self.options = next;
        self.budget = Some(budget);
        if let Some(a) = attachments {
            self.attachments = a;
        }
        Ok(())
    }

    fn vision_default<'s>(&'s self, opts: &'s ClientOptions) -> &'s str {
        opts.vision_model
            .as_deref()
            .unwrap_or(&self.settings.default_vision_model)
    }

    /// `None` when the request is not grounded. A grounded request without a
    /// usable option searches the web.
    fn grounding_for(&self, request: &ConversationRequest) -> Option<GroundingOption> {
        let grounded = match request.grounding {
            Some(g) => !g.is_off(),
            None => self.options.is_grounded.unwrap_or(false),
        };
        if !grounded {
            return None;
        }
        let option = request
            .grounding
            .filter(|g| !g.is_off())
            .or(self.options.grounding_option.filter(|g| !g.is_off()))
            .unwrap_or(GroundingOption::GoogleSearch);
        Some(option)
    }

    fn search_tool(
        &self,
        option: GroundingOption,
        model: &str,
        resolver: &ModelProfileResolver<'_>,
    ) -> Result<SearchTool, DispatchError> {
        Ok(match option {
            GroundingOption::VertexAiSearch => {
                let datastore = self
                    .options
                    .grounding_path
                    .clone()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        DispatchError::BackendUnavailable(
                            "Vertex AI Search needs groundingPath".into(),
                        )
                    })?;
                SearchTool::VertexAiSearch { datastore }
            }
            GroundingOption::EnterpriseWebSearch => SearchTool::EnterpriseWebSearch,
            GroundingOption::GoogleSearch | GroundingOption::Off => {
                if resolver.uses_older_search_tool(model) {
                    SearchTool::GoogleSearchRetrieval
                } else {
                    SearchTool::GoogleSearch
                }
            }
        })
    }

    /// Request-level system prompt, else the configured prefix.
    fn system_instruction(&self, request: &ConversationRequest) -> Option<String> {
        request
            .system_prompt
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| (!self.system_prompt.is_empty()).then(|| self.system_prompt.clone()))
    }

    fn safety_settings(&self, sampling: &SamplingParams) -> Vec<SafetySetting> {
        if !sampling.safety_settings.is_empty() {
            return sampling.safety_settings.clone();
        }
        self.options.safety_settings.clone().unwrap_or_default()
    }

    pub async fn get_reply(
        &self,
        request: ConversationRequest,
        opts: ReplyOptions<'_>,
    ) -> Result<Reply, DispatchError> {
        let budget = self
            .budget
            .ok_or_else(|| DispatchError::Configuration("client is not configured".into()))?;
        let ReplyOptions {
            on_progress,
            abort,
            user,
            auth,
        } = opts;

        let resolver = ModelProfileResolver::new(&self.settings.rules);
        let attachments: &[Attachment] = if request.attachments.is_empty() {
            &self.attachments
        } else {
            &request.attachments
        };
        let mut model = request
            .model
            .clone()
            .unwrap_or_else(|| self.options.model().to_string());
        let rewritten = resolver.rewrite_for_vision(
            &model,
            attachments,
            self.options.models_config.as_deref(),
            self.vision_default(&self.options),
        );
        if let Some(m) = rewritten {
            debug!(target:"dispatch","vision rewrite {} -> {}", model, m);
            model = m;
        }

        let selector = BackendSelector::new(&self.cfg, &self.http);
        let grounding = self.grounding_for(&request);
        let profile = resolver.resolve(&model, selector.has_managed_project(&auth));
        let kind = select_kind(&profile, grounding.is_some());
        debug!(
            target:"dispatch",
            "select model={} family={:?} managed={} grounding={:?} -> {:?}",
            model, profile.family, profile.uses_managed_backend, grounding, kind
        );
        let tool = match grounding {
            Some(g) => Some(self.search_tool(g, &model, &resolver)?),
            None => None,
        };
        let handle = selector.select(kind, &profile, &auth)?;

        let call = ChatCall {
            request: &request,
            attachments,
            // Retrieval tools are only offered on the streaming surface.
            shape: if kind == BackendKind::Grounded {
                CallShape::Incremental
            } else {
                profile.call_shape()
            },
            model,
            grounding,
            tool,
            budget,
        };
        match &handle {
            BackendHandle::Image {
                client,
                auth_header,
            } => self
                .image_reply(client, auth_header, &call, user.as_deref(), &abort)
                .await
                .map(Reply::Images),
            BackendHandle::Grounded(c) | BackendHandle::ManagedChat(c) => self
                .chat_reply(c, call, on_progress, &abort)
                .await
                .map(Reply::Text),
            BackendHandle::KeyedChat(c) => self
                .chat_reply(c, call, on_progress, &abort)
                .await
                .map(Reply::Text),
        }
    }

    async fn generation_request(&self, call: &ChatCall<'_>) -> Result<GenerationRequest, DispatchError> {
        let mut contents = call.request.turns.clone();
        if !call.attachments.is_empty() {
            let encoded = self
                .encoder
                .encode(call.request, call.attachments, ENCODER_ENDPOINT, EncodeMode::Inline)
                .await?;
            if let Some(last) = contents.iter_mut().rev().find(|t| t.role == Role::User) {
                last.parts.extend(encoded.image_parts);
            }
        }

        let mo = &self.options.model_options;
        let sampling = &call.request.sampling;
        // Stop sequences only travel with grounded calls.
        let stop_sequences = match call.grounding {
            Some(_) if !sampling.stop.is_empty() => sampling.stop.clone(),
            Some(_) => mo.stop.clone().unwrap_or_default(),
            None => Vec::new(),
        };
        let system_instruction = self.system_instruction(call.request);

        Ok(GenerationRequest {
            model: call.model.clone(),
            contents,
            system_instruction,
            config: GenerationConfig {
                temperature: sampling.temperature.or(mo.temperature),
                top_p: mo.top_p,
                top_k: mo.top_k,
                max_output_tokens: Some(call.budget.max_response_tokens),
                stop_sequences,
            },
            safety_settings: self.safety_settings(sampling),
            tools: call.tool.iter().cloned().collect(),
        })
    }

    async fn chat_reply<B: ChatBackend>(
        &self,
        backend: &B,
        call: ChatCall<'_>,
        mut on_progress: Option<ProgressFn<'_>>,
        abort: &CancellationToken,
    ) -> Result<String, DispatchError> {
        let req = self.generation_request(&call).await?;
        let stream = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(ChatError::Canceled.into()),
            s = open_chat(backend, call.shape, req) => s?,
        };

        let pacer = StreamPacer::new(&self.settings);
        let delay = pacer.delay_for(&call.model, self.options.stream_rate);
        let paced = pacer
            .pace(
                stream,
                |ev: &StreamEvent| {
                    if let Some(cb) = on_progress.as_mut() {
                        cb(ev);
                    }
                },
                delay,
                abort,
            )
            .await
            .map_err(|e| {
                error!(target:"dispatch","generation failed model={}: {}", call.model, e);
                e
            })?;

        let mut reply = paced.text;
        if let (Some(option), Some(meta)) = (call.grounding, paced.grounding.as_ref()) {
            append_sources(&mut reply, meta, option);
        }
        info!(
            target:"dispatch",
            "reply done model={} fragments={} finish={:?} prompt_tokens={:?} completion_tokens={:?}",
            call.model, paced.fragments, paced.finish_reason, paced.prompt_tokens, paced.completion_tokens
        );
        Ok(reply)
    }

    async fn image_reply(
        &self,
        client: &ImagenClient,
        auth_header: &str,
        call: &ChatCall<'_>,
        user: Option<&str>,
        abort: &CancellationToken,
    ) -> Result<ImageReply, DispatchError> {
        let req = ImageRequest {
            model: call.model.clone(),
            prompt: call.request.last_user_text().unwrap_or_default(),
            params: self.options.vision.clone().unwrap_or_default(),
            user: user.map(str::to_string),
            storage_uri: self
                .cfg
                .storage_bucket
                .as_deref()
                .map(|b| storage_uri(b, user)),
        };
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(ChatError::Canceled.into()),
            r = client.generate_images(&req, auth_header) => r,
        };
        result.and_then(|v| format_images(&v)).map_err(|e| {
            error!(target:"dispatch","image generation failed model={}: {}", call.model, e);
            DispatchError::Generation(ChatError::Other(format!(
                "Error occurred during image generation or upload to storage: {}",
                e
            )))
        })
    }

    /// Short non-streaming completion for a conversation title. Never
    /// grounded, capped output, bounded by the title timeout.
    pub async fn get_title(
        &self,
        request: &ConversationRequest,
        opts: ReplyOptions<'_>,
    ) -> Result<String, DispatchError> {
        let resolver = ModelProfileResolver::new(&self.settings.rules);
        let selector = BackendSelector::new(&self.cfg, &self.http);
        let managed = selector.has_managed_project(&opts.auth);

        let mut model = self
            .options
            .title_model
            .clone()
            .unwrap_or_else(|| self.options.model().to_string());
        if model.is_empty() {
            return Err(DispatchError::Configuration("no title model configured".into()));
        }
        let mut profile = resolver.resolve(&model, managed);
        if profile.family == Family::Image {
            model = self.settings.default_title_model.clone();
            profile = resolver.resolve(&model, managed);
        }
        let kind = select_kind(&profile, false);
        debug!(target:"dispatch","title model={} -> {:?}", model, kind);
        let handle = selector.select(kind, &profile, &opts.auth)?;

        let req = GenerationRequest {
            model,
            contents: request.turns.clone(),
            system_instruction: self.system_instruction(request),
            config: GenerationConfig {
                temperature: request
                    .sampling
                    .temperature
                    .or(self.options.model_options.temperature),
                max_output_tokens: Some(self.settings.title_output_tokens),
                ..Default::default()
            },
            safety_settings: self.safety_settings(&request.sampling),
            tools: Vec::new(),
        };

        let work = async {
            let text = match &handle {
                BackendHandle::Grounded(c) | BackendHandle::ManagedChat(c) => {
                    collect_text(c.generate(req).await?).await?
                }
                BackendHandle::KeyedChat(c) => collect_text(c.generate(req).await?).await?,
                BackendHandle::Image { .. } => {
                    return Err(DispatchError::BackendUnavailable(
                        "image models cannot generate titles".into(),
                    ))
                }
            };
            Ok::<String, DispatchError>(text)
        };
        let res = tokio::select! {
            biased;
            _ = opts.abort.cancelled() => return Err(ChatError::Canceled.into()),
            r = tokio::time::timeout(self.settings.title_timeout, work) => r,
        };
        let title = res.map_err(|_| DispatchError::from(ChatError::Timeout("title generation".into())))??;
        Ok(title.trim().to_string())
    }
}

async fn open_chat<'b, B: ChatBackend>(
    backend: &'b B,
    shape: CallShape,
    req: GenerationRequest,
) -> Result<ChatStream<'b>, ChatError> {
    match shape {
        CallShape::Incremental => backend.start_conversation(req).await,
        CallShape::OneShot => backend.generate(req).await,
    }
}

async fn collect_text(mut stream: ChatStream<'_>) -> Result<String, ChatError> {
    let mut out = String::new();
    while let Some(d) = stream.next().await {
        match d? {
            ChatDelta::Text(t) => out.push_str(&t),
            ChatDelta::Finish(_) => break,
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reply_core::llm::Turn;
    use reply_core::options::ModelOptions;

    fn client() -> ModelDispatchClient {
        let cfg = GoogleConfig {
            api_key: Some("k".into()),
            ..Default::default()
        };
        ModelDispatchClient::new(cfg).unwrap()
    }

    fn opts(model: &str) -> ClientOptions {
        ClientOptions {
            model_options: ModelOptions {
                model: Some(model.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn second_configure_keeps_other_model_options() {
        let mut c = client();
        c.configure(ClientOptions {
            model_options: ModelOptions {
                model: Some("gemini-2.0-flash".into()),
                temperature: Some(0.7),
                top_p: Some(0.9),
                top_k: Some(40),
                max_output_tokens: Some(2048),
                stop: None,
            },
            prompt_prefix: Some("Be helpful.".into()),
            ..Default::default()
        })
        .unwrap();
        c.configure(ClientOptions {
            model_options: ModelOptions {
                temperature: Some(0.2),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let mo = &c.options().model_options;
        assert_eq!(mo.model.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(mo.temperature, Some(0.2));
        assert_eq!(mo.top_p, Some(0.9));
        assert_eq!(mo.top_k, Some(40));
        assert_eq!(mo.max_output_tokens, Some(2048));
        assert_eq!(c.system_prompt(), "Be helpful.");
        assert_eq!(c.budget().unwrap().max_response_tokens, 2048);
    }

    #[test]
    fn failed_configure_keeps_previous_state() {
        let mut c = client();
        c.configure(opts("gemini-2.0-flash")).unwrap();
        let before = c.budget();
        let bad = ClientOptions {
            max_context_tokens: Some(1000),
            max_prompt_tokens: Some(900),
            model_options: ModelOptions {
                max_output_tokens: Some(200),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(c.configure(bad), Err(DispatchError::Configuration(_))));
        assert_eq!(c.budget(), before);
        assert_eq!(c.options().max_prompt_tokens, None);
    }

    #[test]
    fn image_model_configures_with_default_limits() {
        let mut c = client();
        c.configure(opts("imagen-3.0-generate-001")).unwrap();
        let b = c.budget().unwrap();
        assert_eq!(b.max_response_tokens, 8_192);
        assert!(b.max_prompt_tokens > 0);
    }

    #[test]
    fn configure_requires_a_model() {
        let mut c = client();
        assert!(matches!(
            c.configure(ClientOptions::default()),
            Err(DispatchError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn attachments_rewrite_the_configured_model() {
        let mut c = client();
        let mut o = opts("gemini-pro");
        o.models_config = Some(vec!["gemini-pro".into(), "gemini-pro-vision".into()]);
        let png = Attachment {
            mime_type: "image/png".into(),
            data: Some("AAA".into()),
            ..Default::default()
        };
        c.configure_with_attachments(o, async { vec![png] }).await.unwrap();
        assert_eq!(c.options().model(), "gemini-pro-vision");
    }

    #[test]
    fn grounding_follows_request_then_options() {
        let mut c = client();
        let mut o = opts("gemini-2.0-flash");
        o.is_grounded = Some(true);
        c.configure(o).unwrap();
        let mut req = ConversationRequest::from_turns(vec![Turn::user("hi")]);
        assert_eq!(c.grounding_for(&req), Some(GroundingOption::GoogleSearch));
        req.grounding = Some(GroundingOption::Off);
        assert_eq!(c.grounding_for(&req), None);
        req.grounding = Some(GroundingOption::EnterpriseWebSearch);
        assert_eq!(c.grounding_for(&req), Some(GroundingOption::EnterpriseWebSearch));
    }

    #[test]
    fn search_tool_name_depends_on_model_age() {
        let c = client();
        let r = ModelProfileResolver::new(&c.settings.rules);
        assert_eq!(
            c.search_tool(GroundingOption::GoogleSearch, "gemini-1.5-pro", &r).unwrap(),
            SearchTool::GoogleSearchRetrieval
        );
        assert_eq!(
            c.search_tool(GroundingOption::GoogleSearch, "gemini-2.0-flash", &r).unwrap(),
            SearchTool::GoogleSearch
        );
        assert!(matches!(
            c.search_tool(GroundingOption::VertexAiSearch, "gemini-2.0-flash", &r),
            Err(DispatchError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn stop_sequences_only_for_grounded_calls() {
        let mut c = client();
        c.configure(opts("gemini-2.0-flash")).unwrap();
        let mut req = ConversationRequest::from_turns(vec![Turn::user("hi")]);
        req.sampling.stop = vec!["END".into()];
        let mut call = ChatCall {
            request: &req,
            attachments: &[],
            model: "gemini-2.0-flash".into(),
            shape: CallShape::Incremental,
            grounding: None,
            tool: None,
            budget: c.budget().unwrap(),
        };
        let plain = c.generation_request(&call).await.unwrap();
        assert!(plain.config.stop_sequences.is_empty());
        assert!(plain.tools.is_empty());
        call.grounding = Some(GroundingOption::GoogleSearch);
        call.tool = Some(SearchTool::GoogleSearch);
        let grounded = c.generation_request(&call).await.unwrap();
        assert_eq!(grounded.config.stop_sequences, vec!["END".to_string()]);
        assert_eq!(grounded.tools, vec![SearchTool::GoogleSearch]);
    }

    #[tokio::test]
    async fn image_attachments_join_the_last_user_turn() {
        let mut c = client();
        c.configure(opts("gemini-2.0-flash")).unwrap();
        let req = ConversationRequest::from_turns(vec![
            Turn::user("first"),
            Turn::assistant("ok"),
            Turn::user("what is this"),
        ]);
        let atts = vec![Attachment {
            mime_type: "image/jpeg".into(),
            data: Some("BBB".into()),
            ..Default::default()
        }];
        let call = ChatCall {
            request: &req,
            attachments: &atts,
            model: "gemini-2.0-flash".into(),
            shape: CallShape::Incremental,
            grounding: None,
            tool: None,
            budget: c.budget().unwrap(),
        };
        let g = c.generation_request(&call).await.unwrap();
        assert_eq!(g.contents[0].parts.len(), 1);
        assert_eq!(g.contents[2].parts.len(), 2);
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_replies() {
        let c = client();
        let req = ConversationRequest::from_turns(vec![Turn::user("hi")]);
        assert!(matches!(
            c.get_reply(req, ReplyOptions::default()).await,
            Err(DispatchError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn aborted_before_start_is_canceled() {
        let mut c = client();
        c.configure(opts("gemini-2.0-flash")).unwrap();
        let abort = CancellationToken::new();
        abort.cancel();
        let req = ConversationRequest::from_turns(vec![Turn::user("hi")]);
        let res = c
            .get_reply(
                req,
                ReplyOptions {
                    abort,
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(res, Err(DispatchError::Generation(ChatError::Canceled))));
    }
}
