use reply_core::llm::{AuthOptions, DispatchError};
use reply_core::profile::ModelProfile;
use reply_core::select::BackendKind;
use reqwest::Client;
use tracing::debug;

use crate::google::config::GoogleConfig;
use crate::google::genai::GenAiClient;
use crate::google::imagen::ImagenClient;
use crate::google::vertex::VertexClient;

/// A constructed backend. Everything downstream matches on this value and
/// never looks at the model name again.
pub enum BackendHandle {
    Grounded(VertexClient),
    Image {
        client: ImagenClient,
        auth_header: String,
    },
    ManagedChat(VertexClient),
    KeyedChat(GenAiClient),
}

impl BackendHandle {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendHandle::Grounded(_) => BackendKind::Grounded,
            BackendHandle::Image { .. } => BackendKind::Image,
            BackendHandle::ManagedChat(_) => BackendKind::ManagedChat,
            BackendHandle::KeyedChat(_) => BackendKind::KeyedChat,
        }
    }
}

/// Builds backends from the provider config plus the credentials a request
/// carries. No network traffic happens here.
pub struct BackendSelector<'a> {
    cfg: &'a GoogleConfig,
    http: &'a Client,
}

struct Managed {
    project_id: String,
    token: String,
}

impl<'a> BackendSelector<'a> {
    pub fn new(cfg: &'a GoogleConfig, http: &'a Client) -> Self {
        Self { cfg, http }
    }

    /// True when a managed project is known for this request.
    pub fn has_managed_project(&self, auth: &AuthOptions) -> bool {
        auth.project_id.is_some() || self.cfg.project_id.is_some()
    }

    fn managed(&self, auth: &AuthOptions, kind: BackendKind) -> Result<Managed, DispatchError> {
        let project_id = auth
            .project_id
            .clone()
            .or_else(|| self.cfg.project_id.clone())
            .ok_or_else(|| {
                DispatchError::BackendUnavailable(format!("{:?} backend needs a project id", kind))
            })?;
        let token = auth
            .access_token
            .clone()
            .or_else(|| self.cfg.access_token.clone())
            .ok_or_else(|| {
                DispatchError::BackendUnavailable(format!("{:?} backend needs an access token", kind))
            })?;
        Ok(Managed { project_id, token })
    }

    fn vertex(&self, m: Managed) -> VertexClient {
        VertexClient::new(
            self.http.clone(),
            &self.cfg.vertex_base_url(),
            m.project_id,
            self.cfg.location.clone(),
            m.token,
            self.cfg.stream_idle_timeout,
        )
    }

    pub fn select(
        &self,
        kind: BackendKind,
        profile: &ModelProfile,
        auth: &AuthOptions,
    ) -> Result<BackendHandle, DispatchError> {
        debug!(target:"selector","build {:?} backend model={}", kind, profile.model_id);
        let handle = match kind {
            BackendKind::Grounded => BackendHandle::Grounded(self.vertex(self.managed(auth, kind)?).grounded()),
            BackendKind::ManagedChat => BackendHandle::ManagedChat(self.vertex(self.managed(auth, kind)?)),
            BackendKind::Image => {
                let m = self.managed(auth, kind)?;
                BackendHandle::Image {
                    client: ImagenClient::new(
                        self.http.clone(),
                        &self.cfg.vertex_base_url(),
                        &m.project_id,
                        &self.cfg.location,
                        &profile.model_id,
                    ),
                    auth_header: format!("Bearer {}", m.token),
                }
            }
            BackendKind::KeyedChat => {
                let key = self.cfg.api_key.clone().ok_or_else(|| {
                    DispatchError::BackendUnavailable("no API key configured".into())
                })?;
                BackendHandle::KeyedChat(GenAiClient::new(
                    self.http.clone(),
                    &self.cfg.genai_base_url,
                    key,
                    self.cfg.stream_idle_timeout,
                ))
            }
        };
        Ok(handle)
    }
}
