use directories::BaseDirs;
use reply_core::options::ClientOptions;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};
use url::Url;

pub const GENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_LOCATION: &str = "us-central1";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GoogleFileConfig {
    pub model: Option<String>,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub storage_bucket: Option<String>,
    /// Client options, same keys as `configure` takes.
    pub options: Option<ClientOptions>,
}

#[derive(Clone, Debug)]
pub struct GoogleConfig {
    pub api_key: Option<String>,
    pub project_id: Option<String>,
    pub location: String,
    /// Static token for managed backends when requests carry none.
    pub access_token: Option<String>,
    pub genai_base_url: String,
    /// Overrides `https://{location}-aiplatform.googleapis.com`.
    pub vertex_base_url: Option<String>,
    pub timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
    pub storage_bucket: Option<String>,
    pub options: ClientOptions,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            project_id: None,
            location: DEFAULT_LOCATION.to_string(),
            access_token: None,
            genai_base_url: GENAI_BASE_URL.to_string(),
            vertex_base_url: None,
            timeout: Duration::from_millis(30_000),
            stream_idle_timeout: Duration::from_millis(300_000),
            proxy: None,
            storage_bucket: None,
            options: ClientOptions::default(),
        }
    }
}

impl GoogleConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let mut cfg = GoogleConfig {
            api_key: env::var("GOOGLE_KEY")
                .or_else(|_| env::var("GOOGLE_API_KEY"))
                .ok(),
            project_id: env::var("GOOGLE_PROJECT_ID").ok(),
            access_token: env::var("GOOGLE_ACCESS_TOKEN").ok(),
            proxy: env::var("HTTPS_PROXY")
                .ok()
                .or_else(|| env::var("HTTP_PROXY").ok()),
            ..Default::default()
        };
        if let Ok(loc) = env::var("GOOGLE_LOC") {
            cfg.location = loc;
        }
        if let Ok(url) = env::var("GOOGLE_GENAI_BASE_URL") {
            cfg.genai_base_url = url;
        }
        cfg.vertex_base_url = env::var("GOOGLE_VERTEX_BASE_URL").ok();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                let text = fs::read_to_string(&path)?;
                let file_cfg: GoogleFileConfig = toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
                cfg.apply_file(file_cfg);
            }
        }

        if cfg.api_key.is_none() && cfg.project_id.is_none() {
            anyhow::bail!("set GOOGLE_KEY or GOOGLE_PROJECT_ID");
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// File values fill in what the environment left unset.
    pub fn apply_file(&mut self, file_cfg: GoogleFileConfig) {
        if let Some(opts) = file_cfg.options {
            self.options.merge(opts);
        }
        if let Some(m) = file_cfg.model {
            self.options.model_options.model.get_or_insert(m);
        }
        if self.project_id.is_none() {
            self.project_id = file_cfg.project_id;
        }
        if let Some(loc) = file_cfg.location {
            if env::var("GOOGLE_LOC").is_err() {
                self.location = loc;
            }
        }
        if let Some(t) = file_cfg.timeout_ms {
            self.timeout = Duration::from_millis(t);
        }
        if let Some(idle) = file_cfg.stream_idle_timeout_ms {
            self.stream_idle_timeout = Duration::from_millis(idle);
        }
        if file_cfg.storage_bucket.is_some() {
            self.storage_bucket = file_cfg.storage_bucket;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.genai_base_url)?;
        if let Some(u) = &self.vertex_base_url {
            Url::parse(u)?;
        }
        Ok(())
    }

    pub fn vertex_base_url(&self) -> String {
        match &self.vertex_base_url {
            Some(u) => u.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", self.location),
        }
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".goreply").join("config.toml")
        } else {
            base.config_dir().join("goreply").join("config.toml")
        };
        Some(p)
    }
}
