//! Named defaults and the model classification table.
//!
//! Everything the resolver, budget manager and pacer key off lives here so a
//! caller can swap a table or a delay without touching dispatch logic.

use std::time::Duration;

pub const DEFAULT_STREAM_DELAY_MS: u64 = 8;
pub const GENERATIVE_MODEL_STREAM_DELAY_MS: u64 = 12;
pub const FLASH_MODEL_STREAM_DELAY_MS: u64 = 5;

/// Context windows above this size also count the output budget.
pub const LARGE_CONTEXT_THRESHOLD: u32 = 32_000;
pub const DEFAULT_CONTEXT_TOKENS: u32 = 32_768;
pub const MAX_OUTPUT_TOKENS: u32 = 8_192;
pub const TITLE_OUTPUT_TOKENS: u32 = 1_024;
pub const TITLE_TIMEOUT: Duration = Duration::from_secs(7);

pub const DEFAULT_VISION_MODEL: &str = "gemini-pro-vision";
pub const DEFAULT_TITLE_MODEL: &str = "gemini-2.0-flash";

pub const GROUNDING_SOURCES_HEADER: &str = "\n \n**Grounding Sources:** \n";
pub const PRIVATE_STORAGE_SCHEME: &str = "gs://";
pub const GENERATED_IMAGES_PATH: &str = "generatedImages";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Image generation model.
    Image,
    /// Older model served through the one-shot call shape.
    Legacy,
    /// Generative family model (slower pacing).
    Generative,
    /// Fast model (faster pacing).
    Flash,
    /// Accepts image parts.
    Vision,
    /// Needs the older web-search tool name.
    OlderSearch,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRule {
    pub pattern: String,
    pub marker: Marker,
}

impl ModelRule {
    pub fn new(pattern: impl Into<String>, marker: Marker) -> Self {
        Self {
            pattern: pattern.into(),
            marker,
        }
    }

    pub fn matches(&self, model: &str) -> bool {
        model.contains(self.pattern.as_str())
    }
}

/// Ordered pattern table. A model carries a marker when any rule for that
/// marker matches it as a substring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRules {
    rules: Vec<ModelRule>,
}

impl ModelRules {
    pub fn new(rules: Vec<ModelRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ModelRule] {
        &self.rules
    }

    pub fn has(&self, model: &str, marker: Marker) -> bool {
        self.rules
            .iter()
            .any(|r| r.marker == marker && r.matches(model))
    }

    /// Every marker the model carries, in table order, without repeats.
    pub fn markers(&self, model: &str) -> Vec<Marker> {
        let mut out = Vec::new();
        for r in &self.rules {
            if r.matches(model) && !out.contains(&r.marker) {
                out.push(r.marker);
            }
        }
        out
    }
}

impl Default for ModelRules {
    fn default() -> Self {
        use Marker::*;
        Self::new(vec![
            ModelRule::new("imagen", Image),
            ModelRule::new("imagegeneration", Image),
            ModelRule::new("gemini-1.0", Legacy),
            ModelRule::new("gemini-1-0", Legacy),
            ModelRule::new("gemini-pro", Legacy),
            ModelRule::new("gemini-1.5", Legacy),
            ModelRule::new("medlm", Legacy),
            ModelRule::new("gemini", Generative),
            ModelRule::new("learnlm", Generative),
            ModelRule::new("flash", Flash),
            ModelRule::new("vision", Vision),
            ModelRule::new("gemini-1.5", Vision),
            ModelRule::new("gemini-2", Vision),
            ModelRule::new("gemini-exp", Vision),
            ModelRule::new("gemini-1.5", OlderSearch),
            ModelRule::new("gemini-1.0", OlderSearch),
            ModelRule::new("medlm", OlderSearch),
        ])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDelays {
    pub default_ms: u64,
    pub generative_ms: u64,
    pub flash_ms: u64,
}

impl Default for StreamDelays {
    fn default() -> Self {
        Self {
            default_ms: DEFAULT_STREAM_DELAY_MS,
            generative_ms: GENERATIVE_MODEL_STREAM_DELAY_MS,
            flash_ms: FLASH_MODEL_STREAM_DELAY_MS,
        }
    }
}

/// Per-model default context window; first matching pattern wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    pub pattern: String,
    pub tokens: u32,
}

fn default_context_windows() -> Vec<ContextWindow> {
    [
        ("gemini-pro-vision", 12_288),
        ("gemini-2", 1_048_576),
        ("gemini-1.5", 1_048_576),
        ("gemini-exp", 2_000_000),
        ("gemini", 30_720),
        ("learnlm", 32_768),
        ("medlm", 32_768),
    ]
    .into_iter()
    .map(|(p, t)| ContextWindow {
        pattern: p.to_string(),
        tokens: t,
    })
    .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchSettings {
    pub rules: ModelRules,
    pub delays: StreamDelays,
    pub context_windows: Vec<ContextWindow>,
    pub default_context_tokens: u32,
    pub max_output_tokens: u32,
    pub title_output_tokens: u32,
    pub title_timeout: Duration,
    pub default_vision_model: String,
    pub default_title_model: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            rules: ModelRules::default(),
            delays: StreamDelays::default(),
            context_windows: default_context_windows(),
            default_context_tokens: DEFAULT_CONTEXT_TOKENS,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            title_output_tokens: TITLE_OUTPUT_TOKENS,
            title_timeout: TITLE_TIMEOUT,
            default_vision_model: DEFAULT_VISION_MODEL.to_string(),
            default_title_model: DEFAULT_TITLE_MODEL.to_string(),
        }
    }
}

impl DispatchSettings {
    pub fn context_tokens_for(&self, model: &str) -> u32 {
        self.context_windows
            .iter()
            .find(|w| model.contains(w.pattern.as_str()))
            .map(|w| w.tokens)
            .unwrap_or(self.default_context_tokens)
    }
}
