use serde::{Deserialize, Serialize};

use crate::budget::BudgetOptions;
use crate::grounding::GroundingOption;
use crate::llm::{SafetySetting, VisionParams};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl ModelOptions {
    /// Key-by-key overlay: keys set in `other` win, the rest stay.
    pub fn merge(&mut self, other: ModelOptions) {
        let ModelOptions {
            model,
            temperature,
            top_p,
            top_k,
            max_output_tokens,
            stop,
        } = other;
        if model.is_some() {
            self.model = model;
        }
        if temperature.is_some() {
            self.temperature = temperature;
        }
        if top_p.is_some() {
            self.top_p = top_p;
        }
        if top_k.is_some() {
            self.top_k = top_k;
        }
        if max_output_tokens.is_some() {
            self.max_output_tokens = max_output_tokens;
        }
        if stop.is_some() {
            self.stop = stop;
        }
    }
}

/// Options object accepted by `configure`. Every field is optional so a
/// partial update can be layered over earlier calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    #[serde(default)]
    pub model_options: ModelOptions,
    pub max_context_tokens: Option<u32>,
    pub max_prompt_tokens: Option<u32>,
    /// Inter-fragment delay in milliseconds. Zero means the model default.
    pub stream_rate: Option<u64>,
    pub prompt_prefix: Option<String>,
    pub artifacts_prompt: Option<String>,
    pub vision_model: Option<String>,
    pub grounding_option: Option<GroundingOption>,
    pub grounding_path: Option<String>,
    pub is_grounded: Option<bool>,
    pub title_model: Option<String>,
    /// Models the deployment offers; gates the vision rewrite.
    pub models_config: Option<Vec<String>>,
    pub vision: Option<VisionParams>,
    pub safety_settings: Option<Vec<SafetySetting>>,
    /// Replace the stored options wholesale instead of merging.
    #[serde(default)]
    pub replace_options: bool,
}

impl ClientOptions {
    pub fn merge(&mut self, other: ClientOptions) {
        if other.replace_options {
            *self = ClientOptions {
                replace_options: false,
                ..other
            };
            return;
        }
        let ClientOptions {
            model_options,
            max_context_tokens,
            max_prompt_tokens,
            stream_rate,
            prompt_prefix,
            artifacts_prompt,
            vision_model,
            grounding_option,
            grounding_path,
            is_grounded,
            title_model,
            models_config,
            vision,
            safety_settings,
            replace_options: _,
        } = other;
        self.model_options.merge(model_options);
        macro_rules! overlay {
            ($($f:ident),*) => {$(
                if $f.is_some() {
                    self.$f = $f;
                }
            )*};
        }
        overlay!(
            max_context_tokens,
            max_prompt_tokens,
            stream_rate,
            prompt_prefix,
            artifacts_prompt,
            vision_model,
            grounding_option,
            grounding_path,
            is_grounded,
            title_model,
            models_config,
            vision,
            safety_settings
        );
    }

    pub fn model(&self) -> &str {
        self.model_options.model.as_deref().unwrap_or_default()
    }

    /// Prompt prefix followed by the artifacts instructions, trimmed.
    pub fn system_prompt(&self) -> String {
        let prefix = self.prompt_prefix.as_deref().unwrap_or_default().trim();
        match self.artifacts_prompt.as_deref() {
            Some(a) if !a.is_empty() => format!("{}\n{}", prefix, a).trim().to_string(),
            _ => prefix.to_string(),
        }
    }

    pub fn budget_options(&self) -> BudgetOptions {
        BudgetOptions {
            model: self.model().to_string(),
            max_context_tokens: self.max_context_tokens,
            max_prompt_tokens: self.max_prompt_tokens,
            max_output_tokens: self.model_options.max_output_tokens,
        }
    }

    pub fn grounding(&self) -> GroundingOption {
        self.grounding_option.unwrap_or_default()
    }
}
