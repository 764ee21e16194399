use crate::llm::DispatchError;
use crate::settings::{DispatchSettings, LARGE_CONTEXT_THRESHOLD};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BudgetOptions {
    pub model: String,
    pub max_context_tokens: Option<u32>,
    pub max_prompt_tokens: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetConfig {
    pub max_context_tokens: u32,
    pub max_response_tokens: u32,
    pub max_prompt_tokens: u32,
}

pub struct TokenBudgetManager<'a> {
    settings: &'a DispatchSettings,
}

impl<'a> TokenBudgetManager<'a> {
    pub fn new(settings: &'a DispatchSettings) -> Self {
        Self { settings }
    }

    pub fn compute(&self, opts: &BudgetOptions) -> Result<BudgetConfig, DispatchError> {
        let response = opts
            .max_output_tokens
            .unwrap_or(self.settings.max_output_tokens);
        let mut context = opts
            .max_context_tokens
            .unwrap_or_else(|| self.settings.context_tokens_for(&opts.model));
        if response == 0 || context == 0 {
            return Err(DispatchError::Configuration(format!(
                "token limits must be positive (context={}, output={})",
                context, response
            )));
        }

        // Large windows advertise input and output together.
        if context > LARGE_CONTEXT_THRESHOLD {
            context = context.checked_sub(response).ok_or_else(|| {
                DispatchError::Configuration(format!(
                    "maxOutputTokens ({}) exceeds maxContextTokens ({})",
                    response, context
                ))
            })?;
        }

        // Zero means unset.
        let prompt = match opts.max_prompt_tokens.filter(|p| *p > 0) {
            Some(p) => p,
            None => context.checked_sub(response).unwrap_or(0),
        };
        if prompt == 0 {
            return Err(DispatchError::Configuration(format!(
                "no prompt budget left: maxContextTokens ({}) minus maxOutputTokens ({})",
                context, response
            )));
        }

        let total = u64::from(prompt) + u64::from(response);
        if total > u64::from(context) {
            return Err(DispatchError::Configuration(format!(
                "maxPromptTokens + maxOutputTokens ({} + {} = {}) must be less than or equal to maxContextTokens ({})",
                prompt, response, total, context
            )));
        }

        Ok(BudgetConfig {
            max_context_tokens: context,
            max_response_tokens: response,
            max_prompt_tokens: prompt,
        })
    }
}
