use crate::attachments::Attachment;
use crate::settings::{Marker, ModelRules};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    Standard,
    Legacy,
    Image,
}

/// How a chat-family model is called.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallShape {
    Incremental,
    OneShot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelProfile {
    pub model_id: String,
    pub family: Family,
    pub uses_managed_backend: bool,
}

impl ModelProfile {
    pub fn call_shape(&self) -> CallShape {
        match self.family {
            Family::Legacy => CallShape::OneShot,
            _ => CallShape::Incremental,
        }
    }
}

pub struct ModelProfileResolver<'a> {
    rules: &'a ModelRules,
}

impl<'a> ModelProfileResolver<'a> {
    pub fn new(rules: &'a ModelRules) -> Self {
        Self { rules }
    }

    pub fn resolve(&self, model_id: &str, has_managed_project: bool) -> ModelProfile {
        // Image models only exist behind a managed project, so the marker is
        // checked before the project decides the chat family.
        let family = if self.rules.has(model_id, Marker::Image) {
            Family::Image
        } else if self.rules.has(model_id, Marker::Legacy) {
            Family::Legacy
        } else {
            Family::Standard
        };
        ModelProfile {
            model_id: model_id.to_string(),
            family,
            uses_managed_backend: has_managed_project,
        }
    }

    /// Vision capable and, when a model list is configured, listed in it.
    pub fn is_vision_model(&self, model: &str, available: Option<&[String]>) -> bool {
        if let Some(list) = available {
            if !list.iter().any(|m| m == model) {
                return false;
            }
        }
        self.rules.has(model, Marker::Vision)
    }

    pub fn is_generative(&self, model: &str) -> bool {
        self.rules.has(model, Marker::Generative)
    }

    pub fn uses_older_search_tool(&self, model: &str) -> bool {
        self.rules.has(model, Marker::OlderSearch)
    }

    /// Returns the model a request should use given its attachments, or
    /// `None` when the current model stays.
    pub fn rewrite_for_vision(
        &self,
        model: &str,
        attachments: &[Attachment],
        available: Option<&[String]>,
        default_vision: &str,
    ) -> Option<String> {
        let has_images = attachments.iter().any(Attachment::is_image);
        let is_vision = self.is_vision_model(model, available);
        let default_listed = available.is_some_and(|l| l.iter().any(|m| m == default_vision));

        if has_images && default_listed && !is_vision && model != default_vision {
            return Some(default_vision.to_string());
        }
        if is_vision && attachments.is_empty() {
            return non_vision_sibling(model);
        }
        None
    }
}

/// `gemini-pro-vision` -> `gemini-pro`; models without a vision suffix have no
/// sibling.
pub fn non_vision_sibling(model: &str) -> Option<String> {
    let sibling = model.replace("-vision", "");
    (sibling != model && !sibling.is_empty()).then_some(sibling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ModelRule, DEFAULT_VISION_MODEL};

    fn png() -> Attachment {
        Attachment {
            mime_type: "image/png".into(),
            data: Some("AAA".into()),
            ..Default::default()
        }
    }

    #[test]
    fn legacy_and_image_classes_are_exclusive() {
        let rules = ModelRules::default();
        let r = ModelProfileResolver::new(&rules);
        for rule in rules.rules() {
            let model = rule.pattern.as_str();
            for managed in [false, true] {
                let p = r.resolve(model, managed);
                match rule.marker {
                    Marker::Image => assert_eq!(p.family, Family::Image, "{model}"),
                    Marker::Legacy => assert_eq!(p.family, Family::Legacy, "{model}"),
                    _ => {}
                }
                assert_eq!(p.uses_managed_backend, managed);
            }
        }
        for m in ["gemini-1.0-pro", "gemini-pro", "gemini-1.5-flash-002", "medlm-large-1.5"] {
            assert_eq!(r.resolve(m, false).family, Family::Legacy, "{m}");
            assert_eq!(r.resolve(m, true).family, Family::Legacy, "{m}");
        }
        for m in ["imagen-3.0-generate-001", "imagegeneration@006"] {
            assert_eq!(r.resolve(m, false).family, Family::Image, "{m}");
            assert_eq!(r.resolve(m, true).family, Family::Image, "{m}");
        }
    }

    #[test]
    fn newer_models_are_standard_on_both_paths() {
        let rules = ModelRules::default();
        let r = ModelProfileResolver::new(&rules);
        for m in ["gemini-2.0-flash", "gemini-2.5-pro", "learnlm-1.5-pro-experimental"] {
            let p = r.resolve(m, false);
            assert_eq!(p.family, Family::Standard, "{m}");
            assert_eq!(p.call_shape(), CallShape::Incremental);
        }
        let p = r.resolve("gemini-1.0-pro", true);
        assert_eq!(p.call_shape(), CallShape::OneShot);
    }

    #[test]
    fn injected_rules_change_classification() {
        let rules = ModelRules::new(vec![ModelRule::new("old-", Marker::Legacy)]);
        let r = ModelProfileResolver::new(&rules);
        assert_eq!(r.resolve("old-model", false).family, Family::Legacy);
        assert_eq!(r.resolve("gemini-1.0-pro", false).family, Family::Standard);
    }

    #[test]
    fn image_attachment_rewrites_to_default_vision_model() {
        let rules = ModelRules::default();
        let r = ModelProfileResolver::new(&rules);
        let available = vec!["gemini-pro".to_string(), DEFAULT_VISION_MODEL.to_string()];
        let out = r.rewrite_for_vision("gemini-pro", &[png()], Some(&available), DEFAULT_VISION_MODEL);
        assert_eq!(out.as_deref(), Some(DEFAULT_VISION_MODEL));
    }

    #[test]
    fn no_rewrite_without_listed_default_or_when_already_vision() {
        let rules = ModelRules::default();
        let r = ModelProfileResolver::new(&rules);
        let only_text = vec!["gemini-pro".to_string()];
        assert_eq!(
            r.rewrite_for_vision("gemini-pro", &[png()], Some(&only_text), DEFAULT_VISION_MODEL),
            None
        );
        assert_eq!(r.rewrite_for_vision("gemini-pro", &[png()], None, DEFAULT_VISION_MODEL), None);
        let listed = vec!["gemini-2.0-flash".to_string(), DEFAULT_VISION_MODEL.to_string()];
        assert_eq!(
            r.rewrite_for_vision("gemini-2.0-flash", &[png()], Some(&listed), DEFAULT_VISION_MODEL),
            None
        );
        let pdf = Attachment {
            mime_type: "application/pdf".into(),
            ..Default::default()
        };
        assert_eq!(
            r.rewrite_for_vision("gemini-pro", &[pdf], Some(&listed), DEFAULT_VISION_MODEL),
            None
        );
    }

    #[test]
    fn vision_model_without_attachments_falls_back_to_sibling() {
        let rules = ModelRules::default();
        let r = ModelProfileResolver::new(&rules);
        assert_eq!(
            r.rewrite_for_vision("gemini-pro-vision", &[], None, DEFAULT_VISION_MODEL).as_deref(),
            Some("gemini-pro")
        );
        assert_eq!(r.rewrite_for_vision("gemini-2.0-flash", &[], None, DEFAULT_VISION_MODEL), None);
    }

    #[test]
    fn sibling_requires_vision_suffix() {
        assert_eq!(non_vision_sibling("gemini-pro-vision").as_deref(), Some("gemini-pro"));
        assert_eq!(non_vision_sibling("gemini-1.5-pro"), None);
    }
}
