use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{ChatError, ConversationRequest, Part};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_id: Option<String>,
    pub filename: Option<String>,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Base64 payload when the file travels inline.
    pub data: Option<String>,
    /// Storage reference when the file is already uploaded.
    pub uri: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.contains("image")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EncodeMode {
    #[default]
    Inline,
    Reference,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedAttachments {
    pub files: Vec<Attachment>,
    pub image_parts: Vec<Part>,
}

/// Turns uploaded files into backend-ready image parts.
#[async_trait]
pub trait AttachmentEncoder: Send + Sync {
    async fn encode(
        &self,
        request: &ConversationRequest,
        attachments: &[Attachment],
        endpoint: &str,
        mode: EncodeMode,
    ) -> Result<EncodedAttachments, ChatError>;
}

/// Uses whatever the attachment already carries: inline data first, then a
/// storage reference. Non-image files are passed through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineEncoder;

#[async_trait]
impl AttachmentEncoder for InlineEncoder {
    async fn encode(
        &self,
        _request: &ConversationRequest,
        attachments: &[Attachment],
        _endpoint: &str,
        mode: EncodeMode,
    ) -> Result<EncodedAttachments, ChatError> {
        let mut out = EncodedAttachments::default();
        for a in attachments {
            out.files.push(a.clone());
            if !a.is_image() {
                continue;
            }
            let part = match (mode, &a.data, &a.uri) {
                (EncodeMode::Inline, Some(data), _) => Some(Part::InlineData {
                    mime_type: a.mime_type.clone(),
                    data: data.clone(),
                }),
                (_, _, Some(uri)) => Some(Part::FileData {
                    mime_type: a.mime_type.clone(),
                    file_uri: uri.clone(),
                }),
                (EncodeMode::Reference, Some(data), None) => Some(Part::InlineData {
                    mime_type: a.mime_type.clone(),
                    data: data.clone(),
                }),
                _ => None,
            };
            out.image_parts.extend(part);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(data: Option<&str>, uri: Option<&str>) -> Attachment {
        Attachment {
            mime_type: "image/png".into(),
            data: data.map(str::to_string),
            uri: uri.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn inline_prefers_data_and_falls_back_to_uri() {
        let req = ConversationRequest::default();
        let files = vec![
            image(Some("AAA"), Some("gs://b/x.png")),
            image(None, Some("gs://b/y.png")),
            image(None, None),
            Attachment {
                mime_type: "application/pdf".into(),
                data: Some("PDF".into()),
                ..Default::default()
            },
        ];
        let enc = InlineEncoder
            .encode(&req, &files, "google", EncodeMode::Inline)
            .await
            .unwrap();
        assert_eq!(enc.files.len(), 4);
        assert_eq!(
            enc.image_parts,
            vec![
                Part::InlineData {
                    mime_type: "image/png".into(),
                    data: "AAA".into()
                },
                Part::FileData {
                    mime_type: "image/png".into(),
                    file_uri: "gs://b/y.png".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn reference_mode_prefers_uri() {
        let req = ConversationRequest::default();
        let enc = InlineEncoder
            .encode(
                &req,
                &[image(Some("AAA"), Some("gs://b/x.png"))],
                "google",
                EncodeMode::Reference,
            )
            .await
            .unwrap();
        assert!(matches!(enc.image_parts[0], Part::FileData { .. }));
    }
}
