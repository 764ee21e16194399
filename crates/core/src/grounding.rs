//! Citation extraction for grounded replies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::warn;

use crate::settings::{GROUNDING_SOURCES_HEADER, PRIVATE_STORAGE_SCHEME};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroundingOption {
    #[default]
    #[serde(rename = "none")]
    Off,
    #[serde(rename = "Google Search")]
    GoogleSearch,
    #[serde(rename = "Vertex AI Search")]
    VertexAiSearch,
    #[serde(rename = "Enterprise Web Search")]
    EnterpriseWebSearch,
}

impl GroundingOption {
    pub fn is_off(self) -> bool {
        self == GroundingOption::Off
    }

    /// Only datastore search reports which chunks the text actually cites.
    pub fn filters_by_support(self) -> bool {
        self == GroundingOption::VertexAiSearch
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroundingChunk {
    pub title: Option<String>,
    pub uri: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroundingSupport {
    pub chunk_indices: Vec<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroundingMetadata {
    pub chunks: Vec<GroundingChunk>,
    pub supports: Option<Vec<GroundingSupport>>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GroundingError {
    #[error("malformed grounding metadata: {0}")]
    Malformed(String),
    #[error("grounding supports missing for {0:?}")]
    MissingSupports(GroundingOption),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    #[serde(default)]
    grounding_chunks: Vec<RawChunk>,
    grounding_supports: Option<Vec<RawSupport>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChunk {
    web: Option<RawSource>,
    retrieved_context: Option<RawSource>,
}

#[derive(Deserialize)]
struct RawSource {
    title: Option<String>,
    uri: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSupport {
    #[serde(default)]
    grounding_chunk_indices: Vec<usize>,
}

impl GroundingMetadata {
    /// Reads the `groundingMetadata` object of a response candidate.
    pub fn from_value(v: &serde_json::Value) -> Result<Self, GroundingError> {
        let raw = RawMetadata::deserialize(v).map_err(|e| GroundingError::Malformed(e.to_string()))?;
        let chunks = raw
            .grounding_chunks
            .into_iter()
            .map(|c| {
                let web = c.web.unwrap_or(RawSource { title: None, uri: None });
                let ctx = c.retrieved_context;
                let (ctx_title, ctx_uri) = match ctx {
                    Some(s) => (s.title, s.uri),
                    None => (None, None),
                };
                GroundingChunk {
                    title: web.title.or(ctx_title),
                    uri: web.uri.or(ctx_uri),
                }
            })
            .collect();
        let supports = raw.grounding_supports.map(|s| {
            s.into_iter()
                .map(|r| GroundingSupport {
                    chunk_indices: r.grounding_chunk_indices,
                })
                .collect()
        });
        Ok(Self { chunks, supports })
    }
}

/// Formats the cited chunks as a numbered list, or `None` when nothing
/// citable remains.
pub fn extract(
    chunks: &[GroundingChunk],
    supports: Option<&[GroundingSupport]>,
    option: GroundingOption,
) -> Result<Option<String>, GroundingError> {
    let kept: Vec<&GroundingChunk> = if option.filters_by_support() {
        let supports = supports.ok_or(GroundingError::MissingSupports(option))?;
        let cited: BTreeSet<usize> = supports
            .iter()
            .flat_map(|s| s.chunk_indices.iter().copied())
            .collect();
        chunks
            .iter()
            .enumerate()
            .filter(|(i, _)| cited.contains(i))
            .map(|(_, c)| c)
            .collect()
    } else {
        chunks.iter().collect()
    };

    let lines: Vec<String> = kept
        .into_iter()
        .filter_map(|c| {
            let uri = c.uri.as_deref().filter(|u| !u.is_empty())?;
            Some((c.title.as_deref().unwrap_or(uri), uri))
        })
        .enumerate()
        .map(|(i, (title, uri))| {
            let n = i + 1;
            if uri.starts_with(PRIVATE_STORAGE_SCHEME) {
                format!("{} - {}", n, title)
            } else {
                format!("{} - [{}]({})", n, title, uri)
            }
        })
        .collect();

    if lines.is_empty() {
        return Ok(None);
    }
    Ok(Some(lines.join("\n")))
}

/// Appends the sources block to `reply`. Malformed metadata only costs the
/// citations; the reply itself is kept.
pub fn append_sources(reply: &mut String, metadata: &serde_json::Value, option: GroundingOption) {
    let block = GroundingMetadata::from_value(metadata)
        .and_then(|m| extract(&m.chunks, m.supports.as_deref(), option));
    match block {
        Ok(Some(sources)) => {
            reply.push_str(GROUNDING_SOURCES_HEADER);
            reply.push_str(&sources);
        }
        Ok(None) => {}
        Err(e) => warn!(target: "grounding", "dropping citations: {}", e),
    }
}
