//! Backend-independent pieces of the reply client: request and stream types,
//! the model rule table, token budgets, backend selection, pacing and
//! grounding citations.

pub mod attachments;
pub mod budget;
pub mod grounding;
pub mod llm;
pub mod options;
pub mod pacer;
pub mod profile;
pub mod select;
pub mod settings;

pub use llm::{ChatError, DispatchError};
