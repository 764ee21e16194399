//! Google backends for the reply client and the dispatch client that drives
//! them.

pub mod dispatch;
pub mod google;
pub mod http;
pub mod selector;
pub mod sse;

pub use dispatch::{ModelDispatchClient, ReplyOptions};
pub use google::config::GoogleConfig;
