//! Route handlers for the HTTP API.

pub mod admin;
pub mod file;
pub mod health;
pub mod streaming_helpers;
pub mod video;

use serde::Deserialize;

/// Query parameters addressing a file inside a library root.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub base_path_index: usize,
    pub relative_path: String,
}
