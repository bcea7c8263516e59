//! Shared types for REST API

use crate::node::{File, Folder, Visibility};
use serde::{Deserialize, Serialize};

// ============================================================================
// FILE RESPONSES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: Option<String>,
    pub relpath: String,
    pub url: String,
    pub size_bytes: u64,
    pub ext: String,
    pub visibility: Visibility,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl FileResponse {
    pub fn new(file: &File, url: String) -> Self {
        let meta = file.meta();
        Self {
            id: meta.id.map(|id| id.to_string()),
            relpath: file.to_string(),
            url,
            size_bytes: file.size,
            ext: file.ext.clone(),
            visibility: meta.visibility,
            created_at: meta.created_at.map(|t| t.to_rfc3339()),
            updated_at: meta.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Target directory; the configured upload directory when absent
    pub dir: Option<String>,
}
