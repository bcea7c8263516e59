//! Database models for mfs
//!
//! These structs map directly to the `dirs` and `files` tables.

use crate::node::Visibility;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// =============================================================================
// Directory rows
// =============================================================================

/// A persisted directory node (identified by relpath, ends with `/`)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct DirRecord {
    pub id: Uuid,
    pub relpath: String,
    pub visibility: Visibility,
    /// Containing directory (NULL for the root and untracked parents)
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting or updating a directory row
#[derive(Debug, Clone)]
pub struct NewDir {
    pub relpath: String,
    /// `None` keeps the stored visibility (public for new rows)
    pub visibility: Option<Visibility>,
    /// `None` keeps the stored parent
    pub parent_id: Option<Uuid>,
}

// =============================================================================
// File rows
// =============================================================================

/// A persisted file node
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub relpath: String,
    pub visibility: Visibility,
    pub parent_id: Uuid,
    /// Byte length of the physical file at the last save
    pub size_bytes: i64,
    pub ext: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting or updating a file row
#[derive(Debug, Clone)]
pub struct NewFile {
    pub relpath: String,
    pub visibility: Option<Visibility>,
    pub parent_id: Uuid,
    pub size_bytes: i64,
    pub ext: String,
}
