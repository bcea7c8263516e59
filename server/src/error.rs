//! Error taxonomy for the storage core
//!
//! Structural errors (a path that was never set, a bad concatenation, an
//! operation that makes no sense on the root, an invalid path, a missing
//! storage root) always reach the caller. Everything else is I/O class and
//! may be absorbed into a `false` return by [`absorb`] at the public
//! operation boundary.

use crate::node::NodeKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("The path of this {0} is not defined")]
    PathNotDefined(NodeKind),
    #[error("Cannot concatenate '{suffix}' onto '{base}'")]
    FolderConcatenation { base: String, suffix: String },
    #[error("Operation not permitted: {0}")]
    Operating(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Storage root {0} does not exist")]
    RootMissing(PathBuf),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata store error: {0:#}")]
    Metadata(anyhow::Error),
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl From<anyhow::Error> for FsError {
    fn from(err: anyhow::Error) -> Self {
        FsError::Metadata(err)
    }
}

impl FsError {
    /// Errors that describe a logical mistake rather than a failing resource.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            FsError::PathNotDefined(_)
                | FsError::FolderConcatenation { .. }
                | FsError::Operating(_)
                | FsError::InvalidPath(_)
                | FsError::RootMissing(_)
        )
    }

    /// Short name of the variant, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FsError::PathNotDefined(_) => "path_not_defined",
            FsError::FolderConcatenation { .. } => "folder_concatenation",
            FsError::Operating(_) => "operating",
            FsError::InvalidPath(_) => "invalid_path",
            FsError::RootMissing(_) => "root_missing",
            FsError::NotFound(_) => "not_found",
            FsError::Io(_) => "io",
            FsError::Metadata(_) => "metadata",
            FsError::Token(_) => "token",
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Error-mapping wrapper used at every public leaf operation.
///
/// Structural errors are re-raised unchanged. Any other failure is logged
/// with its kind and message and turned into `false`.
pub fn absorb(operation: &str, path: &str, result: FsResult<bool>) -> FsResult<bool> {
    match result {
        Ok(done) => Ok(done),
        Err(err) if err.is_structural() => Err(err),
        Err(err) => {
            tracing::error!(
                operation,
                path,
                kind = err.kind(),
                error = %err,
                "operation failed"
            );
            Ok(false)
        }
    }
}
