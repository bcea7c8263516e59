//! mfs: virtual file storage
//!
//! Files and directories live under one base directory on disk while their
//! metadata (identity, visibility, tree links) lives in a repository.
//! Downloads go through short-lived signed tokens checked by a gate in
//! front of the static file service.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod node;
pub mod path;
pub mod storage;

pub use error::{FsError, FsResult};
pub use node::{Dir, File, Folder, Node, NodeKind, Visibility};
pub use path::PathNormalizer;
pub use storage::Storage;
