//! Physical storage rooted at the base directory
//!
//! [`Storage`] ties the physical tree to the metadata repository. The
//! directory and file operations live in [`DirStore`] and [`FileStore`],
//! borrowed views over the same storage.

pub mod dirs;
pub mod files;
pub mod index;
pub mod locks;
pub mod upload;

pub use dirs::DirStore;
pub use files::{FileStore, OpenMode};
pub use index::{reconcile, IndexReport};
pub use locks::{PathGuard, PathLocks};
pub use upload::{Ingest, UploadIngester, DEFAULT_CHUNK_SIZE};

use crate::db::NodeRepository;
use crate::error::{FsError, FsResult};
use crate::node::{Dir, File, Folder, Visibility};
use crate::path::PathNormalizer;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a node should be moved to: a raw directory path or a directory node.
pub enum Destination<'a> {
    Path(&'a str),
    Dir(&'a Dir),
}

impl<'a> From<&'a str> for Destination<'a> {
    fn from(path: &'a str) -> Self {
        Destination::Path(path)
    }
}

impl<'a> From<&'a String> for Destination<'a> {
    fn from(path: &'a String) -> Self {
        Destination::Path(path.as_str())
    }
}

impl<'a> From<&'a Dir> for Destination<'a> {
    fn from(dir: &'a Dir) -> Self {
        Destination::Dir(dir)
    }
}

#[derive(Clone)]
pub struct Storage {
    base_dir: PathBuf,
    paths: PathNormalizer,
    repo: Arc<dyn NodeRepository>,
    locks: PathLocks,
}

impl Storage {
    pub fn new(
        base_dir: impl AsRef<Path>,
        paths: PathNormalizer,
        repo: Arc<dyn NodeRepository>,
    ) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            paths,
            repo,
            locks: PathLocks::new(),
        }
    }

    /// Create the base directory if it is missing. Called once at startup.
    pub async fn prepare_root(&self) -> FsResult<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        tracing::info!(base_dir = %self.base_dir.display(), "storage root ready");
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn paths(&self) -> &PathNormalizer {
        &self.paths
    }

    pub fn repo(&self) -> &Arc<dyn NodeRepository> {
        &self.repo
    }

    pub fn dirs(&self) -> DirStore<'_> {
        DirStore::new(self)
    }

    pub fn files(&self) -> FileStore<'_> {
        FileStore::new(self)
    }

    /// Unsaved directory node at a raw path.
    pub fn dir(&self, raw: &str) -> FsResult<Dir> {
        Dir::new(&self.paths, raw)
    }

    /// Unsaved file node at a raw path.
    pub fn file(&self, raw: &str) -> FsResult<File> {
        File::new(&self.paths, raw)
    }

    /// Physical location of a relpath below the base directory.
    pub fn abspath(&self, relpath: &str) -> PathBuf {
        self.base_dir.join(relpath.trim_start_matches('/'))
    }

    /// Physical location of a node.
    pub fn abspath_of(&self, node: &dyn Folder) -> FsResult<PathBuf> {
        Ok(self.abspath(node.relpath()?))
    }

    pub(crate) fn locks(&self) -> &PathLocks {
        &self.locks
    }

    pub(crate) async fn check_root(&self) -> FsResult<()> {
        match tokio::fs::metadata(&self.base_dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(FsError::RootMissing(self.base_dir.clone())),
        }
    }

    /// Map a physical path back to its relpath, if it lies below the base.
    pub(crate) fn relpath_of(&self, abspath: &Path, is_dir: bool) -> Option<String> {
        let rel = abspath.strip_prefix(&self.base_dir).ok()?;
        let mut relpath = String::from("/");
        let segments: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        relpath.push_str(&segments.join("/"));
        if is_dir && !relpath.ends_with('/') {
            relpath.push('/');
        }
        Some(relpath)
    }
}

pub(crate) async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

pub(crate) async fn occupied(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

/// Single-segment name accepted by the rename operations.
pub(crate) fn validate_name(raw: &str) -> FsResult<&str> {
    let name = raw.trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(|c| c.is_control())
    {
        return Err(FsError::InvalidPath(format!("'{}' is not a valid name", raw)));
    }
    Ok(name)
}

/// Tier to write for `node`: the one its row carries, or one the caller
/// set on a new node. `None` leaves an existing row's tier untouched.
pub(crate) fn stored_visibility(node: &dyn Folder) -> Option<Visibility> {
    let visibility = node.visibility();
    if node.is_persisted() || visibility != Visibility::default() {
        Some(visibility)
    } else {
        None
    }
}
