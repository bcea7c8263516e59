//! Node model shared by directories and files
//!
//! A node lives in memory with an optional relpath and an optional row
//! identity. It becomes persisted when a store saves it and adopts the
//! identity of the metadata row with the same relpath.

use crate::db::{DirRecord, FileRecord};
use crate::error::{FsError, FsResult};
use crate::path::{self, PathNormalizer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Access tier of a node, ordered by the trust it requires.
/// Matches the `visibility` SMALLINT column.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Visibility {
    #[default]
    Public = 0,
    Protected = 1,
    Private = 2,
}

impl Visibility {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Visibility::Public),
            1 => Some(Visibility::Protected),
            2 => Some(Visibility::Private),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    File,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Dir => f.write_str("directory"),
            NodeKind::File => f.write_str("file"),
        }
    }
}

/// Fields common to every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMeta {
    /// Row identity, `None` until saved
    pub id: Option<Uuid>,
    relpath: Option<String>,
    pub visibility: Visibility,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl NodeMeta {
    fn at(relpath: String) -> Self {
        Self {
            relpath: Some(relpath),
            ..Self::default()
        }
    }
}

/// Behaviour shared by [`Dir`] and [`File`].
pub trait Folder {
    fn kind(&self) -> NodeKind;
    fn meta(&self) -> &NodeMeta;
    fn meta_mut(&mut self) -> &mut NodeMeta;
    fn parent_id(&self) -> Option<Uuid>;

    fn relpath(&self) -> FsResult<&str> {
        self.meta()
            .relpath
            .as_deref()
            .ok_or(FsError::PathNotDefined(self.kind()))
    }

    fn name(&self) -> FsResult<&str> {
        self.relpath().map(path::basename)
    }

    fn visibility(&self) -> Visibility {
        self.meta().visibility
    }

    fn is_persisted(&self) -> bool {
        self.meta().id.is_some()
    }

    fn is_root(&self) -> bool {
        self.meta().relpath.as_deref() == Some("/")
    }
}

/// A directory node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dir {
    meta: NodeMeta,
    pub(crate) parent_id: Option<Uuid>,
}

impl Dir {
    /// Directory at a raw path, normalized with `paths`.
    pub fn new(paths: &PathNormalizer, raw: &str) -> FsResult<Self> {
        let relpath = paths.normalize(Some(raw), NodeKind::Dir)?;
        Ok(Self::at(relpath))
    }

    /// Directory whose path is not defined yet.
    pub fn unset() -> Self {
        Self::default()
    }

    /// The storage root sentinel.
    pub fn root() -> Self {
        Self::at("/".to_string())
    }

    /// Directory at an already normalized relpath.
    pub(crate) fn at(relpath: String) -> Self {
        Self {
            meta: NodeMeta::at(path::as_dir_path(&relpath)),
            parent_id: None,
        }
    }

    pub fn set_path(&mut self, paths: &PathNormalizer, raw: &str) -> FsResult<()> {
        self.meta.relpath = Some(paths.normalize(Some(raw), NodeKind::Dir)?);
        Ok(())
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.meta.visibility = visibility;
        self
    }

    pub(crate) fn set_relpath(&mut self, relpath: String) {
        self.meta.relpath = Some(path::as_dir_path(&relpath));
    }

    pub(crate) fn adopt(&mut self, record: DirRecord) {
        self.meta.id = Some(record.id);
        self.meta.relpath = Some(record.relpath);
        self.meta.visibility = record.visibility;
        self.meta.created_at = Some(record.created_at);
        self.meta.updated_at = Some(record.updated_at);
        self.parent_id = record.parent_id;
    }

    pub(crate) fn forget(&mut self) {
        self.meta.id = None;
        self.meta.created_at = None;
        self.meta.updated_at = None;
        self.parent_id = None;
    }

    /// Pure path arithmetic: a new unsaved node below this directory.
    ///
    /// Absolute string suffixes must already start with this directory's
    /// path; relative ones are appended. Node arguments are appended without
    /// their leading `/`. The result is a [`Dir`] when its path ends with
    /// `/`, otherwise a [`File`].
    pub fn join<'a>(&self, other: impl Into<Segment<'a>>) -> FsResult<Node> {
        let base = self.relpath()?;
        let (joined, visibility) = match other.into() {
            Segment::Path(suffix) => {
                let suffix = suffix.trim();
                let joined = if suffix.starts_with('/') {
                    if !suffix.starts_with(base) {
                        return Err(FsError::FolderConcatenation {
                            base: base.to_string(),
                            suffix: suffix.to_string(),
                        });
                    }
                    suffix.to_string()
                } else {
                    format!("{}{}", base, suffix)
                };
                (joined, Visibility::default())
            }
            Segment::Node(node) => {
                let other = node.relpath()?;
                (format!("{}{}", base, &other[1..]), node.visibility())
            }
        };

        let joined = path::clean(&joined)?;
        let mut node = if joined.ends_with('/') {
            Node::Dir(Dir::at(joined))
        } else {
            Node::File(File::at(joined))
        };
        node.meta_mut().visibility = visibility;
        Ok(node)
    }
}

impl Folder for Dir {
    fn kind(&self) -> NodeKind {
        NodeKind::Dir
    }

    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
}

impl From<DirRecord> for Dir {
    fn from(record: DirRecord) -> Self {
        let mut dir = Dir::default();
        dir.adopt(record);
        dir
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.meta.relpath.as_deref().unwrap_or(""))
    }
}

/// A file node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    meta: NodeMeta,
    pub(crate) parent_id: Option<Uuid>,
    /// Size in bytes, recomputed from disk on every save
    pub size: u64,
    /// Extension without the dot, empty when there is none
    pub ext: String,
}

impl File {
    /// File at a raw path, normalized with `paths` (default extension applied).
    pub fn new(paths: &PathNormalizer, raw: &str) -> FsResult<Self> {
        let relpath = paths.normalize(Some(raw), NodeKind::File)?;
        Ok(Self::at(relpath))
    }

    pub fn unset() -> Self {
        Self::default()
    }

    pub(crate) fn at(relpath: String) -> Self {
        let (_, ext) = path::split_ext(path::basename(&relpath), None);
        Self {
            meta: NodeMeta::at(relpath),
            parent_id: None,
            size: 0,
            ext,
        }
    }

    pub fn set_path(&mut self, paths: &PathNormalizer, raw: &str) -> FsResult<()> {
        let relpath = paths.normalize(Some(raw), NodeKind::File)?;
        self.ext = path::split_ext(path::basename(&relpath), None).1;
        self.meta.relpath = Some(relpath);
        Ok(())
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.meta.visibility = visibility;
        self
    }

    pub(crate) fn set_relpath(&mut self, relpath: String) {
        self.meta.relpath = Some(relpath);
    }

    pub(crate) fn adopt(&mut self, record: FileRecord) {
        self.meta.id = Some(record.id);
        self.meta.relpath = Some(record.relpath);
        self.meta.visibility = record.visibility;
        self.meta.created_at = Some(record.created_at);
        self.meta.updated_at = Some(record.updated_at);
        self.parent_id = Some(record.parent_id);
        self.size = record.size_bytes.max(0) as u64;
        self.ext = record.ext;
    }

    pub(crate) fn forget(&mut self) {
        self.meta.id = None;
        self.meta.created_at = None;
        self.meta.updated_at = None;
        self.parent_id = None;
    }

    /// Relpath of the directory holding this file.
    pub fn parent_path(&self) -> FsResult<String> {
        self.relpath().map(path::parent_of)
    }
}

impl Folder for File {
    fn kind(&self) -> NodeKind {
        NodeKind::File
    }

    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        &mut self.meta
    }

    fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }
}

impl From<FileRecord> for File {
    fn from(record: FileRecord) -> Self {
        let mut file = File::default();
        file.adopt(record);
        file
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.meta.relpath.as_deref().unwrap_or(""))
    }
}

/// Either kind of node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Dir(Dir),
    File(File),
}

impl Node {
    pub fn as_dir(&self) -> Option<&Dir> {
        match self {
            Node::Dir(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            Node::File(file) => Some(file),
            Node::Dir(_) => None,
        }
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<Uuid>) {
        match self {
            Node::Dir(dir) => dir.parent_id = parent_id,
            Node::File(file) => file.parent_id = parent_id,
        }
    }
}

impl Folder for Node {
    fn kind(&self) -> NodeKind {
        match self {
            Node::Dir(_) => NodeKind::Dir,
            Node::File(_) => NodeKind::File,
        }
    }

    fn meta(&self) -> &NodeMeta {
        match self {
            Node::Dir(dir) => dir.meta(),
            Node::File(file) => file.meta(),
        }
    }

    fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Node::Dir(dir) => dir.meta_mut(),
            Node::File(file) => file.meta_mut(),
        }
    }

    fn parent_id(&self) -> Option<Uuid> {
        match self {
            Node::Dir(dir) => dir.parent_id,
            Node::File(file) => file.parent_id,
        }
    }
}

impl From<Dir> for Node {
    fn from(dir: Dir) -> Self {
        Node::Dir(dir)
    }
}

impl From<File> for Node {
    fn from(file: File) -> Self {
        Node::File(file)
    }
}

/// Right-hand side of [`Dir::join`].
pub enum Segment<'a> {
    Path(&'a str),
    Node(&'a dyn Folder),
}

impl<'a> From<&'a str> for Segment<'a> {
    fn from(path: &'a str) -> Self {
        Segment::Path(path)
    }
}

impl<'a> From<&'a String> for Segment<'a> {
    fn from(path: &'a String) -> Self {
        Segment::Path(path.as_str())
    }
}

impl<'a> From<&'a Dir> for Segment<'a> {
    fn from(dir: &'a Dir) -> Self {
        Segment::Node(dir)
    }
}

impl<'a> From<&'a File> for Segment<'a> {
    fn from(file: &'a File) -> Self {
        Segment::Node(file)
    }
}

impl<'a> From<&'a Node> for Segment<'a> {
    fn from(node: &'a Node) -> Self {
        Segment::Node(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(raw: &str) -> Dir {
        Dir::new(&PathNormalizer::default(), raw).unwrap()
    }

    #[test]
    fn test_visibility_ordering() {
        assert!(Visibility::Public < Visibility::Protected);
        assert!(Visibility::Protected < Visibility::Private);
        assert_eq!(Visibility::from_i16(2), Some(Visibility::Private));
        assert_eq!(Visibility::from_i16(7), None);
        assert_eq!(Visibility::default(), Visibility::Public);
    }

    #[test]
    fn test_unset_path_is_not_defined() {
        let d = Dir::unset();
        assert!(matches!(d.relpath(), Err(FsError::PathNotDefined(NodeKind::Dir))));
        assert!(matches!(d.join("a/"), Err(FsError::PathNotDefined(NodeKind::Dir))));
        let f = File::unset();
        assert!(matches!(f.name(), Err(FsError::PathNotDefined(NodeKind::File))));
    }

    #[test]
    fn test_join_two_dirs() {
        let d01 = dir("dir01");
        let d02 = dir("dir02");
        let joined = d01.join(&d02).unwrap();
        assert_eq!(joined.relpath().unwrap(), "/dir01/dir02/");
        assert_eq!(joined.kind(), NodeKind::Dir);
        assert!(!joined.is_persisted());

        let chained = d01.join(&d02).unwrap();
        let chained = chained.as_dir().unwrap().join(&dir("rootdir/dir03")).unwrap();
        assert_eq!(chained.relpath().unwrap(), "/dir01/dir02/rootdir/dir03/");
    }

    #[test]
    fn test_join_relative_strings() {
        let d01 = dir("dir01");
        assert_eq!(d01.join("middle/").unwrap().relpath().unwrap(), "/dir01/middle/");

        let file = d01.join("notes/todo.txt").unwrap();
        assert_eq!(file.kind(), NodeKind::File);
        assert_eq!(file.relpath().unwrap(), "/dir01/notes/todo.txt");
        assert_eq!(file.as_file().unwrap().ext, "txt");
    }

    #[test]
    fn test_join_absolute_strings_must_extend_receiver() {
        let d02 = dir("dir02");
        let ok = d02.join("/dir02/sub/").unwrap();
        assert_eq!(ok.relpath().unwrap(), "/dir02/sub/");

        let err = d02.join("/rootdir/dir03/file/").unwrap_err();
        assert!(matches!(err, FsError::FolderConcatenation { .. }));
    }

    #[test]
    fn test_join_does_not_mutate_receiver() {
        let d01 = dir("dir01");
        let before = d01.clone();
        let _ = d01.join("x/").unwrap();
        assert_eq!(d01, before);
    }

    #[test]
    fn test_root_sentinel() {
        assert!(Dir::root().is_root());
        assert!(!dir("a").is_root());
        let joined = Dir::root().join(&dir("a")).unwrap();
        assert_eq!(joined.relpath().unwrap(), "/a/");
    }
}
