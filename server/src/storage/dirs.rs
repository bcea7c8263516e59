//! Directory operations
//!
//! Every mutation changes the physical tree first and the metadata rows
//! second. Public mutating operations lock the relpaths they touch and go
//! through [`absorb`], so only structural errors escape them.

use super::{is_dir, occupied, stored_visibility, validate_name, Destination, Storage};
use crate::db::NewDir;
use crate::error::{absorb, FsError, FsResult};
use crate::node::{Dir, File, Folder, Node, Visibility};
use crate::path::{self, PathNormalizer};
use std::io::ErrorKind;
use uuid::Uuid;

pub struct DirStore<'a> {
    storage: &'a Storage,
}

impl<'a> DirStore<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    fn paths(&self) -> &PathNormalizer {
        self.storage.paths()
    }

    /// Whether the physical directory exists.
    pub async fn exists(&self, dir: &Dir) -> FsResult<bool> {
        Ok(is_dir(&self.storage.abspath_of(dir)?).await)
    }

    /// Create the directory and every missing ancestor. Idempotent.
    ///
    /// Ancestors get their own metadata rows; the directory itself is only
    /// created physically (see [`DirStore::save`]).
    pub async fn ensure_created(&self, dir: &mut Dir) -> FsResult<bool> {
        let relpath = dir.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        absorb("ensure_created", &relpath, self.create_chain(dir).await)
    }

    /// Sorted names of the immediate children.
    pub async fn open(&self, dir: &Dir) -> FsResult<Vec<String>> {
        let relpath = dir.relpath()?;
        let mut entries = match tokio::fs::read_dir(self.storage.abspath(relpath)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FsError::NotFound(relpath.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Create the directory if needed and upsert its row.
    pub async fn save(&self, dir: &mut Dir) -> FsResult<bool> {
        let relpath = dir.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        let result: FsResult<bool> = async {
            if !self.create_chain(dir).await? {
                return Ok(false);
            }
            self.persist(dir).await?;
            Ok(true)
        }
        .await;
        absorb("save", &relpath, result)
    }

    /// Rename the directory in place, keeping its parent.
    pub async fn rename(&self, dir: &mut Dir, new_name: &str) -> FsResult<bool> {
        let old = dir.relpath()?.to_string();
        if dir.is_root() {
            return Err(FsError::Operating("the root directory cannot be renamed".into()));
        }
        if new_name.trim() == "/" {
            return Err(FsError::Operating(format!(
                "cannot rename '{}' to the root directory",
                old
            )));
        }

        let trimmed = new_name.trim();
        let name = validate_name(trimmed.strip_suffix('/').unwrap_or(trimmed))?;
        let new = format!("{}{}/", path::parent_of(&old), name);
        if new == old {
            return Ok(true);
        }

        let _guard = self.storage.locks().acquire(&[&old, &new]).await;
        absorb("rename", &old, self.relocate(dir, &old, &new, None).await)
    }

    /// Move the directory below `destination`.
    pub async fn move_to<'d>(
        &self,
        dir: &mut Dir,
        destination: impl Into<Destination<'d>>,
    ) -> FsResult<bool> {
        let old = dir.relpath()?.to_string();
        if dir.is_root() {
            return Err(FsError::Operating("the root directory cannot be moved".into()));
        }

        let mut container = self.resolve(destination.into())?;
        let target = container.relpath()?.to_string();
        let new = format!("{}{}/", target, path::basename(&old));
        if new == old {
            return Ok(true);
        }
        if target.starts_with(&old) {
            return Err(FsError::Operating(format!(
                "cannot move '{}' into itself ('{}')",
                old, target
            )));
        }

        let _guard = self.storage.locks().acquire(&[&old, &new]).await;
        let result: FsResult<bool> = async {
            if occupied(&self.storage.abspath(&new)).await {
                tracing::warn!(source = %old, destination = %new, "destination already exists");
                return Ok(false);
            }
            if !self.create_chain(&mut container).await? {
                return Ok(false);
            }
            self.persist_implicit(&mut container).await?;
            self.relocate(dir, &old, &new, container.meta().id).await
        }
        .await;
        absorb("move_to", &old, result)
    }

    /// Remove an empty directory and its row.
    ///
    /// Unlike the other operations, I/O failures (a non-empty directory in
    /// particular) propagate.
    pub async fn delete(&self, dir: &mut Dir) -> FsResult<bool> {
        let relpath = dir.relpath()?.to_string();
        if dir.is_root() {
            return Err(FsError::Operating("the root directory cannot be deleted".into()));
        }

        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        match tokio::fs::remove_dir(self.storage.abspath(&relpath)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %relpath, "directory does not exist, nothing to delete");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        self.storage.repo().delete_dir(&relpath).await?;
        dir.forget();
        tracing::debug!(path = %relpath, "directory deleted");
        Ok(true)
    }

    /// Move `child` into `dir`, saving `dir` first when it has no row yet.
    pub async fn add_child(&self, dir: &mut Dir, child: &mut Node) -> FsResult<bool> {
        if !dir.is_persisted() && !self.save(dir).await? {
            return Ok(false);
        }

        let moved = match child {
            Node::Dir(sub) => self.move_to(sub, &*dir).await?,
            Node::File(file) => self.storage.files().move_to(file, &*dir).await?,
        };
        if !moved {
            tracing::warn!(
                parent = %dir,
                child = %child.relpath().unwrap_or_default(),
                "could not add child"
            );
            return Ok(false);
        }

        child.set_parent_id(dir.meta().id);
        Ok(true)
    }

    /// Persisted directory at a raw path.
    pub async fn get(&self, raw: &str) -> FsResult<Option<Dir>> {
        let relpath = self.paths().normalize(Some(raw), crate::node::NodeKind::Dir)?;
        Ok(self.storage.repo().get_dir(&relpath).await?.map(Dir::from))
    }

    /// Subdirectories recorded for `dir`.
    pub async fn subdirectories(&self, dir: &Dir) -> FsResult<Vec<Dir>> {
        let Some(id) = self.row_id(dir).await? else {
            return Ok(Vec::new());
        };
        let records = self.storage.repo().subdirectories(id).await?;
        Ok(records.into_iter().map(Dir::from).collect())
    }

    /// Files recorded for `dir`.
    pub async fn files(&self, dir: &Dir) -> FsResult<Vec<File>> {
        let Some(id) = self.row_id(dir).await? else {
            return Ok(Vec::new());
        };
        let records = self.storage.repo().files_in(id).await?;
        Ok(records.into_iter().map(File::from).collect())
    }

    async fn row_id(&self, dir: &Dir) -> FsResult<Option<Uuid>> {
        if let Some(id) = dir.meta().id {
            return Ok(Some(id));
        }
        let record = self.storage.repo().get_dir(dir.relpath()?).await?;
        Ok(record.map(|r| r.id))
    }

    fn resolve(&self, destination: Destination<'_>) -> FsResult<Dir> {
        match destination {
            Destination::Path(raw) => Dir::new(self.paths(), raw),
            Destination::Dir(dir) => {
                dir.relpath()?;
                Ok(dir.clone())
            }
        }
    }

    /// Unlocked body of [`DirStore::ensure_created`].
    pub(crate) async fn create_chain(&self, dir: &mut Dir) -> FsResult<bool> {
        self.storage.check_root().await?;
        let relpath = dir.relpath()?.to_string();
        let repo = self.storage.repo();

        if is_dir(&self.storage.abspath(&relpath)).await {
            tracing::info!(path = %relpath, "directory already exists");
        }

        let mut parent_id = repo.get_dir("/").await?.map(|root| root.id);
        for ancestor in path::ancestors(&relpath) {
            create_one(&self.storage.abspath(&ancestor)).await?;
            let record = match repo.get_dir(&ancestor).await? {
                Some(record) if parent_id.is_none() || record.parent_id.is_some() => record,
                _ => {
                    repo.upsert_dir(&NewDir {
                        relpath: ancestor.clone(),
                        visibility: None,
                        parent_id,
                    })
                    .await?
                }
            };
            parent_id = Some(record.id);
        }

        create_one(&self.storage.abspath(&relpath)).await?;
        if !dir.is_root() && parent_id.is_some() {
            dir.parent_id = parent_id;
        }
        Ok(true)
    }

    /// Upsert the row for `dir` and adopt its identity.
    pub(crate) async fn persist(&self, dir: &mut Dir) -> FsResult<()> {
        let visibility = stored_visibility(&*dir);
        self.upsert(dir, visibility).await
    }

    /// Persist a directory created on the way to something else (a file's
    /// parent, a move destination). An existing row keeps its tier; only a
    /// new node with an explicit tier sets one.
    pub(crate) async fn persist_implicit(&self, dir: &mut Dir) -> FsResult<()> {
        let visibility = if dir.is_persisted() {
            None
        } else {
            stored_visibility(&*dir)
        };
        self.upsert(dir, visibility).await
    }

    async fn upsert(&self, dir: &mut Dir, visibility: Option<Visibility>) -> FsResult<()> {
        let record = self
            .storage
            .repo()
            .upsert_dir(&NewDir {
                relpath: dir.relpath()?.to_string(),
                visibility,
                parent_id: dir.parent_id,
            })
            .await?;
        dir.adopt(record);
        Ok(())
    }

    /// Physical rename followed by the row rewrite.
    async fn relocate(
        &self,
        dir: &mut Dir,
        old: &str,
        new: &str,
        parent_id: Option<Uuid>,
    ) -> FsResult<bool> {
        let source = self.storage.abspath(old);
        let target = self.storage.abspath(new);
        if occupied(&target).await {
            tracing::warn!(source = %old, destination = %new, "destination already exists");
            return Ok(false);
        }
        if is_dir(&source).await {
            tokio::fs::rename(&source, &target).await?;
        }

        let repo = self.storage.repo();
        let moved = repo.relocate(old, new, parent_id).await?;
        dir.set_relpath(new.to_string());
        if parent_id.is_some() {
            dir.parent_id = parent_id;
        }
        if dir.is_persisted() {
            if let Some(record) = repo.get_dir(new).await? {
                dir.adopt(record);
            }
        }

        tracing::debug!(old, new, rows = moved, "directory relocated");
        Ok(true)
    }
}

async fn create_one(path: &std::path::Path) -> FsResult<()> {
    match tokio::fs::create_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if is_dir(path).await {
                Ok(())
            } else {
                Err(e.into())
            }
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Visibility;
    use crate::storage::test_support::storage;

    #[tokio::test]
    async fn test_save_then_exists_then_delete() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut dir = storage.dir("projects").unwrap();

        assert!(!dirs.exists(&dir).await.unwrap());
        assert!(dirs.save(&mut dir).await.unwrap());
        assert!(dirs.exists(&dir).await.unwrap());
        assert!(dir.is_persisted());

        assert!(dirs.delete(&mut dir).await.unwrap());
        assert!(!dirs.exists(&dir).await.unwrap());
        assert!(!dir.is_persisted());
        assert!(storage.repo().get_dir("/projects/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_implicit_ancestors_are_persisted() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut dir = storage.dir("a/b/c/").unwrap();
        assert!(dirs.save(&mut dir).await.unwrap());

        assert!(tmp.path().join("a/b/c").is_dir());
        let rows = storage.repo().dir_paths().await.unwrap();
        assert_eq!(rows, vec!["/a/", "/a/b/", "/a/b/c/"]);

        let a = storage.repo().get_dir("/a/").await.unwrap().unwrap();
        let b = storage.repo().get_dir("/a/b/").await.unwrap().unwrap();
        assert_eq!(b.parent_id, Some(a.id));
        assert_eq!(dir.parent_id(), Some(b.id));
    }

    #[tokio::test]
    async fn test_ensure_created_is_idempotent() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut dir = storage.dir("x/y").unwrap();
        assert!(dirs.ensure_created(&mut dir).await.unwrap());
        assert!(dirs.ensure_created(&mut dir).await.unwrap());
        // the directory itself only gets a row on save
        assert_eq!(storage.repo().dir_paths().await.unwrap(), vec!["/x/"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let (tmp, storage) = storage();
        let storage = Storage::new(
            tmp.path().join("nope"),
            PathNormalizer::default(),
            storage.repo().clone(),
        );
        let mut dir = storage.dir("a").unwrap();
        let err = storage.dirs().save(&mut dir).await.unwrap_err();
        assert!(matches!(err, FsError::RootMissing(_)));
    }

    #[tokio::test]
    async fn test_save_adopts_existing_row() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut first = storage.dir("shared").unwrap();
        dirs.save(&mut first).await.unwrap();

        let mut second = storage.dir("/shared/").unwrap().with_visibility(Visibility::Protected);
        dirs.save(&mut second).await.unwrap();
        assert_eq!(first.meta().id, second.meta().id);
        assert_eq!(second.visibility(), Visibility::Protected);
    }

    #[tokio::test]
    async fn test_open_lists_sorted_children() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut dir = storage.dir("docs").unwrap();
        dirs.save(&mut dir).await.unwrap();
        std::fs::write(tmp.path().join("docs/b.txt"), b"b").unwrap();
        std::fs::create_dir(tmp.path().join("docs/a")).unwrap();

        assert_eq!(dirs.open(&dir).await.unwrap(), vec!["a", "b.txt"]);

        let missing = storage.dir("nothing").unwrap();
        assert!(matches!(dirs.open(&missing).await, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rename_root_is_operating_error() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        for name in ["x", "/", "..", ""] {
            let mut root = Dir::root();
            assert!(matches!(
                dirs.rename(&mut root, name).await,
                Err(FsError::Operating(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_rename_validates_name() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut dir = storage.dir("a").unwrap();
        dirs.save(&mut dir).await.unwrap();

        assert!(matches!(dirs.rename(&mut dir, "/").await, Err(FsError::Operating(_))));
        assert!(matches!(dirs.rename(&mut dir, "..").await, Err(FsError::InvalidPath(_))));
        assert!(matches!(dirs.rename(&mut dir, "b/c").await, Err(FsError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_rename_rewrites_descendants() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut inner = storage.dir("old/inner").unwrap();
        dirs.save(&mut inner).await.unwrap();
        let mut file = storage.file("old/inner/note.txt").unwrap();
        storage.files().save(&mut file).await.unwrap();

        let mut old = dirs.get("old").await.unwrap().unwrap();
        let id = old.meta().id;
        assert!(dirs.rename(&mut old, "new").await.unwrap());

        assert_eq!(old.relpath().unwrap(), "/new/");
        assert_eq!(old.meta().id, id);
        assert!(tmp.path().join("new/inner/note.txt").is_file());
        assert!(!tmp.path().join("old").exists());
        assert!(storage.repo().get_dir("/new/inner/").await.unwrap().is_some());
        assert!(storage.repo().get_file("/new/inner/note.txt").await.unwrap().is_some());
        assert!(storage.repo().get_dir("/old/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_onto_existing_returns_false() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut a = storage.dir("a").unwrap();
        let mut b = storage.dir("b").unwrap();
        dirs.save(&mut a).await.unwrap();
        dirs.save(&mut b).await.unwrap();

        assert!(!dirs.rename(&mut a, "b").await.unwrap());
        assert_eq!(a.relpath().unwrap(), "/a/");
        assert!(tmp.path().join("a").is_dir());
    }

    #[tokio::test]
    async fn test_move_into_destination() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut src = storage.dir("src").unwrap();
        dirs.save(&mut src).await.unwrap();

        assert!(dirs.move_to(&mut src, "archive/2024").await.unwrap());
        assert_eq!(src.relpath().unwrap(), "/archive/2024/src/");
        assert!(tmp.path().join("archive/2024/src").is_dir());

        let parent = storage.repo().get_dir("/archive/2024/").await.unwrap().unwrap();
        assert_eq!(src.parent_id(), Some(parent.id));
        let row = storage.repo().get_dir("/archive/2024/src/").await.unwrap().unwrap();
        assert_eq!(row.parent_id, Some(parent.id));
    }

    #[tokio::test]
    async fn test_move_into_itself_is_operating_error() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut src = storage.dir("src").unwrap();
        dirs.save(&mut src).await.unwrap();

        assert!(matches!(
            dirs.move_to(&mut src, "src/deeper").await,
            Err(FsError::Operating(_))
        ));
        let mut root = Dir::root();
        assert!(matches!(dirs.move_to(&mut root, "x").await, Err(FsError::Operating(_))));
    }

    #[tokio::test]
    async fn test_move_onto_existing_leaves_source() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut src = storage.dir("src").unwrap();
        let mut clash = storage.dir("dest/src").unwrap();
        dirs.save(&mut src).await.unwrap();
        dirs.save(&mut clash).await.unwrap();

        assert!(!dirs.move_to(&mut src, "dest").await.unwrap());
        assert_eq!(src.relpath().unwrap(), "/src/");
        assert!(tmp.path().join("src").is_dir());
    }

    #[tokio::test]
    async fn test_delete_non_empty_propagates() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut dir = storage.dir("full").unwrap();
        dirs.save(&mut dir).await.unwrap();
        std::fs::write(tmp.path().join("full/x"), b"x").unwrap();

        assert!(matches!(dirs.delete(&mut dir).await, Err(FsError::Io(_))));
        assert!(dir.is_persisted());
    }

    #[tokio::test]
    async fn test_delete_missing_and_root() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut ghost = storage.dir("ghost").unwrap();
        assert!(!dirs.delete(&mut ghost).await.unwrap());

        let mut root = Dir::root();
        assert!(matches!(dirs.delete(&mut root).await, Err(FsError::Operating(_))));
    }

    #[tokio::test]
    async fn test_join_of_saved_dirs() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut a = storage.dir("dirA").unwrap();
        let mut b = storage.dir("dirB").unwrap();
        dirs.save(&mut a).await.unwrap();
        dirs.save(&mut b).await.unwrap();

        let joined = a.join(&b).unwrap();
        let expected = format!("{}{}", a.relpath().unwrap(), &b.relpath().unwrap()[1..]);
        assert_eq!(joined.relpath().unwrap(), expected);
        assert!(!joined.is_persisted());
    }

    #[tokio::test]
    async fn test_add_child_moves_and_links() {
        let (tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut parent = storage.dir("parent").unwrap();
        let mut child = Node::from(storage.file("loose.txt").unwrap());
        if let Node::File(file) = &mut child {
            storage.files().save(file).await.unwrap();
        }

        assert!(dirs.add_child(&mut parent, &mut child).await.unwrap());
        assert!(parent.is_persisted());
        assert_eq!(child.relpath().unwrap(), "/parent/loose.txt");
        assert_eq!(child.parent_id(), parent.meta().id);
        assert!(tmp.path().join("parent/loose.txt").is_file());

        let listed = dirs.files(&parent).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].relpath().unwrap(), "/parent/loose.txt");
    }

    #[tokio::test]
    async fn test_subdirectories() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut deep = storage.dir("top/one").unwrap();
        dirs.save(&mut deep).await.unwrap();
        let mut two = storage.dir("top/two").unwrap();
        dirs.save(&mut two).await.unwrap();

        let top = dirs.get("top").await.unwrap().unwrap();
        let names: Vec<String> = dirs
            .subdirectories(&top)
            .await
            .unwrap()
            .iter()
            .map(|d| d.relpath().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["/top/one/", "/top/two/"]);
    }

    #[tokio::test]
    async fn test_ensure_created_over_file_fails() {
        let (tmp, storage) = storage();
        std::fs::write(tmp.path().join("clash"), b"x").unwrap();

        let mut dir = storage.dir("clash").unwrap();
        assert!(!storage.dirs().ensure_created(&mut dir).await.unwrap());

        let mut again = storage.dir("existing").unwrap();
        std::fs::create_dir(tmp.path().join("existing")).unwrap();
        assert!(storage.dirs().ensure_created(&mut again).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_into_private_dir_keeps_its_tier() {
        let (_tmp, storage) = storage();
        let dirs = storage.dirs();
        let mut vault = storage.dir("vault").unwrap().with_visibility(Visibility::Private);
        dirs.save(&mut vault).await.unwrap();

        let mut inner = storage.dir("inner").unwrap();
        dirs.save(&mut inner).await.unwrap();
        assert!(dirs.move_to(&mut inner, "vault").await.unwrap());

        let row = storage.repo().get_dir("/vault/").await.unwrap().unwrap();
        assert_eq!(row.visibility, Visibility::Private);
        assert_eq!(inner.parent_id, vault.meta().id);
    }
}
