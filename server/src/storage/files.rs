//! File operations
//!
//! Saving a file guarantees its parent directory chain, touches the
//! physical file, recomputes the size from disk and upserts the row.

use super::{is_file, occupied, stored_visibility, validate_name, Destination, Storage};
use crate::db::NewFile;
use crate::error::{absorb, FsError, FsResult};
use crate::node::{Dir, File, Folder, NodeKind};
use crate::path;
use std::io::{self, ErrorKind};
use std::str::FromStr;
use tokio::fs::OpenOptions;
use uuid::Uuid;
use walkdir::WalkDir;

/// How [`FileStore::open`] opens the physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`
    Read,
    /// `w`, truncates
    Write,
    /// `a`
    Append,
    /// `r+`
    ReadWrite,
    /// `w+`, truncates
    ReadWriteTruncate,
    /// `a+`
    ReadAppend,
}

impl OpenMode {
    pub fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).truncate(true),
            OpenMode::Append => options.append(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::ReadWriteTruncate => options.read(true).write(true).truncate(true),
            OpenMode::ReadAppend => options.read(true).append(true),
        };
        options
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    /// Accepts `r`, `w`, `a` with optional `+`; `b` and `t` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode: String = s.chars().filter(|c| *c != 'b' && *c != 't').collect();
        match mode.as_str() {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "a" => Ok(OpenMode::Append),
            "r+" | "+r" => Ok(OpenMode::ReadWrite),
            "w+" | "+w" => Ok(OpenMode::ReadWriteTruncate),
            "a+" | "+a" => Ok(OpenMode::ReadAppend),
            _ => Err(FsError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                format!("unsupported open mode '{}'", s),
            ))),
        }
    }
}

pub struct FileStore<'a> {
    storage: &'a Storage,
}

impl<'a> FileStore<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn exists(&self, file: &File) -> FsResult<bool> {
        Ok(is_file(&self.storage.abspath_of(file)?).await)
    }

    /// Save the parent directory chain and link `file` to its parent row.
    pub async fn ensure_parent_created(&self, file: &mut File) -> FsResult<bool> {
        let parent = file.parent_path()?;
        let _guard = self.storage.locks().acquire(&[&parent]).await;
        let result = self.prepare_parent(file).await.map(|_| true);
        absorb("ensure_parent_created", &parent, result)
    }

    /// Create the physical file if it does not exist yet. Idempotent.
    pub async fn touch(&self, file: &mut File) -> FsResult<bool> {
        let relpath = file.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        absorb("touch", &relpath, self.touch_unlocked(file).await)
    }

    /// Touch the file, then open it.
    ///
    /// Every non-structural failure, including a failed touch, is reported
    /// as an I/O error.
    pub async fn open(&self, file: &mut File, mode: OpenMode) -> FsResult<tokio::fs::File> {
        let relpath = file.relpath()?.to_string();
        {
            let _guard = self.storage.locks().acquire(&[&relpath]).await;
            self.touch_unlocked(file).await.map_err(into_io)?;
        }
        let handle = mode.options().open(self.storage.abspath(&relpath)).await?;
        Ok(handle)
    }

    pub async fn read(&self, file: &File) -> FsResult<Vec<u8>> {
        let relpath = file.relpath()?;
        tokio::fs::read(self.storage.abspath(relpath))
            .await
            .map_err(|e| not_found(e, relpath))
    }

    /// Replace the content and save the file.
    pub async fn write(&self, file: &mut File, data: &[u8]) -> FsResult<bool> {
        let relpath = file.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        let result: FsResult<bool> = async {
            self.prepare_parent(file).await?;
            tokio::fs::write(self.storage.abspath(&relpath), data).await?;
            self.persist(file).await?;
            Ok(true)
        }
        .await;
        absorb("write", &relpath, result)
    }

    /// Touch the file, recompute its size and upsert its row.
    pub async fn save(&self, file: &mut File) -> FsResult<bool> {
        let relpath = file.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        let result: FsResult<bool> = async {
            if !self.touch_unlocked(file).await? {
                return Ok(false);
            }
            self.persist(file).await?;
            Ok(true)
        }
        .await;
        absorb("save", &relpath, result)
    }

    /// Rename the file within its directory.
    ///
    /// A name without an extension gets the configured default one.
    pub async fn rename(&self, file: &mut File, new_name: &str) -> FsResult<bool> {
        let old = file.relpath()?.to_string();
        let name = validate_name(new_name)?;
        let (stem, ext) = path::split_ext(name, self.storage.paths().default_ext());
        let new = format!("{}{}", path::parent_of(&old), path::file_name(&stem, &ext));
        if new == old {
            return Ok(true);
        }

        let _guard = self.storage.locks().acquire(&[&old, &new]).await;
        let result = self.relocate(file, &old, &new, None).await;
        if matches!(result, Ok(true)) {
            file.ext = ext;
        }
        absorb("rename", &old, result)
    }

    /// Move the file into `destination`, creating it when needed.
    pub async fn move_to<'d>(
        &self,
        file: &mut File,
        destination: impl Into<Destination<'d>>,
    ) -> FsResult<bool> {
        let old = file.relpath()?.to_string();
        let mut container = match destination.into() {
            Destination::Path(raw) => Dir::new(self.storage.paths(), raw)?,
            Destination::Dir(dir) => dir.clone(),
        };
        let new = format!("{}{}", container.relpath()?, path::basename(&old));
        if new == old {
            return Ok(true);
        }

        let _guard = self.storage.locks().acquire(&[&old, &new]).await;
        let result: FsResult<bool> = async {
            if occupied(&self.storage.abspath(&new)).await {
                tracing::warn!(source = %old, destination = %new, "destination already exists");
                return Ok(false);
            }
            let dirs = self.storage.dirs();
            if !dirs.create_chain(&mut container).await? {
                return Ok(false);
            }
            dirs.persist_implicit(&mut container).await?;
            self.relocate(file, &old, &new, container.meta().id).await
        }
        .await;
        absorb("move_to", &old, result)
    }

    /// Remove the physical file, then its row. `false` when it was absent.
    pub async fn delete(&self, file: &mut File) -> FsResult<bool> {
        let relpath = file.relpath()?.to_string();
        let _guard = self.storage.locks().acquire(&[&relpath]).await;
        let result: FsResult<bool> = async {
            match tokio::fs::remove_file(self.storage.abspath(&relpath)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::info!(path = %relpath, "file does not exist, nothing to delete");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
            self.storage.repo().delete_file(&relpath).await?;
            file.forget();
            Ok(true)
        }
        .await;
        absorb("delete", &relpath, result)
    }

    /// Current byte length on disk.
    pub async fn size(&self, file: &File) -> FsResult<u64> {
        let relpath = file.relpath()?;
        let meta = tokio::fs::metadata(self.storage.abspath(relpath))
            .await
            .map_err(|e| not_found(e, relpath))?;
        Ok(meta.len())
    }

    /// Persisted file at a raw path.
    pub async fn get(&self, raw: &str) -> FsResult<Option<File>> {
        let relpath = self.storage.paths().normalize(Some(raw), NodeKind::File)?;
        Ok(self.storage.repo().get_file(&relpath).await?.map(File::from))
    }

    /// First file named `name` anywhere below the base directory.
    ///
    /// The match carries its row when one exists; otherwise it is an unsaved
    /// node with the size read from disk.
    pub async fn find(&self, name: &str) -> FsResult<Option<File>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        self.storage.check_root().await?;

        let base = self.storage.base_dir().to_path_buf();
        let wanted = name.to_string();
        let found = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == wanted)
                .map(|e| {
                    let size = e.metadata().map(|m| m.len()).unwrap_or(0);
                    (e.into_path(), size)
                })
        })
        .await
        .map_err(|e| FsError::Io(io::Error::other(e)))?;

        let Some((abspath, size)) = found else {
            return Ok(None);
        };
        let Some(relpath) = self.storage.relpath_of(&abspath, false) else {
            return Ok(None);
        };

        if let Some(record) = self.storage.repo().get_file(&relpath).await? {
            return Ok(Some(File::from(record)));
        }
        let mut file = File::at(relpath);
        file.size = size;
        Ok(Some(file))
    }

    /// Unlocked body of [`FileStore::ensure_parent_created`].
    pub(crate) async fn prepare_parent(&self, file: &mut File) -> FsResult<()> {
        let mut parent = Dir::at(file.parent_path()?);
        let dirs = self.storage.dirs();
        dirs.create_chain(&mut parent).await?;
        dirs.persist_implicit(&mut parent).await?;
        file.parent_id = parent.meta().id;
        Ok(())
    }

    pub(crate) async fn touch_unlocked(&self, file: &mut File) -> FsResult<bool> {
        self.prepare_parent(file).await?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.storage.abspath(file.relpath()?))
            .await?;
        Ok(true)
    }

    /// Recompute the size and upsert the row.
    pub(crate) async fn persist(&self, file: &mut File) -> FsResult<()> {
        let relpath = file.relpath()?.to_string();
        let parent_id = match file.parent_id {
            Some(id) => id,
            None => {
                self.prepare_parent(file).await?;
                file.parent_id
                    .ok_or_else(|| FsError::NotFound(path::parent_of(&relpath)))?
            }
        };

        let size = tokio::fs::metadata(self.storage.abspath(&relpath)).await?.len();
        let record = self
            .storage
            .repo()
            .upsert_file(&NewFile {
                relpath,
                visibility: stored_visibility(&*file),
                parent_id,
                size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
                ext: file.ext.clone(),
            })
            .await?;
        file.adopt(record);
        Ok(())
    }

    async fn relocate(
        &self,
        file: &mut File,
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
        if is_file(&source).await {
            tokio::fs::rename(&source, &target).await?;
        }

        let repo = self.storage.repo();
        repo.relocate(old, new, parent_id).await?;
        file.set_relpath(new.to_string());
        if parent_id.is_some() {
            file.parent_id = parent_id;
        }
        if file.is_persisted() {
            if let Some(record) = repo.get_file(new).await? {
                file.adopt(record);
            }
        }

        tracing::debug!(old, new, "file relocated");
        Ok(true)
    }
}

fn not_found(err: io::Error, relpath: &str) -> FsError {
    if err.kind() == ErrorKind::NotFound {
        FsError::NotFound(relpath.to_string())
    } else {
        FsError::Io(err)
    }
}

fn into_io(err: FsError) -> FsError {
    match err {
        FsError::Io(_) => err,
        err if err.is_structural() => err,
        other => FsError::Io(io::Error::other(other.to_string())),
    }
}
