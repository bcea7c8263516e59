//! In-process node repository
//!
//! Same contract as the PostgreSQL repository, backed by ordered maps keyed
//! by relpath. Parent links are not enforced as foreign keys, but deleting a
//! directory row drops its direct children like `ON DELETE CASCADE` would.

use super::{rebase, DirRecord, FileRecord, NewDir, NewFile, NodeRepository};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    dirs: BTreeMap<String, DirRecord>,
    files: BTreeMap<String, FileRecord>,
}

#[derive(Default)]
pub struct MemoryNodeRepository {
    tables: RwLock<Tables>,
}

impl MemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    /// Remove a dir row and everything that (transitively) points at it.
    fn cascade_dir(&mut self, relpath: &str) -> bool {
        let Some(removed) = self.dirs.remove(relpath) else {
            return false;
        };

        self.files.retain(|_, file| file.parent_id != removed.id);
        let children: Vec<String> = self
            .dirs
            .values()
            .filter(|dir| dir.parent_id == Some(removed.id))
            .map(|dir| dir.relpath.clone())
            .collect();
        for child in children {
            self.cascade_dir(&child);
        }
        true
    }
}

#[async_trait]
impl NodeRepository for MemoryNodeRepository {
    async fn get_dir(&self, relpath: &str) -> anyhow::Result<Option<DirRecord>> {
        Ok(self.tables.read().dirs.get(relpath).cloned())
    }

    async fn upsert_dir(&self, dir: &NewDir) -> anyhow::Result<DirRecord> {
        let now = Utc::now();
        let mut tables = self.tables.write();
        let record = tables
            .dirs
            .entry(dir.relpath.clone())
            .and_modify(|existing| {
                if let Some(visibility) = dir.visibility {
                    existing.visibility = visibility;
                }
                if dir.parent_id.is_some() {
                    existing.parent_id = dir.parent_id;
                }
                existing.updated_at = now;
            })
            .or_insert_with(|| DirRecord {
                id: Uuid::new_v4(),
                relpath: dir.relpath.clone(),
                visibility: dir.visibility.unwrap_or_default(),
                parent_id: dir.parent_id,
                created_at: now,
                updated_at: now,
            });
        Ok(record.clone())
    }

    async fn delete_dir(&self, relpath: &str) -> anyhow::Result<bool> {
        Ok(self.tables.write().cascade_dir(relpath))
    }

    async fn get_file(&self, relpath: &str) -> anyhow::Result<Option<FileRecord>> {
        Ok(self.tables.read().files.get(relpath).cloned())
    }

    async fn upsert_file(&self, file: &NewFile) -> anyhow::Result<FileRecord> {
        anyhow::ensure!(file.size_bytes >= 0, "negative size for {}", file.relpath);

        let now = Utc::now();
        let mut tables = self.tables.write();
        let record = tables
            .files
            .entry(file.relpath.clone())
            .and_modify(|existing| {
                if let Some(visibility) = file.visibility {
                    existing.visibility = visibility;
                }
                existing.parent_id = file.parent_id;
                existing.size_bytes = file.size_bytes;
                existing.ext = file.ext.clone();
                existing.updated_at = now;
            })
            .or_insert_with(|| FileRecord {
                id: Uuid::new_v4(),
                relpath: file.relpath.clone(),
                visibility: file.visibility.unwrap_or_default(),
                parent_id: file.parent_id,
                size_bytes: file.size_bytes,
                ext: file.ext.clone(),
                created_at: now,
                updated_at: now,
            });
        Ok(record.clone())
    }

    async fn delete_file(&self, relpath: &str) -> anyhow::Result<bool> {
        Ok(self.tables.write().files.remove(relpath).is_some())
    }

    async fn relocate(&self, old: &str, new: &str, parent_id: Option<Uuid>) -> anyhow::Result<u64> {
        let now = Utc::now();
        let mut tables = self.tables.write();
        let mut moved = 0;

        if old.ends_with('/') {
            tables
                .files
                .retain(|path, _| !path.starts_with(new) || path.starts_with(old));
            tables
                .dirs
                .retain(|path, _| !path.starts_with(new) || path.starts_with(old));

            let dir_paths: Vec<String> = tables
                .dirs
                .keys()
                .filter(|path| path.starts_with(old))
                .cloned()
                .collect();
            for path in dir_paths {
                if let (Some(mut record), Some(target)) =
                    (tables.dirs.remove(&path), rebase(&path, old, new))
                {
                    record.relpath = target.clone();
                    record.updated_at = now;
                    if target == new && parent_id.is_some() {
                        record.parent_id = parent_id;
                    }
                    tables.dirs.insert(target, record);
                    moved += 1;
                }
            }

            let file_paths: Vec<String> = tables
                .files
                .keys()
                .filter(|path| path.starts_with(old))
                .cloned()
                .collect();
            for path in file_paths {
                if let (Some(mut record), Some(target)) =
                    (tables.files.remove(&path), rebase(&path, old, new))
                {
                    record.relpath = target.clone();
                    record.updated_at = now;
                    tables.files.insert(target, record);
                    moved += 1;
                }
            }
        } else {
            tables.files.remove(new);
            if let Some(mut record) = tables.files.remove(old) {
                record.relpath = new.to_string();
                record.updated_at = now;
                if let Some(parent_id) = parent_id {
                    record.parent_id = parent_id;
                }
                tables.files.insert(new.to_string(), record);
                moved += 1;
            }
        }

        Ok(moved)
    }

    async fn subdirectories(&self, parent_id: Uuid) -> anyhow::Result<Vec<DirRecord>> {
        Ok(self
            .tables
            .read()
            .dirs
            .values()
            .filter(|dir| dir.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn files_in(&self, parent_id: Uuid) -> anyhow::Result<Vec<FileRecord>> {
        Ok(self
            .tables
            .read()
            .files
            .values()
            .filter(|file| file.parent_id == parent_id)
            .cloned()
            .collect())
    }

    async fn dir_paths(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.tables.read().dirs.keys().cloned().collect())
    }

    async fn file_paths(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.tables.read().files.keys().cloned().collect())
    }
}
