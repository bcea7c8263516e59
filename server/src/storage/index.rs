//! Reconcile the metadata store with the physical tree
//!
//! Adopts physical entries that have no row (orphans left behind when a
//! metadata write failed after the filesystem change) and prunes rows whose
//! physical path no longer exists.

use super::{is_dir, is_file, Storage};
use crate::error::{FsError, FsResult};
use crate::node::{Dir, File};
use serde::Serialize;
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub dirs: usize,
    pub files: usize,
    pub pruned: usize,
}

pub async fn reconcile(storage: &Storage) -> FsResult<IndexReport> {
    storage.check_root().await?;

    let base = storage.base_dir().to_path_buf();
    let entries = tokio::task::spawn_blocking(move || {
        WalkDir::new(&base)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.path_is_symlink())
            .map(|e| (e.file_type().is_dir(), e.into_path()))
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| FsError::Io(std::io::Error::other(e)))?;

    let mut report = IndexReport::default();
    let dirs = storage.dirs();
    let files = storage.files();

    // Parents sort before their children, so each save links to a fresh row
    for (is_directory, abspath) in entries {
        let Some(relpath) = storage.relpath_of(&abspath, is_directory) else {
            continue;
        };

        if is_directory {
            let mut dir = match storage.repo().get_dir(&relpath).await? {
                Some(record) => Dir::from(record),
                None => Dir::at(relpath.clone()),
            };
            if dirs.save(&mut dir).await? {
                report.dirs += 1;
            }
        } else {
            let mut file = match storage.repo().get_file(&relpath).await? {
                Some(record) => File::from(record),
                None => File::at(relpath.clone()),
            };
            if files.save(&mut file).await? {
                report.files += 1;
            }
        }
    }

    let repo = storage.repo();
    for relpath in repo.file_paths().await? {
        if !is_file(&storage.abspath(&relpath)).await && repo.delete_file(&relpath).await? {
            tracing::info!(path = %relpath, "pruned file row");
            report.pruned += 1;
        }
    }
    // Deepest first so a cascade never removes a row we still want to count
    let mut dir_paths = repo.dir_paths().await?;
    dir_paths.sort_by_key(|p| std::cmp::Reverse(p.len()));
    for relpath in dir_paths {
        if !is_dir(&storage.abspath(&relpath)).await && repo.delete_dir(&relpath).await? {
            tracing::info!(path = %relpath, "pruned directory row");
            report.pruned += 1;
        }
    }

    tracing::info!(
        dirs = report.dirs,
        files = report.files,
        pruned = report.pruned,
        "reconcile finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Folder;
    use crate::storage::test_support::storage;

    #[tokio::test]
    async fn test_adopts_orphans() {
        let (tmp, storage) = storage();
        std::fs::create_dir_all(tmp.path().join("photos/2023")).unwrap();
        std::fs::write(tmp.path().join("photos/2023/beach.jpg"), b"jpeg").unwrap();
        std::fs::write(tmp.path().join("readme"), b"hi").unwrap();

        let report = reconcile(&storage).await.unwrap();
        assert_eq!(report, IndexReport { dirs: 2, files: 2, pruned: 0 });

        let photo = storage.files().get("/photos/2023/beach.jpg").await.unwrap().unwrap();
        assert_eq!(photo.size, 4);
        assert_eq!(photo.ext, "jpg");
        let parent = storage.repo().get_dir("/photos/2023/").await.unwrap().unwrap();
        assert_eq!(photo.parent_id(), Some(parent.id));
    }

    #[tokio::test]
    async fn test_prunes_missing_rows() {
        let (tmp, storage) = storage();
        let mut file = storage.file("gone/soon.txt").unwrap();
        storage.files().write(&mut file, b"bye").await.unwrap();
        std::fs::remove_dir_all(tmp.path().join("gone")).unwrap();

        let report = reconcile(&storage).await.unwrap();
        assert_eq!(report.pruned, 2);
        assert!(storage.repo().get_file("/gone/soon.txt").await.unwrap().is_none());
        assert!(storage.repo().get_dir("/gone/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keeps_existing_identity() {
        let (_tmp, storage) = storage();
        let mut dir = storage.dir("kept").unwrap();
        storage.dirs().save(&mut dir).await.unwrap();

        reconcile(&storage).await.unwrap();
        let row = storage.repo().get_dir("/kept/").await.unwrap().unwrap();
        assert_eq!(Some(row.id), dir.meta().id);
    }
}
