//! PostgreSQL node repository
//!
//! Rows are unique on `relpath`; upserts use `ON CONFLICT (relpath)` so that
//! saving a node whose path already has a row adopts that row's id.

use super::{DbPool, DirRecord, FileRecord, NewDir, NewFile, NodeRepository};
use async_trait::async_trait;
use uuid::Uuid;

const DIR_COLUMNS: &str = "id, relpath, visibility, parent_id, created_at, updated_at";
const FILE_COLUMNS: &str =
    "id, relpath, visibility, parent_id, size_bytes, ext, created_at, updated_at";

pub struct PgNodeRepository {
    pool: DbPool,
}

impl PgNodeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl NodeRepository for PgNodeRepository {
    async fn get_dir(&self, relpath: &str) -> anyhow::Result<Option<DirRecord>> {
        let dir = sqlx::query_as::<_, DirRecord>(&format!(
            "SELECT {} FROM dirs WHERE relpath = $1",
            DIR_COLUMNS
        ))
        .bind(relpath)
        .fetch_optional(&self.pool)
        .await?;

        Ok(dir)
    }

    async fn upsert_dir(&self, dir: &NewDir) -> anyhow::Result<DirRecord> {
        let record = sqlx::query_as::<_, DirRecord>(&format!(
            r#"
            INSERT INTO dirs (id, relpath, visibility, parent_id)
            VALUES ($1, $2, COALESCE($3, 0::SMALLINT), $4)
            ON CONFLICT (relpath)
            DO UPDATE SET
                visibility = COALESCE($3, dirs.visibility),
                parent_id = COALESCE($4, dirs.parent_id),
                updated_at = NOW()
            RETURNING {}
            "#,
            DIR_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&dir.relpath)
        .bind(dir.visibility)
        .bind(dir.parent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_dir(&self, relpath: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM dirs WHERE relpath = $1")
            .bind(relpath)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_file(&self, relpath: &str) -> anyhow::Result<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files WHERE relpath = $1",
            FILE_COLUMNS
        ))
        .bind(relpath)
        .fetch_optional(&self.pool)
        .await?;

        Ok(file)
    }

    async fn upsert_file(&self, file: &NewFile) -> anyhow::Result<FileRecord> {
        let record = sqlx::query_as::<_, FileRecord>(&format!(
            r#"
            INSERT INTO files (id, relpath, visibility, parent_id, size_bytes, ext)
            VALUES ($1, $2, COALESCE($3, 0::SMALLINT), $4, $5, $6)
            ON CONFLICT (relpath)
            DO UPDATE SET
                visibility = COALESCE($3, files.visibility),
                parent_id = $4,
                size_bytes = $5,
                ext = $6,
                updated_at = NOW()
            RETURNING {}
            "#,
            FILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&file.relpath)
        .bind(file.visibility)
        .bind(file.parent_id)
        .bind(file.size_bytes)
        .bind(&file.ext)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_file(&self, relpath: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE relpath = $1")
            .bind(relpath)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn relocate(&self, old: &str, new: &str, parent_id: Option<Uuid>) -> anyhow::Result<u64> {
        // Transaction since we are updating multiple rows potentially
        let mut tx = self.pool.begin().await?;
        let mut moved = 0;

        if old.ends_with('/') {
            // LEFT/SUBSTRING count characters, not bytes
            let old_len = old.chars().count() as i32;
            let new_len = new.chars().count() as i32;

            // Stale rows at the destination (the physical tree said it was free)
            for table in ["files", "dirs"] {
                sqlx::query(&format!(
                    "DELETE FROM {} WHERE LEFT(relpath, $2) = $1 AND LEFT(relpath, $4) <> $3",
                    table
                ))
                .bind(new)
                .bind(new_len)
                .bind(old)
                .bind(old_len)
                .execute(&mut *tx)
                .await?;
            }

            for table in ["files", "dirs"] {
                let result = sqlx::query(&format!(
                    r#"
                    UPDATE {}
                    SET relpath = $1 || SUBSTRING(relpath FROM $2 + 1), updated_at = NOW()
                    WHERE LEFT(relpath, $2) = $3
                    "#,
                    table
                ))
                .bind(new)
                .bind(old_len)
                .bind(old)
                .execute(&mut *tx)
                .await?;
                moved += result.rows_affected();
            }

            if let Some(parent_id) = parent_id {
                sqlx::query("UPDATE dirs SET parent_id = $2 WHERE relpath = $1")
                    .bind(new)
                    .bind(parent_id)
                    .execute(&mut *tx)
                    .await?;
            }
        } else {
            sqlx::query("DELETE FROM files WHERE relpath = $1")
                .bind(new)
                .execute(&mut *tx)
                .await?;

            let result = sqlx::query(
                r#"
                UPDATE files
                SET relpath = $2, parent_id = COALESCE($3, parent_id), updated_at = NOW()
                WHERE relpath = $1
                "#,
            )
            .bind(old)
            .bind(new)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
            moved += result.rows_affected();
        }

        tx.commit().await?;
        tracing::debug!(old, new, moved, "relocated metadata rows");
        Ok(moved)
    }

    async fn subdirectories(&self, parent_id: Uuid) -> anyhow::Result<Vec<DirRecord>> {
        let dirs = sqlx::query_as::<_, DirRecord>(&format!(
            "SELECT {} FROM dirs WHERE parent_id = $1 ORDER BY relpath",
            DIR_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(dirs)
    }

    async fn files_in(&self, parent_id: Uuid) -> anyhow::Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {} FROM files WHERE parent_id = $1 ORDER BY relpath",
            FILE_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(files)
    }

    async fn dir_paths(&self) -> anyhow::Result<Vec<String>> {
        let paths = sqlx::query_scalar("SELECT relpath FROM dirs ORDER BY relpath")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    async fn file_paths(&self) -> anyhow::Result<Vec<String>> {
        let paths = sqlx::query_scalar("SELECT relpath FROM files ORDER BY relpath")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }
}
