pub mod memory;
pub mod models;
pub mod pg;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use uuid::Uuid;

pub type DbPool = Pool<Postgres>;

pub use memory::MemoryNodeRepository;
pub use models::{DirRecord, FileRecord, NewDir, NewFile};
pub use pg::PgNodeRepository;

/// Value of `DATABASE_URL` that selects the in-process store.
pub const MEMORY_URL: &str = "memory";

/// Metadata persistence boundary keyed by relpath.
///
/// Directory relpaths end with `/`; both tables are unique on relpath.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get_dir(&self, relpath: &str) -> anyhow::Result<Option<DirRecord>>;

    /// Insert, or update the row that already holds `dir.relpath`.
    async fn upsert_dir(&self, dir: &NewDir) -> anyhow::Result<DirRecord>;

    async fn delete_dir(&self, relpath: &str) -> anyhow::Result<bool>;

    async fn get_file(&self, relpath: &str) -> anyhow::Result<Option<FileRecord>>;

    async fn upsert_file(&self, file: &NewFile) -> anyhow::Result<FileRecord>;

    async fn delete_file(&self, relpath: &str) -> anyhow::Result<bool>;

    /// Move the row at `old` to `new`.
    ///
    /// For directory paths every descendant dir and file row is rewritten
    /// as well. Stale rows already sitting at the destination are dropped.
    /// `parent_id` re-links the moved row; `None` keeps its parent.
    /// Returns the number of rows rewritten.
    async fn relocate(&self, old: &str, new: &str, parent_id: Option<Uuid>) -> anyhow::Result<u64>;

    async fn subdirectories(&self, parent_id: Uuid) -> anyhow::Result<Vec<DirRecord>>;

    async fn files_in(&self, parent_id: Uuid) -> anyhow::Result<Vec<FileRecord>>;

    async fn dir_paths(&self) -> anyhow::Result<Vec<String>>;

    async fn file_paths(&self) -> anyhow::Result<Vec<String>>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations using SQLx's built-in migration tracking.
/// Migrations are tracked in the `_sqlx_migrations` table and only run once.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Open the repository selected by `database_url`.
///
/// `memory` gives a process-local store; anything else is a PostgreSQL URL
/// whose migrations are applied before returning.
pub async fn open_repository(database_url: &str) -> anyhow::Result<Arc<dyn NodeRepository>> {
    if database_url == MEMORY_URL {
        tracing::warn!("using in-memory metadata store, rows are lost on exit");
        return Ok(Arc::new(MemoryNodeRepository::default()));
    }

    let pool = create_pool(database_url).await?;
    tracing::info!("checking database migrations...");
    run_migrations(&pool).await?;
    Ok(Arc::new(PgNodeRepository::new(pool)))
}

/// Rewrite `path` from the `old` prefix to the `new` one, if it has it.
pub(crate) fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    path.strip_prefix(old).map(|rest| format!("{}{}", new, rest))
}
