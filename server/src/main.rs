//! mfs storage server (mfsd)

use clap::{Parser, Subcommand};
use mfs::api::{self, AppState};
use mfs::auth::{create_identity_token, GrantTable, User};
use mfs::config::Config;
use mfs::storage::{self, Storage};
use mfs::{db, PathNormalizer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mfsd")]
#[command(about = "mfs virtual file storage server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server in the foreground
    Serve,
    /// Run database migrations
    Migrate,
    /// Write the initial grant table
    Init {
        /// Overwrite an existing table
        #[arg(long)]
        force: bool,
    },
    /// Reconcile metadata rows with the files on disk
    Index,
    /// Mint an identity token for local testing
    Token {
        username: String,
        #[arg(long)]
        staff: bool,
        #[arg(long)]
        superuser: bool,
        /// Validity in hours
        #[arg(long, default_value_t = 12)]
        hours: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mfsd=info,mfs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => run_server(config).await?,
        Commands::Migrate => run_migrations(&config).await?,
        Commands::Init { force } => init_grants(&config, force).await?,
        Commands::Index => index_files(&config).await?,
        Commands::Token {
            username,
            staff,
            superuser,
            hours,
        } => {
            let user = User {
                is_staff: staff,
                is_superuser: superuser,
                ..User::new(username)
            };
            let token =
                create_identity_token(&config.jwt_secret, &user, chrono::Duration::hours(hours))?;
            println!("{}", token);
        }
    }

    Ok(())
}

async fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    let repo = db::open_repository(&config.database_url).await?;
    let paths = PathNormalizer::new(&config.default_dir, config.default_ext.as_deref())?;
    let storage = Storage::new(&config.base_dir, paths, repo);
    storage.prepare_root().await?;
    Ok(storage)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let storage = open_storage(&config).await?;
    let grants = GrantTable::load(&config.grants_file).await?;

    tracing::info!(
        base_dir = %config.base_dir.display(),
        base_url = %config.base_url,
        "file tree ready"
    );

    let rest_addr: SocketAddr = format!("0.0.0.0:{}", config.rest_port).parse()?;
    let app_state = AppState::new(config, storage, Arc::new(grants));
    api::rest::serve(rest_addr, app_state).await
}

async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    if config.database_url == db::MEMORY_URL {
        println!("in-memory store selected, nothing to migrate");
        return Ok(());
    }
    println!("running migrations...");
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    println!("migrations complete");
    Ok(())
}

async fn init_grants(config: &Config, force: bool) -> anyhow::Result<()> {
    if GrantTable::write_initial(&config.grants_file, force).await? {
        println!("grant table written to {}", config.grants_file.display());
    } else {
        println!(
            "grant table {} already exists (use --force to overwrite)",
            config.grants_file.display()
        );
    }
    Ok(())
}

async fn index_files(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(config).await?;
    let report = storage::reconcile(&storage).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
