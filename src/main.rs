use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stateless_files::config::Config;
use stateless_files::db::Database;
use stateless_files::error::AppError;
use stateless_files::models::{BackendKind, File};
use stateless_files::services::{Engine, FileRepository, SqliteRepository};
use stateless_files::storage::{copy_stream, StorageManager};

#[derive(Parser)]
#[command(name = "stateless-files")]
#[command(about = "Keep file copies consistent across local disk, object storage and a blob CDN")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to conf.toml / config.toml)
    #[arg(long, global = true, env = "SF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a local file and print its id
    Put {
        path: PathBuf,
        /// Display name (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Materialize a verified local copy
    EnsureLocal { id: String },
    /// Push a verified copy to a remote backend
    EnsureRemote {
        id: String,
        /// object-store or blob-cdn
        #[arg(long)]
        backend: BackendKind,
    },
    /// Print the public URL of the authoritative copy
    Url { id: String },
    /// Write the file's bytes to stdout or a file
    Cat {
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the file record as JSON
    Show { id: String },
}

async fn load(repository: &dyn FileRepository, id: &str) -> anyhow::Result<File> {
    repository
        .load_file(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", id)).into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stateless_files=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    tracing::info!("Configuration loaded");

    let db = Database::new(&config.database.path).await?;
    db.run_migrations().await?;

    let storage = Arc::new(StorageManager::from_config(&config)?);
    let repository = Arc::new(SqliteRepository::new(db));
    let engine = Engine::new(storage, repository.clone());

    match cli.command {
        Commands::Put { path, name } => {
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_owned)
                    .context("Can't derive a name from the path, pass --name")?,
            };
            let source = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let size = source.metadata().await?.len();

            let mut file = File::named(name);
            engine.put_stream(&mut file, Box::pin(source), Some(size)).await?;
            println!("{}", file.id.unwrap_or_default());
        }
        Commands::EnsureLocal { id } => {
            let mut file = load(repository.as_ref(), &id).await?;
            let key = engine.ensure_local(&mut file).await?;
            println!("{}", key);
        }
        Commands::EnsureRemote { id, backend } => {
            let mut file = load(repository.as_ref(), &id).await?;
            let key = engine.ensure_remote(&mut file, backend).await?;
            println!("{}", key);
        }
        Commands::Url { id } => {
            let file = load(repository.as_ref(), &id).await?;
            match engine.absolute_url(&file).await? {
                Some(url) => println!("{}", url),
                None => anyhow::bail!("File {} has no public url", id),
            }
        }
        Commands::Cat { id, out } => {
            let mut file = load(repository.as_ref(), &id).await?;
            let stream = engine.open_contents(&mut file).await?;
            let copied = match out {
                Some(out) => {
                    let mut target = tokio::fs::File::create(&out)
                        .await
                        .with_context(|| format!("Failed to create {}", out.display()))?;
                    copy_stream(stream, &mut target).await?
                }
                None => copy_stream(stream, &mut tokio::io::stdout()).await?,
            };
            tracing::debug!("Wrote {} bytes of file {}", copied, id);
        }
        Commands::Show { id } => {
            let file = load(repository.as_ref(), &id).await?;
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
    }

    Ok(())
}
