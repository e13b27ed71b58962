use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use content_loader::{ContentLoader, FetchOutcome, Fetcher, LoaderConfig, NewSource, SqliteStore, SpoutParams, WebClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Pulls items from the configured sources into the local store.
#[derive(Parser, Debug)]
#[command(name = "content-loader")]
#[command(version)]
#[command(about = "Fetch, clean and store items from feeds and link aggregators", long_about = None)]
struct Cli {
    /// SQLite database, defaults to $DATABASE_URL or sqlite://data/content.db
    #[arg(long)]
    database_url: Option<String>,

    /// Directory holding the thumbnails/ and favicons/ caches
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update every due source, then clean up
    Update,

    /// Update one source by id, then clean up
    UpdateOne { id: i64 },

    /// Register a new source
    AddSource {
        #[arg(long)]
        title: String,

        #[arg(long)]
        spout: String,

        /// Spout parameter as key=value, repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Comma separated tags
        #[arg(long, default_value = "")]
        tags: String,

        #[arg(long)]
        filter: Option<String>,
    },

    /// Print the title a source reports for itself
    Title {
        spout: String,

        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// List the available spout types and their parameters
    Spouts,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = LoaderConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let database_url = cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite://data/content.db".to_string());

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let store = Arc::new(
        SqliteStore::new(&database_url)
            .await
            .with_context(|| format!("opening store {}", database_url))?,
    );
    let client: Arc<dyn WebClient> = Arc::new(Fetcher::new(config.fetch.clone())?);
    let loader = ContentLoader::new(config, client, store.clone());

    match cli.command {
        Commands::Update => {
            let summary = loader.update_all().await?;
            info!(
                "{} sources: {} fetched, {} failed, {} skipped, {} new items",
                summary.sources, summary.fetched, summary.failed, summary.skipped, summary.inserted
            );
        }
        Commands::UpdateOne { id } => match loader.update_one(id).await? {
            FetchOutcome::Failed(message) => {
                error!("source {} failed: {}", id, message);
                bail!(message);
            }
            outcome => info!("source {}: {:?}", id, outcome),
        },
        Commands::AddSource {
            title,
            spout,
            params,
            tags,
            filter,
        } => {
            if !loader.available_spouts().iter().any(|info| info.spout_type == spout) {
                bail!("unknown spout: {}", spout);
            }

            let source = NewSource {
                title,
                tags: tags
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect(),
                spout,
                params: params.into_iter().collect::<SpoutParams>(),
                filter: filter.filter(|f| !f.trim().is_empty()),
            };
            let id = store.add_source(&source).await?;
            println!("{}", id);
        }
        Commands::Title { spout, params } => {
            let params: SpoutParams = params.into_iter().collect();
            match loader.fetch_title(&spout, &params).await {
                Some(title) => println!("{}", title),
                None => bail!("no title available"),
            }
        }
        Commands::Spouts => {
            println!("{}", serde_json::to_string_pretty(&loader.available_spouts())?);
        }
    }

    Ok(())
}
