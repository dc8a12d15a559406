use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trimurl::config::Config;
use trimurl::models::OriginalUrl;
use trimurl::owner::OwnerTokens;
use trimurl::repository::Repository;
use trimurl::service::{Resolution, ShortenOutcome, UrlShortener};
use trimurl::storage::Storage;

#[derive(Parser)]
#[command(name = "trimurl")]
#[command(about = "Shorten, resolve and manage URLs", long_about = None)]
struct Cli {
    /// Owner token from `trimurl owner`; anonymous when absent
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shorten one URL
    Shorten {
        url: String,
    },
    /// Shorten a JSON array of {"correlation_id", "original_url"} entries
    Batch {
        file: PathBuf,
    },
    /// Print the long URL behind an alias
    Resolve {
        alias: String,
    },
    /// List the owner's live short URLs
    List,
    /// Soft-delete aliases owned by the token holder
    Delete {
        #[arg(required = true)]
        aliases: Vec<String>,
    },
    /// Mint a new owner and print its token
    Owner,
    /// Check the storage backend
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("Loaded configuration");

    let tokens = OwnerTokens::new(config.owner.secret_key.as_deref());
    let owner_id = match cli.token.as_deref() {
        Some(token) => tokens
            .verify(token)
            .context("Owner token is invalid or was signed with another key")?,
        None => String::new(),
    };

    let repository: Arc<dyn Storage> = Arc::new(
        Repository::open(&config.storage)
            .await
            .context("Failed to open repository")?,
    );

    let service = UrlShortener::new(
        Arc::clone(&repository),
        &config.shortener,
        &config.deletion,
    )?;

    let outcome = run(cli.command, &service, &tokens, &owner_id).await;

    service.shutdown().await;
    repository
        .close()
        .await
        .context("Failed to close repository")?;

    outcome
}

async fn run(
    command: Commands,
    service: &UrlShortener,
    tokens: &OwnerTokens,
    owner_id: &str,
) -> Result<()> {
    match command {
        Commands::Shorten { url } => match service.shorten_url(&url, owner_id).await? {
            ShortenOutcome::Created(short_url) => println!("{}", short_url),
            ShortenOutcome::AlreadyExists(short_url) => {
                println!("{}", short_url);
                eprintln!("⚠ URL was already shortened");
            }
        },
        Commands::Batch { file } => {
            let contents = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let entries: Vec<OriginalUrl> = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a JSON array of entries", file.display()))?;

            let shortened = service.store_batch_url(&entries, owner_id).await?;
            println!("{}", serde_json::to_string_pretty(&shortened)?);
        }
        Commands::Resolve { alias } => match service.find_by_shortened(&alias).await? {
            Resolution::Active(long_url) => println!("{}", long_url),
            Resolution::Gone => bail!("alias '{}' has been deleted", alias),
        },
        Commands::List => {
            if owner_id.is_empty() {
                bail!("--token is required to list URLs");
            }
            let urls = service.find_by_user_id(owner_id).await?;
            if urls.is_empty() {
                println!("No URLs found.");
            } else {
                println!("{:<40} {}", "Short URL", "Original URL");
                println!("{}", "-".repeat(80));
                for url in urls {
                    println!("{:<40} {}", url.short_url, url.original_url);
                }
            }
        }
        Commands::Delete { aliases } => {
            if owner_id.is_empty() {
                bail!("--token is required to delete URLs");
            }
            let count = aliases.len();
            service.delete_batch(aliases, owner_id).await;
            println!("✓ Queued {} aliases for deletion", count);
        }
        Commands::Owner => {
            let (owner_id, token) = tokens.create(service.storage().as_ref()).await?;
            println!("Owner: {}", owner_id);
            println!("Token: {}", token);
        }
        Commands::Ping => {
            service.ping_db().await?;
            println!("✓ Storage is reachable");
        }
    }

    Ok(())
}
