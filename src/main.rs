use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use pagekeep::accumulator::{self, ResponseHandler};
use pagekeep::config::resolve_config;
use pagekeep::envelope::{read_body, ResponseEnvelope};
use pagekeep::resource::ArrayField;
use pagekeep::EnvironmentStore;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser)]
#[command(
    name = "pagekeep",
    about = "Accumulate paginated API responses in a request-runner environment",
    version
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply one response to the environment.
    Handle {
        /// Resource kind (see `pagekeep kinds`).
        #[arg(short, long)]
        kind: String,

        /// HTTP status code of the response.
        #[arg(long, default_value_t = 200)]
        status: u16,

        /// HTTP reason phrase of the response.
        #[arg(long, default_value = "OK")]
        status_text: String,

        /// File holding the response body; `-` or omitted reads stdin.
        body: Option<PathBuf>,
    },

    /// Print the accumulated items and cursor as JSON.
    Show {
        #[arg(short, long)]
        kind: String,
    },

    /// Drop the accumulated items and cursor.
    Reset {
        #[arg(short, long)]
        kind: String,
    },

    /// List configured resource kinds and their environment keys.
    Kinds,

    /// Print one environment value, decrypting the credential if sealed.
    Get {
        /// Environment key (e.g. `JWT`).
        key: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagekeep=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = resolve_config(cli.config.as_deref(), Path::new("."), |name| {
        std::env::var(name).ok()
    })?;
    let registry = config.registry();

    match cli.command {
        Commands::Handle {
            kind,
            status,
            status_text,
            body,
        } => {
            let resource = registry.require(&kind)?;
            let raw = read_body(body.as_deref(), std::io::stdin())?;
            let envelope = ResponseEnvelope::from_raw(status, status_text, &raw);
            let store = config.open_store()?;

            let outcome = ResponseHandler::new(&store)
                .with_credential_key(config.store.credential_key.clone())
                .handle(&envelope, resource);
            debug!(kind = %resource.name, outcome = ?outcome, "Response handled");
        }
        Commands::Show { kind } => {
            let resource = registry.require(&kind)?;
            let store = config.open_store()?;
            let snapshot = accumulator::snapshot(&store, resource)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Reset { kind } => {
            let resource = registry.require(&kind)?;
            let store = config.open_store()?;
            accumulator::clear(&store, resource)?;
            info!(
                kind = %resource.name,
                accumulator = %resource.accumulator_key,
                cursor = %resource.cursor_key,
                "Pagination state cleared"
            );
        }
        Commands::Kinds => {
            for resource in registry.iter() {
                let items_from = match &resource.array_field {
                    ArrayField::Envelope => "<body>".to_string(),
                    ArrayField::Named(field) => field.clone(),
                };
                println!(
                    "{:<20} {:<12} {:<22} {}",
                    resource.name, items_from, resource.accumulator_key, resource.cursor_key
                );
            }
        }
        Commands::Get { key } => {
            let store = config.open_store()?;
            let value = store.get(&key)?.ok_or_else(|| anyhow!("{} is not set", key))?;
            println!("{}", value);
        }
    }

    Ok(())
}
