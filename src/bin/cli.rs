//! Mnemos CLI
//!
//! Exercises the memory core from the command line:
//! mnemos-cli remember athena "architecture decision: adopt queue X" --importance 0.9

use std::collections::HashMap;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemos::config::Settings;
use mnemos::types::{MemoryContent, MemoryKind};
use mnemos::MemoryManager;

#[derive(Parser, Debug)]
#[command(name = "mnemos-cli")]
#[command(about = "Persona-scoped tiered memory service", version)]
struct Args {
    /// Durable database path
    #[arg(long, env = "MNEMOS_DURABLE_PATH")]
    db_path: Option<String>,

    /// Require tokens on every operation
    #[arg(long, env = "MNEMOS_AUTH_ENABLED")]
    auth: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a memory for a persona
    Remember {
        persona: String,
        content: String,
        /// working, episodic, semantic, or procedural (inferred when absent)
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 0.5)]
        importance: f32,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        token: Option<String>,
    },
    /// Search a persona's memories
    Recall {
        persona: String,
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Skip the semantic tiers
        #[arg(long)]
        no_semantic: bool,
        #[arg(long)]
        token: Option<String>,
    },
    /// Fetch one memory by id
    Get {
        id: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete a memory by id
    Delete {
        id: String,
        #[arg(long)]
        token: Option<String>,
    },
    /// Copy matching memories from one persona to another
    Share {
        from: String,
        to: String,
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        token: Option<String>,
    },
    /// Issue a token for a persona
    Authenticate { persona: String },
    /// Run one consolidation pass for a persona
    Consolidate { persona: String },
    /// Run one forgetting-curve pass for a persona
    Prune { persona: String },
    /// Service statistics
    Stats,
    /// Backend health
    Health,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|d| {
            d.join("mnemos")
                .join("mnemos.db")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "mnemos.db".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env();
    settings.durable_path = args.db_path.unwrap_or_else(default_db_path);
    settings.auth_enabled = settings.auth_enabled || args.auth;
    // The CLI is one-shot; background loops belong to long-running hosts
    settings.lifecycle_enabled = false;

    let manager = MemoryManager::new(settings).context("Failed to build memory manager")?;
    if !manager.initialize().await? {
        anyhow::bail!("Durable backend unavailable");
    }

    match args.command {
        Command::Remember {
            persona,
            content,
            kind,
            importance,
            tags,
            token,
        } => {
            let kind = kind
                .map(|k| k.parse::<MemoryKind>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let item = manager
                .remember(
                    token.as_deref(),
                    &persona,
                    MemoryContent::Text(content),
                    kind,
                    importance,
                    tags,
                    HashMap::new(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Recall {
            persona,
            query,
            limit,
            no_semantic,
            token,
        } => {
            let results = manager
                .recall(token.as_deref(), &persona, &query, limit, !no_semantic)
                .await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Get { id, token } => match manager.retrieve_by_id(token.as_deref(), &id).await? {
            Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
            None => return Err(mnemos::MemoryError::NotFound(id).into()),
        },
        Command::Delete { id, token } => {
            let found = manager.delete(token.as_deref(), &id).await?;
            println!("{}", serde_json::json!({ "deleted": found }));
        }
        Command::Share {
            from,
            to,
            query,
            limit,
            token,
        } => {
            let copied = manager
                .share(token.as_deref(), &from, &to, &query, limit)
                .await?;
            println!("{}", serde_json::json!({ "copied": copied }));
        }
        Command::Authenticate { persona } => {
            let issued = manager.authenticate(&persona, None)?;
            println!(
                "{}",
                serde_json::json!({
                    "token": issued.token,
                    "persona": issued.claims.persona,
                    "expires_at": issued.claims.expires_at,
                    "access_level": issued.claims.access_level,
                })
            );
        }
        Command::Consolidate { persona } => {
            let report = manager.consolidate_now(&persona).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Prune { persona } => {
            let report = manager.prune_now(&persona).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&manager.stats().await)?);
        }
        Command::Health => {
            let health = manager.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
    }

    manager.shutdown().await;
    Ok(())
}
