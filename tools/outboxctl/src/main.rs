//! outboxctl - operator CLI for the event outbox
//!
//! - List and inspect dead events
//! - Requeue a dead event for another round of delivery
//! - Show event counts per status

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use outbox::{OutboxAdmin, OutboxEvent, PgOutboxStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Outbox operations
#[derive(Parser, Debug)]
#[command(name = "outboxctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Postgres connection string for the outbox database
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dead event commands
    Dead(DeadArgs),

    /// Show a single event
    Show {
        event_id: Uuid,
    },

    /// Move a dead event back to pending with a fresh attempt budget
    Requeue {
        event_id: Uuid,
    },

    /// Event counts per status
    Stats,
}

#[derive(Args, Debug)]
struct DeadArgs {
    #[command(subcommand)]
    command: DeadCommands,
}

#[derive(Subcommand, Debug)]
enum DeadCommands {
    /// List dead events, oldest first
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&cli.database_url)
        .await
        .context("Failed to connect to database")?;

    let admin = OutboxAdmin::new(Arc::new(PgOutboxStore::new(pool.clone())));
    let result = run(&admin, cli.command, cli.json).await;

    pool.close().await;
    result
}

async fn run(admin: &OutboxAdmin, command: Commands, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Dead(DeadArgs {
            command: DeadCommands::List { limit },
        }) => {
            let events = admin.list_dead(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No dead events");
            } else {
                println!("{:<36}  {:<24}  {:>8}  LAST ERROR", "EVENT ID", "TYPE", "ATTEMPTS");
                for event in &events {
                    println!(
                        "{:<36}  {:<24}  {:>8}  {}",
                        event.event_id,
                        event.event_type,
                        event.attempts,
                        event.last_error.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Show { event_id } => {
            let event = admin.show(event_id).await?;
            print_event(&event, json)?;
        }
        Commands::Requeue { event_id } => {
            let event = admin
                .requeue(event_id)
                .await
                .with_context(|| format!("Failed to requeue {event_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&event)?);
            } else {
                println!("Requeued {} ({})", event.event_id, event.event_type);
            }
        }
        Commands::Stats => {
            let counts = admin.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                println!("pending     {}", counts.pending);
                println!("publishing  {}", counts.publishing);
                println!("published   {}", counts.published);
                println!("dead        {}", counts.dead);
                println!("total       {}", counts.total());
            }
        }
    }
    Ok(())
}

fn print_event(event: &OutboxEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(event)?);
        return Ok(());
    }

    println!("event_id:        {}", event.event_id);
    println!("event_type:      {}", event.event_type);
    println!("status:          {}", event.status);
    println!("attempts:        {}", event.attempts);
    println!("next_attempt_at: {}", event.next_attempt_at);
    println!("created_at:      {}", event.created_at);
    println!("updated_at:      {}", event.updated_at);
    if let Some(published_at) = event.published_at {
        println!("published_at:    {published_at}");
    }
    if let Some(error) = &event.last_error {
        println!("last_error:      {error}");
    }
    println!("payload:\n{}", serde_json::to_string_pretty(&event.payload)?);
    Ok(())
}
