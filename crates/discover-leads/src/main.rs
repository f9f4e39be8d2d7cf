use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    ClaudeClient, Config, DedupEngine, Discovery, LeadScorer, OpenAiEmbedder, SqliteStore, Store,
};
use std::io::{self as stdio, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "discover-leads")]
#[command(about = "Find, dedup and score candidate stories for the newsletter")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search for new stories and persist the ones that score well
    Run {
        /// Search query (repeatable); defaults to DISCOVERY_QUERIES
        #[arg(short, long)]
        query: Vec<String>,
    },
    /// Add a story by hand, skipping the relevance judge
    Add {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        url: String,
        #[arg(short, long, default_value = "")]
        summary: String,
    },
    /// Show the most recent leads
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Delete one lead
    Delete { id: i64 },
    /// Delete every lead and detach them from issues
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(stdio::stderr)
        .init();
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N]: ", question);
    stdio::stdout().flush()?;

    let mut input = String::new();
    stdio::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn build_discovery(config: &Config, store: Arc<dyn Store>) -> Result<Discovery> {
    let claude = Arc::new(ClaudeClient::new(
        &config.anthropic_api_key,
        &config.completion_model,
    )?);
    let embedder = Arc::new(OpenAiEmbedder::new(
        config.openai_api_key.as_deref(),
        &config.embedding_model,
    )?);

    let dedup = DedupEngine::new(store.clone(), embedder);
    let scorer = LeadScorer::new(claude.clone());
    Ok(Discovery::new(claude, dedup, scorer, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&config.database_path).context("Failed to open newsletter database")?,
    );

    match args.command {
        Command::Run { query } => {
            let queries = if query.is_empty() {
                config.discovery_queries.clone()
            } else {
                query
            };
            let discovery = build_discovery(&config, store.clone())?;

            println!("\n🔍 Searching {} queries...", queries.len());
            let report = discovery.run(&queries).await?;
            if report.skipped {
                println!("⚠ A discovery run is already in progress");
                return Ok(());
            }

            println!("✓ Found {} unique candidates", report.candidates);
            println!("  Skipped {} roundups", report.roundups_skipped);
            println!("  Skipped {} duplicates", report.duplicates_skipped);
            println!("\n🤖 Scored {} candidates", report.scored);
            println!("✓ Saved {} new leads", report.persisted.len());

            for id in &report.persisted {
                if let Some(lead) = store.get_lead(*id)? {
                    println!("  [{}] {} ({})", lead.relevance_score, lead.title, lead.source);
                }
            }
        }
        Command::Add {
            title,
            url,
            summary,
        } => {
            let discovery = build_discovery(&config, store.clone())?;
            match discovery.add_manual(&title, &url, &summary).await? {
                Some(lead) => println!("✓ Added lead #{}: {}", lead.id, lead.title),
                None => println!("⚠ Already covered: {}", url),
            }
        }
        Command::List { limit } => {
            let leads = store.list_leads(limit)?;
            if leads.is_empty() {
                println!("No leads yet. Run `discover-leads run` first.");
                return Ok(());
            }

            println!("\n📋 {} leads\n", leads.len());
            for lead in leads {
                let manual = if lead.is_manual { " ✎" } else { "" };
                println!(
                    "#{:<4} [{:>3}] {}{}",
                    lead.id, lead.relevance_score, lead.title, manual
                );
                println!(
                    "       {} · {} · {}",
                    lead.source,
                    lead.fact_check_status.as_str(),
                    lead.created_at.format("%Y-%m-%d")
                );
                println!("       {}", lead.url);
            }
        }
        Command::Delete { id } => {
            if store.delete_lead(id)? {
                println!("✓ Deleted lead #{}", id);
            } else {
                println!("⚠ No lead #{}", id);
            }
        }
        Command::Clear { yes } => {
            if !yes && !confirm("Delete ALL leads?")? {
                println!("Cancelled.");
                return Ok(());
            }
            let removed = store.clear_leads()?;
            println!("✓ Cleared {} leads", removed);
        }
    }

    Ok(())
}
