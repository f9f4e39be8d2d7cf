use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::{
    get_default_output_dir, save_markdown, ClaudeClient, Config, DocumentPublisher,
    HtmlFilePublisher, HttpDocumentPublisher, HttpPageFetcher, IllustrationService, NewIssue,
    OpenAiIllustrator, Orchestrator, PipelineServices, SqliteStore, Store,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "publish-issue")]
#[command(about = "Assemble, draft, check and publish a newsletter issue")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage reader challenges
    Challenge {
        #[command(subcommand)]
        action: ChallengeAction,
    },
    /// Create an issue from selected leads
    Create {
        /// Lead id of the main story
        #[arg(short, long)]
        main: i64,
        #[arg(short, long)]
        secondary: Option<i64>,
        /// Quick hit lead id (repeatable)
        #[arg(short, long)]
        quick: Vec<i64>,
        #[arg(short, long)]
        challenge: Option<i64>,
        /// Issue number; defaults to the next free one
        #[arg(short, long)]
        number: Option<i64>,
    },
    /// List issues
    List,
    /// Run the full publish pipeline for an issue
    Run {
        issue_id: i64,
        /// Where the local publisher and markdown export write files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Inspect the saved draft of an issue
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
}

#[derive(Subcommand)]
enum ChallengeAction {
    Add {
        #[arg(short, long)]
        title: String,
        #[arg(short, long)]
        description: String,
        #[arg(short, long, default_value = "general")]
        kind: String,
    },
    List,
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum DraftAction {
    Show { issue_id: i64 },
    Versions { issue_id: i64 },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_services(config: &Config, store: Arc<dyn Store>, output_dir: PathBuf) -> Result<PipelineServices> {
    let claude = Arc::new(ClaudeClient::new(
        &config.anthropic_api_key,
        &config.completion_model,
    )?);

    let publisher: Arc<dyn DocumentPublisher> = match config.document_service_url.as_deref() {
        Some(url) => Arc::new(HttpDocumentPublisher::new(
            Some(url),
            config.document_service_token.as_deref(),
        )?),
        None => {
            println!("  (No DOCUMENT_SERVICE_URL, writing HTML to {})", output_dir.display());
            Arc::new(HtmlFilePublisher::new(output_dir))
        }
    };

    let illustrator: Option<Arc<dyn IllustrationService>> =
        match OpenAiIllustrator::new(config.openai_api_key.as_deref()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                println!("  (Skipping illustration: {})", e);
                None
            }
        };

    Ok(PipelineServices {
        store,
        llm: claude.clone(),
        search: claude,
        fetcher: Arc::new(HttpPageFetcher::new()?),
        illustrator,
        publisher,
    })
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
        Command::Challenge { action } => match action {
            ChallengeAction::Add {
                title,
                description,
                kind,
            } => {
                let challenge = store.insert_challenge(&title, &description, &kind)?;
                println!("✓ Added challenge #{}: {}", challenge.id, challenge.title);
            }
            ChallengeAction::List => {
                let challenges = store.list_challenges()?;
                if challenges.is_empty() {
                    println!("No challenges yet.");
                }
                for c in challenges {
                    println!("#{:<4} [{}] {}", c.id, c.kind, c.title);
                    println!("       {}", c.description);
                }
            }
            ChallengeAction::Delete { id } => {
                if store.delete_challenge(id)? {
                    println!("✓ Deleted challenge #{}", id);
                } else {
                    println!("⚠ No challenge #{}", id);
                }
            }
        },
        Command::Create {
            main,
            secondary,
            quick,
            challenge,
            number,
        } => {
            if store.get_lead(main)?.is_none() {
                anyhow::bail!("Lead #{} does not exist", main);
            }
            let issue_number = match number {
                Some(n) => n,
                None => store.next_issue_number()?,
            };
            let issue = store.create_issue(&NewIssue {
                issue_number,
                main_story_id: main,
                secondary_story_id: secondary,
                challenge_id: challenge,
                quick_link_ids: quick,
            })?;
            println!("✓ Created issue #{} (id {})", issue.issue_number, issue.id);
        }
        Command::List => {
            let issues = store.list_issues()?;
            if issues.is_empty() {
                println!("No issues yet.");
            }
            for issue in issues {
                let status = match (&issue.document_url, issue.published_at) {
                    (Some(url), Some(at)) => format!("published {} → {}", at.format("%Y-%m-%d"), url),
                    _ => "unpublished".to_string(),
                };
                println!(
                    "Issue #{:<4} (id {}) main={} quick={} · {}",
                    issue.issue_number,
                    issue.id,
                    issue
                        .main_story_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    issue.quick_link_ids.len(),
                    status
                );
            }
        }
        Command::Run {
            issue_id,
            output_dir,
        } => {
            let output_dir = match output_dir {
                Some(dir) => dir,
                None => get_default_output_dir()?,
            };

            println!("\n🗞  Publishing issue id {}...", issue_id);
            let services = build_services(&config, store.clone(), output_dir.clone())?;
            let orchestrator = Orchestrator::new(services);

            println!("🤖 Researching, drafting and checking (this may take a few minutes)...");
            let outcome = orchestrator.run(issue_id).await;

            if !outcome.warnings.is_empty() {
                println!("\n⚠ {} warnings:", outcome.warnings.len());
                for warning in &outcome.warnings {
                    println!("  - {}", warning);
                }
            }

            let seconds = outcome.duration.as_secs_f64();
            match (&outcome.document_url, &outcome.error) {
                (Some(url), _) if outcome.success => {
                    println!(
                        "\n✓ Published in {:.1}s ({} draft attempts, {} compliance fixes)",
                        seconds, outcome.draft_attempts, outcome.fix_attempts
                    );
                    println!("  {}", url);

                    if let (Some(issue), Some(draft)) =
                        (store.get_issue(issue_id)?, store.get_draft(issue_id)?)
                    {
                        let path = save_markdown(&output_dir, issue.issue_number, &draft.markdown)?;
                        println!("✓ Markdown saved to: {}", path.display());
                    }
                }
                (_, error) => {
                    let message = error.clone().unwrap_or_else(|| "unknown error".to_string());
                    println!("\n✗ Publish failed after {:.1}s", seconds);
                    anyhow::bail!(message);
                }
            }
        }
        Command::Draft { action } => match action {
            DraftAction::Show { issue_id } => match store.get_draft(issue_id)? {
                Some(draft) => {
                    println!(
                        "Draft for issue id {} ({}, updated {})\n",
                        issue_id,
                        draft.status.as_str(),
                        draft.updated_at.format("%Y-%m-%d %H:%M")
                    );
                    println!("{}", draft.markdown);
                }
                None => println!("No draft saved for issue id {}", issue_id),
            },
            DraftAction::Versions { issue_id } => {
                let versions = store.draft_versions(issue_id)?;
                if versions.is_empty() {
                    println!("No published versions for issue id {}", issue_id);
                }
                for v in versions {
                    println!(
                        "v{} · {} · {} chars",
                        v.version,
                        v.created_at.format("%Y-%m-%d %H:%M"),
                        v.markdown.len()
                    );
                }
            }
        },
    }

    Ok(())
}
