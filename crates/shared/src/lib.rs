// Public modules
pub mod compliance;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod draft;
pub mod embedding;
pub mod error;
pub mod factcheck;
pub mod illustration;
pub mod io;
pub mod llm;
pub mod markdown;
pub mod models;
pub mod orchestrator;
pub mod publisher;
pub mod retry;
pub mod scoring;
pub mod store;

// Re-export commonly used types
pub use compliance::{final_check, validate, ComplianceFixer};
pub use config::Config;
pub use dedup::{DedupEngine, DuplicateCheck, MatchType};
pub use discovery::{Discovery, DiscoveryReport};
pub use draft::{ContentPlan, DraftGenerator, DraftResult};
pub use embedding::{EmbeddingService, OpenAiEmbedder};
pub use error::{ClientError, PipelineError};
pub use factcheck::{FactChecker, HttpPageFetcher, PageFetcher};
pub use illustration::{IllustrationService, OpenAiIllustrator};
pub use io::{default_database_path, get_default_output_dir, save_markdown};
pub use llm::{ClaudeClient, CompletionService, SearchService};
pub use models::{Challenge, Issue, Lead, NewIssue, ValidationResult};
pub use orchestrator::{Orchestrator, PipelineServices, PublishOutcome};
pub use publisher::{DocumentPublisher, HtmlFilePublisher, HttpDocumentPublisher};
pub use scoring::LeadScorer;
pub use store::{SqliteStore, Store};
