//! End-to-end publish run for one issue.
//!
//! Phases run in order. Resolving the main story, drafting, compliance and
//! publishing are fatal; fact-checking, illustration and the bookkeeping
//! after publishing only add warnings.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::compliance::{final_check, ComplianceFixer};
use crate::draft::{ContentPlan, DraftGenerator};
use crate::error::PipelineError;
use crate::factcheck::{FactChecker, PageFetcher};
use crate::illustration::{hero_prompt, GeneratedImage, IllustrationService};
use crate::llm::{CompletionService, SearchService};
use crate::markdown::{format_runs, parse};
use crate::models::{FactCheckStatus, Issue, Lead};
use crate::publisher::{split_subject, DocumentPublisher, PublishRequest};
use crate::store::Store;

/// Collaborators a publish run needs. Illustration is optional.
#[derive(Clone)]
pub struct PipelineServices {
    pub store: Arc<dyn Store>,
    pub llm: Arc<dyn CompletionService>,
    pub search: Arc<dyn SearchService>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub illustrator: Option<Arc<dyn IllustrationService>>,
    pub publisher: Arc<dyn DocumentPublisher>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub issue_id: i64,
    pub success: bool,
    pub document_url: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub draft_attempts: u32,
    pub fix_attempts: u32,
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct RunState {
    warnings: Vec<String>,
    draft_attempts: u32,
    fix_attempts: u32,
}

impl RunState {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

pub struct Orchestrator {
    services: PipelineServices,
    generator: DraftGenerator,
    fixer: ComplianceFixer,
    checker: FactChecker,
}

impl Orchestrator {
    pub fn new(services: PipelineServices) -> Self {
        let generator = DraftGenerator::new(services.llm.clone(), services.search.clone());
        let fixer = ComplianceFixer::new(services.llm.clone());
        let checker = FactChecker::new(services.fetcher.clone(), services.llm.clone());
        Self {
            services,
            generator,
            fixer,
            checker,
        }
    }

    /// Run every phase for `issue_id`. Never returns an error: a fatal phase
    /// ends the run and is reported in the outcome.
    pub async fn run(&self, issue_id: i64) -> PublishOutcome {
        let started = Instant::now();
        let mut state = RunState::default();
        info!(issue_id, "Publish run started");

        let result = self.run_phases(issue_id, &mut state).await;
        let duration = started.elapsed();

        match result {
            Ok(url) => {
                info!(issue_id, url = %url, elapsed_ms = duration.as_millis() as u64, "Issue published");
                PublishOutcome {
                    issue_id,
                    success: true,
                    document_url: Some(url),
                    error: None,
                    warnings: state.warnings,
                    draft_attempts: state.draft_attempts,
                    fix_attempts: state.fix_attempts,
                    duration,
                }
            }
            Err(e) => {
                error!(issue_id, error = %e, "Publish run failed");
                PublishOutcome {
                    issue_id,
                    success: false,
                    document_url: None,
                    error: Some(format!("{:#}", e)),
                    warnings: state.warnings,
                    draft_attempts: state.draft_attempts,
                    fix_attempts: state.fix_attempts,
                    duration,
                }
            }
        }
    }

    async fn run_phases(&self, issue_id: i64, state: &mut RunState) -> Result<String> {
        let store = self.services.store.as_ref();

        let (issue, mut plan) = self.resolve(issue_id, state)?;

        self.fact_check(&mut plan.main, state).await;
        if let Some(secondary) = plan.secondary.as_mut() {
            self.fact_check(secondary, state).await;
        }

        info!(issue_id, "Generating draft");
        let draft = self
            .generator
            .generate(&plan)
            .await
            .map_err(|e| PipelineError::DraftFailed(format!("{:#}", e)))?;
        state.draft_attempts = draft.attempts;
        state.warnings.extend(draft.warnings);

        info!(issue_id, "Checking compliance");
        let compliant = self.fixer.enforce(draft.markdown).await?;
        state.fix_attempts = compliant.fix_attempts;
        let markdown = compliant.markdown;
        state
            .warnings
            .extend(final_check(&markdown, &plan.required_sections()));

        if let Err(e) = store.save_draft(issue.id, &markdown) {
            state.warn(format!("Failed to save draft: {}", e));
        }

        let image = self.illustrate(&plan.main, state).await;

        info!(issue_id, "Publishing document");
        let (subject, body) = split_subject(&markdown);
        let request = PublishRequest {
            issue_number: issue.issue_number,
            title: subject.unwrap_or_else(|| format!("Issue #{}", issue.issue_number)),
            markdown: body.to_string(),
            formatting: format_runs(&parse(body)),
            image,
        };
        let url = self
            .services
            .publisher
            .publish(&request)
            .await
            .map_err(|e| PipelineError::PublishFailed(format!("{:#}", e)))?;

        if let Err(e) = store.publish_draft(issue.id) {
            state.warn(format!("Failed to snapshot published draft: {}", e));
        }
        if let Err(e) = store.set_issue_document(issue.id, &url, Utc::now()) {
            state.warn(format!("Failed to record document URL: {}", e));
        }

        Ok(url)
    }

    /// Load the issue and the records it points at. Only the main story is
    /// required; other references that no longer resolve are dropped.
    fn resolve(&self, issue_id: i64, state: &mut RunState) -> Result<(Issue, ContentPlan)> {
        let store = self.services.store.as_ref();
        let store_err = |e: anyhow::Error| PipelineError::Store(e.to_string());

        let issue = store
            .get_issue(issue_id)
            .map_err(store_err)?
            .ok_or(PipelineError::IssueNotFound(issue_id))?;

        let main = match issue.main_story_id {
            Some(id) => store.get_lead(id).map_err(store_err)?,
            None => None,
        }
        .ok_or(PipelineError::MainStoryMissing(issue_id))?;

        let secondary = issue
            .secondary_story_id
            .and_then(|id| optional_record("Secondary story", id, store.get_lead(id), state));

        let quick_links = issue
            .quick_link_ids
            .iter()
            .filter_map(|&id| optional_record("Quick link", id, store.get_lead(id), state))
            .collect::<Vec<_>>();

        let challenge = issue
            .challenge_id
            .and_then(|id| optional_record("Challenge", id, store.get_challenge(id), state));

        debug!(
            issue_id,
            secondary = secondary.is_some(),
            quick_links = quick_links.len(),
            challenge = challenge.is_some(),
            "Issue records resolved"
        );

        let plan = ContentPlan {
            issue_number: issue.issue_number,
            main,
            secondary,
            quick_links,
            challenge,
        };
        Ok((issue, plan))
    }

    /// Update the lead in place and persist the result. Never fatal.
    async fn fact_check(&self, lead: &mut Lead, state: &mut RunState) {
        let (status, primary, note, degraded) = match self.checker.check(lead).await {
            Ok(report) => {
                let degraded = report.lookup_error.is_some();
                (report.status, report.primary_source_url, report.note, degraded)
            }
            Err(e) => (FactCheckStatus::Failed, None, format!("{:#}", e), true),
        };

        if degraded || status == FactCheckStatus::Unreachable {
            state.warn(format!("Fact-check for \"{}\": {}", lead.title, note));
        } else {
            info!(lead = lead.id, status = status.as_str(), "Fact-check finished");
        }

        if let Err(e) = self.services.store.update_fact_check(
            lead.id,
            status,
            primary.as_deref(),
            Some(&note),
        ) {
            state.warn(format!("Failed to save fact-check for lead {}: {}", lead.id, e));
        }

        lead.fact_check_status = status;
        lead.note = Some(note);
        if primary.is_some() {
            lead.primary_source_url = primary;
        }
    }

    async fn illustrate(&self, main: &Lead, state: &mut RunState) -> Option<GeneratedImage> {
        let Some(illustrator) = &self.services.illustrator else {
            debug!("No illustration service configured, skipping");
            return None;
        };
        match illustrator.illustrate(&hero_prompt(main)).await {
            Ok(image) => Some(image),
            Err(e) => {
                state.warn(format!("Illustration failed: {:#}", e));
                None
            }
        }
    }
}

/// A non-main reference that is missing or fails to load is skipped with a warning.
fn optional_record<T>(
    label: &str,
    id: i64,
    loaded: Result<Option<T>>,
    state: &mut RunState,
) -> Option<T> {
    match loaded {
        Ok(Some(record)) => Some(record),
        Ok(None) => {
            state.warn(format!("{} {} no longer exists, skipping", label, id));
            None
        }
        Err(e) => {
            state.warn(format!("{} {} could not be loaded, skipping: {:#}", label, id, e));
            None
        }
    }
}
