mod common;

use common::*;
use shared::models::{DraftStatus, FactCheckStatus, NewIssue};
use shared::{Orchestrator, PageFetcher, PipelineServices, Store};
use std::sync::Arc;

struct Harness {
    store: Arc<dyn Store>,
    llm: Arc<ScriptedLlm>,
    publisher: Arc<RecordingPublisher>,
    orchestrator: Orchestrator,
}

fn harness(llm: ScriptedLlm, publisher: RecordingPublisher, illustrate: bool) -> Harness {
    harness_with_fetcher(llm, publisher, illustrate, Arc::new(LivePage))
}

fn harness_with_fetcher(
    llm: ScriptedLlm,
    publisher: RecordingPublisher,
    illustrate: bool,
    fetcher: Arc<dyn PageFetcher>,
) -> Harness {
    let store: Arc<dyn Store> = memory_store();
    let llm = Arc::new(llm);
    let publisher = Arc::new(publisher);
    let services = PipelineServices {
        store: store.clone(),
        llm: llm.clone(),
        search: Arc::new(CannedSearch::empty()),
        fetcher,
        illustrator: if illustrate {
            Some(Arc::new(BrokenIllustrator))
        } else {
            None
        },
        publisher: publisher.clone(),
    };
    Harness {
        store,
        llm,
        publisher,
        orchestrator: Orchestrator::new(services),
    }
}

const MAIN_URL: &str = "https://news.example.com/main";

fn main_only_issue(store: &dyn Store) -> i64 {
    let main = insert_lead(store, "Lab ships new model", MAIN_URL);
    store
        .create_issue(&NewIssue {
            issue_number: 1,
            main_story_id: main.id,
            secondary_story_id: None,
            challenge_id: None,
            quick_link_ids: vec![],
        })
        .unwrap()
        .id
}

#[tokio::test]
async fn test_main_story_only_issue_publishes() {
    let h = harness(
        ScriptedLlm::new(main_only_draft(MAIN_URL)),
        RecordingPublisher::default(),
        false,
    );
    let issue_id = main_only_issue(h.store.as_ref());

    let outcome = h.orchestrator.run(issue_id).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.document_url.as_deref(), Some("https://docs.example.com/d/1"));
    assert_eq!(outcome.draft_attempts, 1);
    assert_eq!(outcome.fix_attempts, 0);
    assert_eq!(h.llm.draft_calls(), 1);

    let requests = h.publisher.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].title, "A quiet but important week");
    assert!(!requests[0].markdown.contains("Subject:"));
    assert!(!requests[0].markdown.contains("Quick Hits"));
    assert!(!requests[0].markdown.contains("Also Worth Knowing"));
    assert!(requests[0].image.is_none());

    // A short main-only issue is allowed through with a warning
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("Final check: Issue is")));

    let issue = h.store.get_issue(issue_id).unwrap().unwrap();
    assert_eq!(issue.document_url.as_deref(), Some("https://docs.example.com/d/1"));
    assert!(issue.published_at.is_some());

    let draft = h.store.get_draft(issue_id).unwrap().unwrap();
    assert_eq!(draft.status, DraftStatus::Published);
    assert_eq!(h.store.draft_versions(issue_id).unwrap().len(), 1);

    let main = h.store.get_lead(issue.main_story_id.unwrap()).unwrap().unwrap();
    assert_eq!(main.fact_check_status, FactCheckStatus::Live);
}

#[tokio::test]
async fn test_unresolved_compliance_aborts_after_three_fixes() {
    let draft = main_only_draft(MAIN_URL).replace(
        "## 📚 Sources",
        "Raw copy at https://raw.example.com/post today.\n\n## 📚 Sources",
    );
    let h = harness(ScriptedLlm::new(draft), RecordingPublisher::default(), false);
    let issue_id = main_only_issue(h.store.as_ref());

    let outcome = h.orchestrator.run(issue_id).await;

    assert!(!outcome.success);
    assert_eq!(h.llm.fix_calls(), 3);
    assert_eq!(h.publisher.count(), 0);
    let error = outcome.error.unwrap();
    assert!(
        error.starts_with("Compliance violations unresolved after 3 fix attempts"),
        "{}",
        error
    );
    assert!(error.contains("Bare URL in text: https://bad.example.com"));
    assert!(error.contains("Heading contains punctuation"));
    assert!(h.store.get_issue(issue_id).unwrap().unwrap().document_url.is_none());
}

#[tokio::test]
async fn test_missing_main_story_is_fatal() {
    let h = harness(
        ScriptedLlm::new(main_only_draft(MAIN_URL)),
        RecordingPublisher::default(),
        false,
    );
    let issue_id = main_only_issue(h.store.as_ref());
    h.store.clear_leads().unwrap();

    let outcome = h.orchestrator.run(issue_id).await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some(format!("Issue {} has no resolvable main story", issue_id).as_str())
    );
    assert_eq!(h.llm.draft_calls(), 0);
}

#[tokio::test]
async fn test_unknown_issue_is_fatal() {
    let h = harness(
        ScriptedLlm::new(main_only_draft(MAIN_URL)),
        RecordingPublisher::default(),
        false,
    );
    let outcome = h.orchestrator.run(404).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("Issue 404 not found"));
}

#[tokio::test]
async fn test_optional_phases_degrade_to_warnings() {
    let h = harness(
        ScriptedLlm::new(main_only_draft(MAIN_URL)),
        RecordingPublisher::default(),
        true,
    );
    let main = insert_lead(h.store.as_ref(), "Lab ships new model", MAIN_URL);
    let issue_id = h
        .store
        .create_issue(&NewIssue {
            issue_number: 2,
            main_story_id: main.id,
            secondary_story_id: Some(9_999),
            challenge_id: Some(9_999),
            quick_link_ids: vec![],
        })
        .unwrap()
        .id;

    let outcome = h.orchestrator.run(issue_id).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome
        .warnings
        .contains(&"Secondary story 9999 no longer exists, skipping".to_string()));
    assert!(outcome
        .warnings
        .contains(&"Challenge 9999 no longer exists, skipping".to_string()));
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("Illustration failed")));
}

#[tokio::test]
async fn test_publish_failure_keeps_unpublished_draft() {
    let h = harness(
        ScriptedLlm::new(main_only_draft(MAIN_URL)),
        RecordingPublisher::failing(),
        false,
    );
    let issue_id = main_only_issue(h.store.as_ref());

    let outcome = h.orchestrator.run(issue_id).await;

    assert!(!outcome.success);
    assert!(outcome
        .error
        .unwrap()
        .starts_with("Document publishing failed"));
    let draft = h.store.get_draft(issue_id).unwrap().unwrap();
    assert_eq!(draft.status, DraftStatus::Draft);
    assert!(h.store.draft_versions(issue_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_primary_source_lookup_is_a_warning() {
    let mut llm = ScriptedLlm::new(main_only_draft(MAIN_URL));
    llm.fact_check_reply = "Sorry, I cannot tell.".to_string();
    let h = harness_with_fetcher(llm, RecordingPublisher::default(), false, Arc::new(LinkedPage));
    let issue_id = main_only_issue(h.store.as_ref());

    let outcome = h.orchestrator.run(issue_id).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.starts_with("Fact-check for \"Lab ships new model\": Primary source lookup failed")));
    let main = h.store.list_leads(10).unwrap().remove(0);
    assert_eq!(main.fact_check_status, FactCheckStatus::Live);
}
