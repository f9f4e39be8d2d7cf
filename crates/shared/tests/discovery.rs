mod common;

use common::*;
use shared::{DedupEngine, Discovery, LeadScorer, Store};
use std::sync::Arc;

fn discovery(store: Arc<dyn Store>, hits: Vec<shared::llm::SearchHit>) -> Discovery {
    let llm = Arc::new(ScriptedLlm::new(String::new()));
    let dedup = DedupEngine::new(store.clone(), Arc::new(OrthogonalEmbedder::new()));
    Discovery::new(
        Arc::new(CannedSearch { hits }),
        dedup,
        LeadScorer::new(llm),
        store,
    )
}

#[tokio::test]
async fn test_exact_url_duplicates_are_never_persisted() {
    let store: Arc<dyn Store> = memory_store();
    store
        .add_history(
            "https://news.example.com/seen",
            "Strong story we covered",
            &[0.0; OrthogonalEmbedder::DIMS],
        )
        .unwrap();

    let hits = vec![
        hit("Strong story we covered", "https://news.example.com/seen"),
        hit("Strong new chip deal", "https://news.example.com/new"),
        hit("Weak minor update", "https://news.example.com/minor"),
        hit("AI Weekly Roundup: everything", "https://news.example.com/roundup"),
        hit("Strong new chip deal", "https://news.example.com/new"),
    ];
    let discovery = discovery(store.clone(), hits);

    let report = discovery.run(&["ai news".to_string()]).await.unwrap();

    assert_eq!(report.candidates, 4);
    assert_eq!(report.duplicates_skipped, 1);
    assert_eq!(report.roundups_skipped, 1);
    assert_eq!(report.scored, 2);
    assert_eq!(report.persisted.len(), 1);

    let urls: Vec<String> = store
        .list_leads(50)
        .unwrap()
        .into_iter()
        .map(|l| l.url)
        .collect();
    assert_eq!(urls, vec!["https://news.example.com/new".to_string()]);
    assert!(store.history_contains_url("https://news.example.com/new").unwrap());
}

#[tokio::test]
async fn test_second_run_finds_nothing_new() {
    let store: Arc<dyn Store> = memory_store();
    let hits = vec![hit("Strong new chip deal", "https://news.example.com/new")];
    let discovery = discovery(store.clone(), hits);

    let first = discovery.run(&["q".to_string()]).await.unwrap();
    let second = discovery.run(&["q".to_string()]).await.unwrap();

    assert_eq!(first.persisted.len(), 1);
    assert!(second.persisted.is_empty());
    assert_eq!(second.duplicates_skipped, 1);
    assert_eq!(store.list_leads(50).unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_lead_skips_judge_but_not_dedup() {
    let store: Arc<dyn Store> = memory_store();
    let discovery = discovery(store.clone(), vec![]);

    let added = discovery
        .add_manual("Editor pick", "https://blog.example.org/pick", "Worth a look")
        .await
        .unwrap()
        .unwrap();
    assert!(added.is_manual);
    assert_eq!(added.relevance_score, 100);
    assert_eq!(added.source, "blog.example.org");

    let again = discovery
        .add_manual("Editor pick", "https://blog.example.org/pick", "")
        .await
        .unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn test_cleared_leads_stay_in_history() {
    let store: Arc<dyn Store> = memory_store();
    let hits = vec![hit("Strong new chip deal", "https://news.example.com/new")];
    let discovery = discovery(store.clone(), hits);

    discovery.run(&["q".to_string()]).await.unwrap();
    assert_eq!(store.clear_leads().unwrap(), 1);

    let rerun = discovery.run(&["q".to_string()]).await.unwrap();
    assert!(rerun.persisted.is_empty());
    assert_eq!(rerun.duplicates_skipped, 1);
}

#[tokio::test]
async fn test_failed_history_write_leaves_no_lead_behind() {
    let store: Arc<dyn Store> = memory_store();
    store
        .add_history("https://news.example.com/old", "Older story", &[1.0, 0.0, 0.0])
        .unwrap();
    let hits = vec![hit("Strong new chip deal", "https://news.example.com/new")];
    let discovery = discovery(store.clone(), hits);

    let first = discovery.run(&["q".to_string()]).await.unwrap();
    let second = discovery.run(&["q".to_string()]).await.unwrap();

    assert!(first.persisted.is_empty());
    assert!(second.persisted.is_empty());
    assert!(store.list_leads(50).unwrap().is_empty());
    assert!(!store.history_contains_url("https://news.example.com/new").unwrap());
}
