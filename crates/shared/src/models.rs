use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw discovery hit, never persisted directly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

/// Candidate after the relevance judge has looked at it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub summary: String,
    pub relevance_score: u8,
    pub is_roundup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCheckStatus {
    Pending,
    Verified,
    Live,
    Unreachable,
    Failed,
}

impl FactCheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCheckStatus::Pending => "pending",
            FactCheckStatus::Verified => "verified",
            FactCheckStatus::Live => "live",
            FactCheckStatus::Unreachable => "unreachable",
            FactCheckStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "verified" => FactCheckStatus::Verified,
            "live" => FactCheckStatus::Live,
            "unreachable" => FactCheckStatus::Unreachable,
            "failed" => FactCheckStatus::Failed,
            _ => FactCheckStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub title: String,
    pub source: String,
    pub url: String,
    pub summary: String,
    pub relevance_score: u8,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub fact_check_status: FactCheckStatus,
    pub primary_source_url: Option<String>,
    pub note: Option<String>,
    pub is_manual: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a lead; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewLead {
    pub title: String,
    pub source: String,
    pub url: String,
    pub summary: String,
    pub relevance_score: u8,
    pub embedding: Vec<f32>,
    pub is_manual: bool,
}

impl NewLead {
    pub fn from_scored(scored: &ScoredCandidate, embedding: Vec<f32>) -> Self {
        Self {
            title: scored.candidate.title.clone(),
            source: scored.candidate.source.clone(),
            url: scored.candidate.url.clone(),
            summary: scored.summary.clone(),
            relevance_score: scored.relevance_score,
            embedding,
            is_manual: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub issue_number: i64,
    pub main_story_id: Option<i64>,
    pub secondary_story_id: Option<i64>,
    pub challenge_id: Option<i64>,
    pub quick_link_ids: Vec<i64>,
    pub document_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub issue_number: i64,
    pub main_story_id: i64,
    pub secondary_story_id: Option<i64>,
    pub challenge_id: Option<i64>,
    pub quick_link_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    Published,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "published" {
            DraftStatus::Published
        } else {
            DraftStatus::Draft
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: i64,
    pub issue_id: i64,
    pub markdown: String,
    pub status: DraftStatus,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot taken each time a draft is published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftVersion {
    pub id: i64,
    pub draft_id: i64,
    pub version: i64,
    pub markdown: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<String>,
}

impl ValidationResult {
    pub fn from_violations(violations: Vec<String>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_check_status_round_trips_through_text() {
        for status in [
            FactCheckStatus::Pending,
            FactCheckStatus::Verified,
            FactCheckStatus::Live,
            FactCheckStatus::Unreachable,
            FactCheckStatus::Failed,
        ] {
            assert_eq!(FactCheckStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_validation_result_valid_only_without_violations() {
        assert!(ValidationResult::from_violations(vec![]).valid);
        assert!(!ValidationResult::from_violations(vec!["x".into()]).valid);
    }

    #[test]
    fn test_challenge_serializes_kind_as_type() {
        let challenge = Challenge {
            id: 1,
            title: "Prompt golf".into(),
            description: "Shortest prompt wins".into(),
            kind: "prompting".into(),
        };
        let json = serde_json::to_string(&challenge).unwrap();
        assert!(json.contains("\"type\":\"prompting\""));
    }
}
