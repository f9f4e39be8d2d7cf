use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::models::{
    Challenge, Draft, DraftStatus, DraftVersion, FactCheckStatus, Issue, Lead, NewIssue, NewLead,
};

/// A dedup history row: every URL ever accepted, with its title embedding
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub url: String,
    pub title: String,
    pub embedding: Vec<f32>,
}

/// Persistence collaborator. Issue references to leads and challenges are
/// soft: nothing stops a referenced row from disappearing.
pub trait Store: Send + Sync {
    fn insert_lead(&self, lead: &NewLead) -> Result<Lead>;
    fn get_lead(&self, id: i64) -> Result<Option<Lead>>;
    fn list_leads(&self, limit: usize) -> Result<Vec<Lead>>;
    fn update_fact_check(
        &self,
        id: i64,
        status: FactCheckStatus,
        primary_source_url: Option<&str>,
        note: Option<&str>,
    ) -> Result<()>;
    fn delete_lead(&self, id: i64) -> Result<bool>;
    /// Delete every lead and null the issue references that pointed at them.
    fn clear_leads(&self) -> Result<usize>;

    fn history_contains_url(&self, url: &str) -> Result<bool>;
    fn history_entries(&self) -> Result<Vec<HistoryEntry>>;
    fn add_history(&self, url: &str, title: &str, embedding: &[f32]) -> Result<()>;
    /// Insert a lead and its history row together; neither is kept if either fails.
    fn insert_lead_with_history(&self, lead: &NewLead) -> Result<Lead>;

    fn insert_challenge(&self, title: &str, description: &str, kind: &str) -> Result<Challenge>;
    fn get_challenge(&self, id: i64) -> Result<Option<Challenge>>;
    fn list_challenges(&self) -> Result<Vec<Challenge>>;
    fn delete_challenge(&self, id: i64) -> Result<bool>;

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue>;
    fn get_issue(&self, id: i64) -> Result<Option<Issue>>;
    fn list_issues(&self) -> Result<Vec<Issue>>;
    fn next_issue_number(&self) -> Result<i64>;
    fn set_issue_document(&self, id: i64, document_url: &str, published_at: DateTime<Utc>) -> Result<()>;

    fn save_draft(&self, issue_id: i64, markdown: &str) -> Result<Draft>;
    fn get_draft(&self, issue_id: i64) -> Result<Option<Draft>>;
    /// Snapshot the current draft as a new immutable version and mark it published.
    fn publish_draft(&self, issue_id: i64) -> Result<DraftVersion>;
    fn draft_versions(&self, issue_id: i64) -> Result<Vec<DraftVersion>>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    source TEXT NOT NULL,
    url TEXT NOT NULL,
    summary TEXT NOT NULL,
    relevance_score INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    fact_check_status TEXT NOT NULL DEFAULT 'pending',
    primary_source_url TEXT,
    note TEXT,
    is_manual INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS lead_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    embedding BLOB NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS challenges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    kind TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_number INTEGER NOT NULL UNIQUE,
    main_story_id INTEGER,
    secondary_story_id INTEGER,
    challenge_id INTEGER,
    quick_link_ids TEXT NOT NULL DEFAULT '[]',
    document_url TEXT,
    published_at TEXT
);
CREATE TABLE IF NOT EXISTS drafts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL UNIQUE,
    markdown TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS draft_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    draft_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    markdown TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (draft_id, version)
);
"#;

const LEAD_COLUMNS: &str = "id, title, source, url, summary, relevance_score, embedding, \
     fact_check_status, primary_source_url, note, is_manual, created_at";

const ISSUE_COLUMNS: &str = "id, issue_number, main_story_id, secondary_story_id, challenge_id, \
     quick_link_ids, document_url, published_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("Database lock poisoned"))
    }
}

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn lead_from_row(row: &Row) -> rusqlite::Result<Lead> {
    let embedding: Vec<u8> = row.get("embedding")?;
    let status: String = row.get("fact_check_status")?;
    let score: i64 = row.get("relevance_score")?;

    Ok(Lead {
        id: row.get("id")?,
        title: row.get("title")?,
        source: row.get("source")?,
        url: row.get("url")?,
        summary: row.get("summary")?,
        relevance_score: score.clamp(0, 100) as u8,
        embedding: decode_embedding(&embedding),
        fact_check_status: FactCheckStatus::parse(&status),
        primary_source_url: row.get("primary_source_url")?,
        note: row.get("note")?,
        is_manual: row.get("is_manual")?,
        created_at: row.get("created_at")?,
    })
}

fn issue_from_row(row: &Row) -> rusqlite::Result<Issue> {
    let quick_links: String = row.get("quick_link_ids")?;
    let quick_link_ids: Vec<i64> = serde_json::from_str(&quick_links)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Issue {
        id: row.get("id")?,
        issue_number: row.get("issue_number")?,
        main_story_id: row.get("main_story_id")?,
        secondary_story_id: row.get("secondary_story_id")?,
        challenge_id: row.get("challenge_id")?,
        quick_link_ids,
        document_url: row.get("document_url")?,
        published_at: row.get("published_at")?,
    })
}

fn challenge_from_row(row: &Row) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        kind: row.get("kind")?,
    })
}

fn draft_from_row(row: &Row) -> rusqlite::Result<Draft> {
    let status: String = row.get("status")?;
    Ok(Draft {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        markdown: row.get("markdown")?,
        status: DraftStatus::parse(&status),
        updated_at: row.get("updated_at")?,
    })
}

fn version_from_row(row: &Row) -> rusqlite::Result<DraftVersion> {
    Ok(DraftVersion {
        id: row.get("id")?,
        draft_id: row.get("draft_id")?,
        version: row.get("version")?,
        markdown: row.get("markdown")?,
        created_at: row.get("created_at")?,
    })
}

fn insert_lead_row(conn: &Connection, lead: &NewLead) -> Result<Lead> {
    conn.execute(
        "INSERT INTO leads (title, source, url, summary, relevance_score, embedding, is_manual, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            lead.title,
            lead.source,
            lead.url,
            lead.summary,
            lead.relevance_score as i64,
            encode_embedding(&lead.embedding),
            lead.is_manual,
            Utc::now(),
        ],
    )
    .context("Failed to insert lead")?;

    let id = conn.last_insert_rowid();
    conn.query_row(
        &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
        [id],
        lead_from_row,
    )
    .context("Failed to read back inserted lead")
}

/// History embeddings must all share one dimension.
fn insert_history_row(conn: &Connection, url: &str, title: &str, embedding: &[f32]) -> Result<()> {
    if !embedding.is_empty() {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT length(embedding) FROM lead_history WHERE length(embedding) > 0 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(bytes) = existing {
            let dims = (bytes / 4) as usize;
            if dims != embedding.len() {
                anyhow::bail!(
                    "Embedding dimension mismatch: history uses {}, got {}",
                    dims,
                    embedding.len()
                );
            }
        }
    }

    conn.execute(
        "INSERT OR IGNORE INTO lead_history (url, title, embedding, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![url, title, encode_embedding(embedding), Utc::now()],
    )
    .context("Failed to record URL history")?;
    Ok(())
}

impl Store for SqliteStore {
    fn insert_lead(&self, lead: &NewLead) -> Result<Lead> {
        let conn = self.lock()?;
        insert_lead_row(&conn, lead)
    }

    fn get_lead(&self, id: i64) -> Result<Option<Lead>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM leads WHERE id = ?1", LEAD_COLUMNS),
            [id],
            lead_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load lead {}", id))
    }

    fn list_leads(&self, limit: usize) -> Result<Vec<Lead>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM leads ORDER BY relevance_score DESC, created_at DESC LIMIT ?1",
            LEAD_COLUMNS
        ))?;
        let leads = stmt
            .query_map([limit as i64], lead_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list leads")?;
        Ok(leads)
    }

    fn update_fact_check(
        &self,
        id: i64,
        status: FactCheckStatus,
        primary_source_url: Option<&str>,
        note: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE leads SET fact_check_status = ?1, primary_source_url = ?2, note = ?3 WHERE id = ?4",
                params![status.as_str(), primary_source_url, note, id],
            )
            .context("Failed to update fact-check result")?;
        if updated == 0 {
            anyhow::bail!("Lead {} not found", id);
        }
        Ok(())
    }

    fn delete_lead(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM leads WHERE id = ?1", [id])
            .context("Failed to delete lead")?;
        Ok(deleted > 0)
    }

    fn clear_leads(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE issues SET main_story_id = NULL, secondary_story_id = NULL, quick_link_ids = '[]'",
            [],
        )?;
        let deleted = tx.execute("DELETE FROM leads", [])?;
        tx.commit().context("Failed to clear leads")?;
        Ok(deleted)
    }

    fn history_contains_url(&self, url: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row("SELECT 1 FROM lead_history WHERE url = ?1", [url], |_| Ok(()))
            .optional()
            .context("Failed to look up URL history")?;
        Ok(found.is_some())
    }

    fn history_entries(&self) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT url, title, embedding FROM lead_history")?;
        let entries = stmt
            .query_map([], |row| {
                let embedding: Vec<u8> = row.get(2)?;
                Ok(HistoryEntry {
                    url: row.get(0)?,
                    title: row.get(1)?,
                    embedding: decode_embedding(&embedding),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load history embeddings")?;
        Ok(entries)
    }

    fn add_history(&self, url: &str, title: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.lock()?;
        insert_history_row(&conn, url, title, embedding)
    }

    fn insert_lead_with_history(&self, lead: &NewLead) -> Result<Lead> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_history_row(&tx, &lead.url, &lead.title, &lead.embedding)?;
        let saved = insert_lead_row(&tx, lead)?;
        tx.commit().context("Failed to commit lead")?;
        Ok(saved)
    }

    fn insert_challenge(&self, title: &str, description: &str, kind: &str) -> Result<Challenge> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO challenges (title, description, kind) VALUES (?1, ?2, ?3)",
            params![title, description, kind],
        )
        .context("Failed to insert challenge")?;
        Ok(Challenge {
            id: conn.last_insert_rowid(),
            title: title.to_string(),
            description: description.to_string(),
            kind: kind.to_string(),
        })
    }

    fn get_challenge(&self, id: i64) -> Result<Option<Challenge>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, title, description, kind FROM challenges WHERE id = ?1",
            [id],
            challenge_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load challenge {}", id))
    }

    fn list_challenges(&self) -> Result<Vec<Challenge>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, title, description, kind FROM challenges ORDER BY id DESC")?;
        let challenges = stmt
            .query_map([], challenge_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list challenges")?;
        Ok(challenges)
    }

    fn delete_challenge(&self, id: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE issues SET challenge_id = NULL WHERE challenge_id = ?1",
            [id],
        )?;
        let deleted = tx.execute("DELETE FROM challenges WHERE id = ?1", [id])?;
        tx.commit().context("Failed to delete challenge")?;
        Ok(deleted > 0)
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        let conn = self.lock()?;
        let quick_links = serde_json::to_string(&issue.quick_link_ids)?;
        conn.execute(
            "INSERT INTO issues (issue_number, main_story_id, secondary_story_id, challenge_id, quick_link_ids)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                issue.issue_number,
                issue.main_story_id,
                issue.secondary_story_id,
                issue.challenge_id,
                quick_links,
            ],
        )
        .with_context(|| format!("Failed to create issue #{}", issue.issue_number))?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS),
            [id],
            issue_from_row,
        )
        .context("Failed to read back created issue")
    }

    fn get_issue(&self, id: i64) -> Result<Option<Issue>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM issues WHERE id = ?1", ISSUE_COLUMNS),
            [id],
            issue_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load issue {}", id))
    }

    fn list_issues(&self) -> Result<Vec<Issue>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM issues ORDER BY issue_number DESC",
            ISSUE_COLUMNS
        ))?;
        let issues = stmt
            .query_map([], issue_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list issues")?;
        Ok(issues)
    }

    fn next_issue_number(&self) -> Result<i64> {
        let conn = self.lock()?;
        let max: Option<i64> = conn.query_row("SELECT MAX(issue_number) FROM issues", [], |row| {
            row.get(0)
        })?;
        Ok(max.unwrap_or(0) + 1)
    }

    fn set_issue_document(&self, id: i64, document_url: &str, published_at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE issues SET document_url = ?1, published_at = ?2 WHERE id = ?3",
                params![document_url, published_at, id],
            )
            .context("Failed to update issue document")?;
        if updated == 0 {
            anyhow::bail!("Issue {} not found", id);
        }
        Ok(())
    }

    fn save_draft(&self, issue_id: i64, markdown: &str) -> Result<Draft> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO drafts (issue_id, markdown, status, updated_at) VALUES (?1, ?2, 'draft', ?3)
             ON CONFLICT(issue_id) DO UPDATE SET
                 markdown = excluded.markdown,
                 status = 'draft',
                 updated_at = excluded.updated_at",
            params![issue_id, markdown, Utc::now()],
        )
        .context("Failed to save draft")?;

        conn.query_row(
            "SELECT id, issue_id, markdown, status, updated_at FROM drafts WHERE issue_id = ?1",
            [issue_id],
            draft_from_row,
        )
        .context("Failed to read back draft")
    }

    fn get_draft(&self, issue_id: i64) -> Result<Option<Draft>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, issue_id, markdown, status, updated_at FROM drafts WHERE issue_id = ?1",
            [issue_id],
            draft_from_row,
        )
        .optional()
        .with_context(|| format!("Failed to load draft for issue {}", issue_id))
    }

    fn publish_draft(&self, issue_id: i64) -> Result<DraftVersion> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let (draft_id, markdown): (i64, String) = tx
            .query_row(
                "SELECT id, markdown FROM drafts WHERE issue_id = ?1",
                [issue_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("No draft saved for issue {}", issue_id))?;

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM draft_versions WHERE draft_id = ?1",
            [draft_id],
            |row| row.get(0),
        )?;
        let created_at = Utc::now();

        tx.execute(
            "INSERT INTO draft_versions (draft_id, version, markdown, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![draft_id, version, markdown, created_at],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE drafts SET status = 'published' WHERE id = ?1",
            [draft_id],
        )?;
        tx.commit().context("Failed to publish draft")?;

        Ok(DraftVersion {
            id,
            draft_id,
            version,
            markdown,
            created_at,
        })
    }

    fn draft_versions(&self, issue_id: i64) -> Result<Vec<DraftVersion>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.draft_id, v.version, v.markdown, v.created_at
             FROM draft_versions v JOIN drafts d ON d.id = v.draft_id
             WHERE d.issue_id = ?1 ORDER BY v.version",
        )?;
        let versions = stmt
            .query_map([issue_id], version_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list draft versions")?;
        Ok(versions)
    }
}
