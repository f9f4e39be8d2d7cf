use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_COMPLETION_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const APP_DIR: &str = "newsletter-desk";

#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub openai_api_key: Option<String>,
    pub completion_model: String,
    pub embedding_model: String,
    pub document_service_url: Option<String>,
    pub document_service_token: Option<String>,
    pub database_path: PathBuf,
    pub discovery_queries: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Try to load .env from multiple locations
        Self::try_load_dotenv();

        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").context(
            "ANTHROPIC_API_KEY not found.\n\n\
                To fix this, create ~/.config/newsletter-desk/.env with:\n  \
                ANTHROPIC_API_KEY=your_key_here\n  \
                OPENAI_API_KEY=your_key_here\n\n\
                Get your Anthropic API key from: https://console.anthropic.com/settings/keys",
        )?;

        let database_path = match non_empty_var("NEWSLETTER_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => crate::io::default_database_path()?,
        };

        Ok(Self {
            anthropic_api_key,
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            completion_model: non_empty_var("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            embedding_model: non_empty_var("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            document_service_url: non_empty_var("DOCUMENT_SERVICE_URL"),
            document_service_token: non_empty_var("DOCUMENT_SERVICE_TOKEN"),
            database_path,
            discovery_queries: non_empty_var("DISCOVERY_QUERIES")
                .map(|raw| parse_queries(&raw))
                .unwrap_or_else(default_queries),
        })
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/newsletter-desk/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join(APP_DIR).join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }
    }
}

pub(crate) fn app_dir_name() -> &'static str {
    APP_DIR
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_queries(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
        .collect()
}

fn default_queries() -> Vec<String> {
    vec![
        "artificial intelligence news this week".to_string(),
        "AI model release announcement".to_string(),
        "AI policy regulation news".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queries_splits_and_trims() {
        let queries = parse_queries(" openai news ; ;anthropic funding;");
        assert_eq!(queries, vec!["openai news", "anthropic funding"]);
    }

    #[test]
    fn test_default_queries_not_empty() {
        assert!(!default_queries().is_empty());
    }
}
