use thiserror::Error;

/// Failures raised by the external service clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} is not configured: set {variable}")]
    NotConfigured {
        service: &'static str,
        variable: &'static str,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    #[error("Empty response from {0}")]
    Empty(&'static str),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

/// Fatal outcomes of a publish run. Anything not listed here degrades to a warning.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Issue {0} not found")]
    IssueNotFound(i64),

    #[error("Issue {0} has no resolvable main story")]
    MainStoryMissing(i64),

    #[error("Draft generation failed: {0}")]
    DraftFailed(String),

    #[error("Compliance violations unresolved after {attempts} fix attempts: {}", .violations.join("; "))]
    ComplianceUnresolved {
        attempts: u32,
        violations: Vec<String>,
    },

    #[error("Document publishing failed: {0}")]
    PublishFailed(String),

    #[error("Store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliance_error_lists_every_violation() {
        let err = PipelineError::ComplianceUnresolved {
            attempts: 3,
            violations: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Compliance violations unresolved after 3 fix attempts: a; b"
        );
    }

    #[test]
    fn test_not_configured_names_variable() {
        let err = ClientError::NotConfigured {
            service: "Embedding service",
            variable: "OPENAI_API_KEY",
        };
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
