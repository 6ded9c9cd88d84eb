use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trigger verification failed: {0}")]
    TriggerVerification(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("GitHub rejected the request: {0}")]
    GitHubRejected(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Warehouse query failed: {0}")]
    Warehouse(String),

    #[error("Invalid flaky rules: {0}")]
    Rules(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the failed call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::GitHubApi(_)
            | AppError::RateLimited(_)
            | AppError::Warehouse(_)
            | AppError::Io(_) => true,
            AppError::Http(e) => {
                !e.is_decode()
                    && !e.is_builder()
                    && e.status().map_or(true, |status| {
                        status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            AppError::Config(_)
            | AppError::TriggerVerification(_)
            | AppError::GitHubRejected(_)
            | AppError::Rules(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => false,
        }
    }
}

impl AppError {
    /// Error for a GitHub response with a non-success status. Only rate
    /// limits and server errors are worth retrying.
    pub fn from_github_status(status: u16, message: &str) -> Self {
        let secondary = message.to_lowercase().contains("rate limit");
        if status == 429 || (status == 403 && secondary) {
            AppError::RateLimited(message.to_string())
        } else if (400..500).contains(&status) {
            AppError::GitHubRejected(format!("{status}: {message}"))
        } else {
            AppError::GitHubApi(format!("{status}: {message}"))
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        if let octocrab::Error::GitHub { source, .. } = &e {
            return AppError::from_github_status(source.status_code.as_u16(), &source.message);
        }
        AppError::GitHubApi(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::GitHubApi("502".into()).is_transient());
        assert!(AppError::RateLimited("slow down".into()).is_transient());
        assert!(AppError::Warehouse("timeout".into()).is_transient());
        assert!(!AppError::Config("missing key".into()).is_transient());
        assert!(!AppError::Rules("bad regex".into()).is_transient());
    }

    #[test]
    fn test_github_status_mapping() {
        assert!(matches!(
            AppError::from_github_status(429, "slow down"),
            AppError::RateLimited(_)
        ));
        assert!(matches!(
            AppError::from_github_status(403, "You have exceeded a secondary rate limit"),
            AppError::RateLimited(_)
        ));
        assert!(AppError::from_github_status(502, "Bad Gateway").is_transient());
        assert!(AppError::from_github_status(503, "Service Unavailable").is_transient());
        assert!(!AppError::from_github_status(404, "Not Found").is_transient());
        assert!(!AppError::from_github_status(422, "Validation Failed").is_transient());
        assert!(!AppError::from_github_status(403, "Resource not accessible").is_transient());
    }
}
