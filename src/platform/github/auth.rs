use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use octocrab::Octocrab;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};

#[derive(Debug, Serialize)]
struct JwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Generate a JWT for GitHub App authentication.
pub fn generate_app_jwt(app_id: u64, private_key_path: &Path) -> Result<String> {
    let key_pem = std::fs::read(private_key_path).map_err(|e| {
        AppError::Config(format!(
            "Failed to read private key at {}: {e}",
            private_key_path.display()
        ))
    })?;

    let encoding_key = EncodingKey::from_rsa_pem(&key_pem)
        .map_err(|e| AppError::Config(format!("Invalid RSA private key: {e}")))?;

    let now = Utc::now().timestamp();
    let claims = JwtClaims {
        iat: now - 60,      // clock drift
        exp: now + 10 * 60, // GitHub maximum
        iss: app_id.to_string(),
    };

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| AppError::Config(format!("Failed to generate JWT: {e}")))
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Usable for at least another five minutes.
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + Duration::minutes(5)
    }
}

/// Installation access token for one GitHub App installation, refreshed
/// shortly before it expires.
pub struct InstallationToken {
    app_id: u64,
    private_key_path: PathBuf,
    installation_id: u64,
    cached: RwLock<Option<CachedToken>>,
}

impl InstallationToken {
    pub fn new(app_id: u64, private_key_path: PathBuf, installation_id: u64) -> Self {
        Self {
            app_id,
            private_key_path,
            installation_id,
            cached: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.request().await?;
        let token = fresh.token.clone();
        *self.cached.write().await = Some(fresh);
        tracing::debug!(installation_id = self.installation_id, "Refreshed installation token");
        Ok(token)
    }

    async fn request(&self) -> Result<CachedToken> {
        let jwt = generate_app_jwt(self.app_id, &self.private_key_path)?;
        let client = Octocrab::builder()
            .personal_token(jwt)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build JWT client: {e}")))?;

        let url = format!("/app/installations/{}/access_tokens", self.installation_id);
        let response: serde_json::Value = client.post(&url, None::<&()>).await?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| AppError::GitHubApi("No token in response".to_string()))?
            .to_string();
        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));

        Ok(CachedToken { token, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_freshness() {
        let now = Utc::now();
        let token = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::minutes(30),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + Duration::minutes(26)));
    }

    #[test]
    fn test_missing_private_key() {
        let err = generate_app_jwt(1, Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
