//! Credentials and the token manager.
//!
//! The upstream hands out short-lived access tokens; a long-lived refresh
//! token rotates them through the Kiro OAuth endpoint. One mutable
//! `Credentials` instance exists per process, guarded by the token manager's
//! mutex: expiry is re-checked under the lock so concurrent callers collapse
//! into a single refresh, and the rotated credentials are written back to
//! disk before the lock is released.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Refresh when expiry is this close.
const EXPIRY_MARGIN_MIN: i64 = 5;
/// Refresh opportunistically when expiry is this close.
const EXPIRING_SOON_MARGIN_MIN: i64 = 10;
/// Anything shorter than this cannot be a real refresh token.
const MIN_REFRESH_TOKEN_LEN: usize = 100;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid refresh token: {0}")]
    InvalidRefreshToken(&'static str),

    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("permission denied by auth endpoint: {0}")]
    Permission(String),

    #[error("auth endpoint rate limited: {0}")]
    RateLimited(String),

    #[error("auth endpoint unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("credentials file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credentials parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("auth request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// On-disk and in-memory credential set. camelCase JSON on disk.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &"[REDACTED]")
            .field("profile_arn", &self.profile_arn)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Whole-file rewrite; owner-only permissions on unix.
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.expires_at.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Missing or unparseable expiry counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at_utc() {
            Some(at) => now + Duration::minutes(EXPIRY_MARGIN_MIN) >= at,
            None => true,
        }
    }

    pub fn is_expiring_soon(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at_utc() {
            Some(at) => now + Duration::minutes(EXPIRING_SOON_MARGIN_MIN) >= at,
            None => true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    profile_arn: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Process-global token authority. Cheap to share behind an `Arc`.
pub struct TokenManager {
    credentials: Mutex<Credentials>,
    path: PathBuf,
    client: reqwest::Client,
    refresh_url: String,
    kiro_version: String,
    machine_id_override: Option<String>,
}

impl TokenManager {
    pub fn new(credentials: Credentials, path: PathBuf, config: &Config) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        // Only a well-formed 64-hex override wins over derivation.
        let machine_id_override = config
            .machine_id
            .as_ref()
            .filter(|id| id.len() == 64)
            .cloned();

        Ok(Self {
            credentials: Mutex::new(credentials),
            path,
            client,
            refresh_url: format!("{}/refreshToken", config.auth_base()),
            kiro_version: config.kiro_version.clone(),
            machine_id_override,
        })
    }

    /// Return a token that is valid for at least the expiry margin,
    /// refreshing at most once across any number of concurrent callers.
    pub async fn ensure_valid_token(&self) -> Result<String, AuthError> {
        let mut creds = self.credentials.lock().await;
        let now = Utc::now();

        if !creds.is_expired(now) && !creds.is_expiring_soon(now) {
            if let Some(token) = &creds.access_token {
                return Ok(token.clone());
            }
        }

        debug!("access token missing or near expiry, refreshing");
        self.refresh_locked(&mut creds).await
    }

    /// Stable per-credential fingerprint used in upstream User-Agent headers.
    pub async fn machine_id(&self) -> String {
        if let Some(id) = &self.machine_id_override {
            return id.clone();
        }
        let creds = self.credentials.lock().await;
        derive_machine_id(creds.profile_arn.as_deref(), &creds.refresh_token)
    }

    async fn refresh_locked(&self, creds: &mut Credentials) -> Result<String, AuthError> {
        validate_refresh_token(&creds.refresh_token)?;

        let machine_id = self
            .machine_id_override
            .clone()
            .unwrap_or_else(|| derive_machine_id(creds.profile_arn.as_deref(), &creds.refresh_token));

        let response = self
            .client
            .post(&self.refresh_url)
            .header("Accept", "application/json, text/plain, */*")
            .header("Content-Type", "application/json")
            .header(
                "User-Agent",
                format!("KiroIDE-{}-{}", self.kiro_version, machine_id),
            )
            .header("Accept-Encoding", "gzip, compress, deflate, br")
            .header("Connection", "close")
            .json(&RefreshRequest {
                refresh_token: &creds.refresh_token,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("refresh endpoint returned {}: {}", status, body);
            return Err(match status.as_u16() {
                401 => AuthError::AuthExpired(detail),
                403 => AuthError::Permission(detail),
                429 => AuthError::RateLimited(detail),
                s if s >= 500 => AuthError::UpstreamUnavailable(detail),
                _ => AuthError::Refresh(detail),
            });
        }

        let refreshed: RefreshResponse = response.json().await?;
        let now = Utc::now();

        creds.access_token = Some(refreshed.access_token.clone());
        if let Some(rotated) = refreshed.refresh_token {
            creds.refresh_token = rotated;
        }
        if let Some(arn) = refreshed.profile_arn {
            creds.profile_arn = Some(arn);
        }
        creds.expires_at = refreshed.expires_in.map(|secs| {
            (now + Duration::seconds(secs)).to_rfc3339_opts(SecondsFormat::Secs, true)
        });

        // A usable token beats a durable one: disk trouble is logged, not
        // returned.
        if let Err(err) = creds.save(&self.path) {
            warn!(error = %err, path = %self.path.display(), "failed to persist rotated credentials");
        } else {
            debug!(path = %self.path.display(), "persisted rotated credentials");
        }

        info!(expires_at = ?creds.expires_at, "access token refreshed");
        Ok(refreshed.access_token)
    }
}

/// SHA-256 fingerprint of the credential identity, hex-encoded.
pub fn derive_machine_id(profile_arn: Option<&str>, refresh_token: &str) -> String {
    let seed = match profile_arn {
        Some(arn) if arn.starts_with("arn:aws") && arn.contains("profile/") => arn,
        _ => refresh_token,
    };
    let digest = Sha256::digest(format!("KotlinNativeAPI/{seed}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn validate_refresh_token(token: &str) -> Result<(), AuthError> {
    if token.is_empty() {
        return Err(AuthError::InvalidRefreshToken("token is empty"));
    }
    if token.len() < MIN_REFRESH_TOKEN_LEN {
        return Err(AuthError::InvalidRefreshToken(
            "token is shorter than any real refresh token",
        ));
    }
    if token.contains("...") {
        return Err(AuthError::InvalidRefreshToken(
            "token carries a truncation marker",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: Option<&str>) -> Credentials {
        Credentials {
            access_token: Some("tok".into()),
            refresh_token: "r".repeat(120),
            profile_arn: None,
            expires_at: expires_at.map(String::from),
            auth_method: None,
            provider: None,
        }
    }

    #[test]
    fn missing_expiry_counts_as_expired() {
        let now = Utc::now();
        assert!(creds(None).is_expired(now));
        assert!(creds(Some("not a timestamp")).is_expired(now));
    }

    #[test]
    fn expiry_margins() {
        let now = Utc::now();

        let in_three_minutes = (now + Duration::minutes(3)).to_rfc3339();
        let c = creds(Some(&in_three_minutes));
        assert!(c.is_expired(now));
        assert!(c.is_expiring_soon(now));

        let in_eight_minutes = (now + Duration::minutes(8)).to_rfc3339();
        let c = creds(Some(&in_eight_minutes));
        assert!(!c.is_expired(now));
        assert!(c.is_expiring_soon(now));

        let in_an_hour = (now + Duration::hours(1)).to_rfc3339();
        let c = creds(Some(&in_an_hour));
        assert!(!c.is_expired(now));
        assert!(!c.is_expiring_soon(now));
    }

    #[test]
    fn refresh_token_validation() {
        assert!(matches!(
            validate_refresh_token(""),
            Err(AuthError::InvalidRefreshToken(_))
        ));
        assert!(matches!(
            validate_refresh_token("short"),
            Err(AuthError::InvalidRefreshToken(_))
        ));
        let truncated = format!("{}...", "a".repeat(120));
        assert!(matches!(
            validate_refresh_token(&truncated),
            Err(AuthError::InvalidRefreshToken(_))
        ));
        let good = "a".repeat(120);
        assert!(validate_refresh_token(&good).is_ok());
    }

    #[test]
    fn machine_id_prefers_profile_arn() {
        let refresh = "r".repeat(120);
        let arn = "arn:aws:codewhisperer:us-east-1:1234:profile/ABCDEF";

        let from_arn = derive_machine_id(Some(arn), &refresh);
        let from_token = derive_machine_id(None, &refresh);
        assert_eq!(from_arn.len(), 64);
        assert_eq!(from_token.len(), 64);
        assert_ne!(from_arn, from_token);

        // A non-AWS ARN falls back to the refresh token.
        let odd = derive_machine_id(Some("arn:other:profile/X"), &refresh);
        assert_eq!(odd, from_token);
        // An AWS ARN without a profile segment falls back too.
        let no_profile = derive_machine_id(Some("arn:aws:iam::1234:role/X"), &refresh);
        assert_eq!(no_profile, from_token);
    }

    #[test]
    fn machine_id_is_deterministic() {
        let refresh = "r".repeat(120);
        assert_eq!(
            derive_machine_id(None, &refresh),
            derive_machine_id(None, &refresh)
        );
    }

    #[test]
    fn credentials_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let original = creds(Some("2026-01-01T00:00:00Z"));
        original.save(&path).unwrap();

        let loaded = Credentials::load(&path).unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("tok"));
        assert_eq!(loaded.expires_at.as_deref(), Some("2026-01-01T00:00:00Z"));

        // camelCase keys on disk.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"refreshToken\""));
        assert!(raw.contains("\"accessToken\""));
        assert!(!raw.contains("\"refresh_token\""));
    }

    #[test]
    fn debug_redacts_tokens() {
        let mut c = creds(None);
        c.access_token = Some("sekrit-access".into());
        let rendered = format!("{c:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("sekrit-access"));
        assert!(!rendered.contains("rrr"));
    }
}
