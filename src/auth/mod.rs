//! Google OAuth credentials for the Gmail and Sheets connectors.
//!
//! The token file uses the authorized-user JSON layout written by Google's
//! client libraries, so an existing `token.json` can be reused as is.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;

pub mod loopback;

use self::loopback::LoopbackRedirect;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/spreadsheets",
];
const CACHE_SKEW_SECONDS: i64 = 60;
/// Upper bound applied to `expires_in` from the token endpoint.
const MAX_TOKEN_LIFETIME_SECONDS: u64 = 24 * 60 * 60;
const AUTHORIZATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);
const CLIENT_ID_ENV: &str = "MAILSHEET_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "MAILSHEET_CLIENT_SECRET";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

impl ClientSecrets {
    /// Environment overrides first, then the downloaded `credentials.json`.
    pub fn resolve(path: &Path) -> Result<Self> {
        Self::resolve_with(path, env_value(CLIENT_ID_ENV), env_value(CLIENT_SECRET_ENV))
    }

    fn resolve_with(
        path: &Path,
        env_client_id: Option<String>,
        env_client_secret: Option<String>,
    ) -> Result<Self> {
        let from_file = if path.exists() {
            Some(Self::from_file(path)?)
        } else {
            None
        };

        let client_id = env_client_id
            .or_else(|| from_file.as_ref().map(|file| file.client_id.clone()))
            .ok_or_else(|| {
                anyhow!(
                    "missing oauth client id ({CLIENT_ID_ENV} or {})",
                    path.display()
                )
            })?;
        let client_secret = env_client_secret
            .or_else(|| from_file.as_ref().map(|file| file.client_secret.clone()))
            .ok_or_else(|| {
                anyhow!(
                    "missing oauth client secret ({CLIENT_SECRET_ENV} or {})",
                    path.display()
                )
            })?;

        let (auth_uri, token_uri) = match from_file {
            Some(file) => (file.auth_uri, file.token_uri),
            None => (GOOGLE_AUTH_URL.to_string(), GOOGLE_TOKEN_URL.to_string()),
        };

        Ok(Self {
            client_id,
            client_secret,
            auth_uri,
            token_uri,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read oauth client secrets {}", path.display()))?;
        let file: ClientSecretsFile = serde_json::from_str(&raw)
            .with_context(|| format!("parse oauth client secrets {}", path.display()))?;
        let section = file.installed.or(file.web).ok_or_else(|| {
            anyhow!(
                "oauth client secrets {} has neither an 'installed' nor a 'web' section",
                path.display()
            )
        })?;

        Ok(Self {
            client_id: section.client_id,
            client_secret: section.client_secret,
            auth_uri: section
                .auth_uri
                .unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_uri: section
                .token_uri
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        })
    }

    fn from_token(token: &AuthorizedUserToken) -> Option<Self> {
        Some(Self {
            client_id: token.client_id.clone().filter(|v| !v.is_empty())?,
            client_secret: token.client_secret.clone().filter(|v| !v.is_empty())?,
            auth_uri: GOOGLE_AUTH_URL.to_string(),
            token_uri: token
                .token_uri
                .clone()
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecretsSection>,
    web: Option<ClientSecretsSection>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsSection {
    client_id: String,
    client_secret: String,
    auth_uri: Option<String>,
    token_uri: Option<String>,
}

/// Persisted user authorization (`token.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizedUserToken {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl AuthorizedUserToken {
    /// The stored access token, unless it expires within the skew window.
    pub fn usable_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let expiry = self.expiry?;
        if expiry <= now + Duration::seconds(CACHE_SKEW_SECONDS) {
            return None;
        }
        self.token.as_deref().filter(|token| !token.is_empty())
    }

    fn apply(&mut self, response: OAuthTokenResponse, now: DateTime<Utc>) -> String {
        let lifetime = i64::try_from(response.expires_in.min(MAX_TOKEN_LIFETIME_SECONDS))
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(Duration::zero);
        self.expiry = Some(now + lifetime);
        self.token = Some(response.access_token.clone());
        if let Some(refresh_token) = response.refresh_token.filter(|v| !v.is_empty()) {
            self.refresh_token = Some(refresh_token);
        }
        response.access_token
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    refresh_token: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

/// Supplies access tokens, refreshing or re-authorizing as needed.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    client: Client,
    config: AuthConfig,
}

impl CredentialProvider {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Return a valid access token. A stored token that cannot be refreshed is
    /// discarded and the interactive authorization runs instead.
    pub async fn obtain(&self) -> Result<String> {
        if let Some(mut token) = self.load_token() {
            if let Some(access_token) = token.usable_access_token(Utc::now()) {
                debug!("using stored google access token");
                return Ok(access_token.to_string());
            }

            if let Some(refresh_token) = token.refresh_token.clone().filter(|v| !v.is_empty()) {
                match self.refresh(&token, &refresh_token).await {
                    Ok(response) => {
                        let access_token = token.apply(response, Utc::now());
                        self.store_token(&token)?;
                        info!("refreshed google access token");
                        return Ok(access_token);
                    }
                    Err(error) => {
                        warn!(
                            error = %format!("{error:#}"),
                            "google token refresh failed; discarding stored token"
                        );
                        self.discard_token()?;
                    }
                }
            }
        }

        let token = self.authorize().await?;
        token
            .token
            .ok_or_else(|| anyhow!("google authorization returned no access token"))
    }

    /// Run the browser consent flow and persist the resulting token.
    pub async fn authorize(&self) -> Result<AuthorizedUserToken> {
        let secrets = ClientSecrets::resolve(&self.config.credentials_path)?;
        let redirect = LoopbackRedirect::bind()?;
        let redirect_uri = redirect.redirect_uri().to_string();
        let consent = loopback::consent_request(&secrets, &redirect_uri)?;

        eprintln!(
            "Open this URL in a browser to authorize mailsheet:\n\n{}\n",
            consent.url
        );
        let code = redirect
            .wait_for_code(consent.csrf_state.secret().clone(), AUTHORIZATION_TIMEOUT)
            .await?;

        let response = self
            .token_request(
                &secrets.token_uri,
                &[
                    ("code", code.as_str()),
                    ("code_verifier", consent.pkce_verifier.secret().as_str()),
                    ("client_id", secrets.client_id.as_str()),
                    ("client_secret", secrets.client_secret.as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("grant_type", "authorization_code"),
                ],
            )
            .await?;

        let mut token = AuthorizedUserToken {
            token_uri: Some(secrets.token_uri.clone()),
            client_id: Some(secrets.client_id.clone()),
            client_secret: Some(secrets.client_secret.clone()),
            scopes: SCOPES.iter().map(|scope| scope.to_string()).collect(),
            ..AuthorizedUserToken::default()
        };
        token.apply(response, Utc::now());
        if token.refresh_token.is_none() {
            warn!("authorization granted no refresh token; the next run will ask again");
        }

        self.store_token(&token)?;
        info!(path = %self.config.token_path().display(), "stored google authorization");
        Ok(token)
    }

    async fn refresh(
        &self,
        token: &AuthorizedUserToken,
        refresh_token: &str,
    ) -> Result<OAuthTokenResponse> {
        let secrets = match ClientSecrets::from_token(token) {
            Some(secrets) => secrets,
            None => ClientSecrets::resolve(&self.config.credentials_path)?,
        };

        self.token_request(
            &secrets.token_uri,
            &[
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
        )
        .await
    }

    async fn token_request(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<OAuthTokenResponse> {
        let response = self
            .client
            .post(token_uri)
            .form(form)
            .send()
            .await
            .with_context(|| format!("request google oauth token from {token_uri}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("read google token response")?;
        if !status.is_success() {
            return Err(anyhow!(
                "google oauth token request failed: status={} body={}",
                status,
                crate::connectors::redact_response_body(&body)
            ));
        }

        serde_json::from_str(&body).context("decode google token JSON response")
    }

    fn load_token(&self) -> Option<AuthorizedUserToken> {
        let path = self.config.token_path();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "unable to read token file");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(token) => Some(token),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "ignoring unreadable token file");
                None
            }
        }
    }

    fn store_token(&self, token: &AuthorizedUserToken) -> Result<()> {
        let path = self.config.token_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create token directory {}", parent.display()))?;
        }

        let payload = serde_json::to_vec_pretty(token).context("serialize token file")?;
        let temp_path = token_temp_path(path);
        let written = create_private_file(&temp_path).and_then(|mut file| {
            file.write_all(&payload)?;
            file.sync_all()
        });
        let renamed = written.and_then(|()| std::fs::rename(&temp_path, path));
        if let Err(error) = renamed {
            let _ = std::fs::remove_file(&temp_path);
            return Err(error).with_context(|| format!("write token file {}", path.display()));
        }

        Ok(())
    }

    fn discard_token(&self) -> Result<()> {
        let path = self.config.token_path();
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("remove token file {}", path.display()))
            }
        }
    }
}

fn token_temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("token.json");
    path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().as_simple()))
}

/// Owner-only from creation, so the secret is never briefly world-readable.
fn create_private_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use super::{
        AuthorizedUserToken, ClientSecrets, CredentialProvider, OAuthTokenResponse,
        GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL,
    };
    use crate::config::AuthConfig;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mailsheet-auth-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn provider(dir: &std::path::Path) -> CredentialProvider {
        CredentialProvider::new(AuthConfig {
            credentials_path: dir.join("credentials.json"),
            token_path: dir.join("token.json"),
        })
    }

    #[test]
    fn installed_client_secrets_are_parsed() {
        let dir = temp_dir();
        let path = dir.join("credentials.json");
        std::fs::write(
            &path,
            json!({
                "installed": {
                    "client_id": "client-id.apps.googleusercontent.com",
                    "project_id": "mailsheet",
                    "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                    "token_uri": "https://oauth2.googleapis.com/token",
                    "client_secret": "client-secret",
                    "redirect_uris": ["http://localhost"]
                }
            })
            .to_string(),
        )
        .expect("write client secrets");

        let secrets = ClientSecrets::resolve_with(&path, None, None).expect("resolve secrets");
        assert_eq!(secrets.client_id, "client-id.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret, "client-secret");
        assert_eq!(secrets.token_uri, GOOGLE_TOKEN_URL);

        let overridden = ClientSecrets::resolve_with(
            &path,
            Some("env-id".to_string()),
            Some("env-secret".to_string()),
        )
        .expect("resolve with env");
        assert_eq!(overridden.client_id, "env-id");
        assert_eq!(overridden.client_secret, "env-secret");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn env_only_client_secrets_use_google_endpoints() {
        let dir = temp_dir();
        let secrets = ClientSecrets::resolve_with(
            &dir.join("missing.json"),
            Some("env-id".to_string()),
            Some("env-secret".to_string()),
        )
        .expect("resolve from env");
        assert_eq!(secrets.auth_uri, GOOGLE_AUTH_URL);
        assert_eq!(secrets.token_uri, GOOGLE_TOKEN_URL);

        let error = ClientSecrets::resolve_with(&dir.join("missing.json"), None, None)
            .expect_err("no client id anywhere");
        assert!(error.to_string().contains("client id"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn client_secrets_without_section_are_rejected() {
        let dir = temp_dir();
        let path = dir.join("credentials.json");
        std::fs::write(&path, r#"{"other": {}}"#).expect("write client secrets");

        assert!(ClientSecrets::from_file(&path).is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn google_token_file_deserializes() {
        let raw = r#"{
            "token": "ya29.abc",
            "refresh_token": "1//refresh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "client-id",
            "client_secret": "client-secret",
            "scopes": ["https://www.googleapis.com/auth/gmail.modify"],
            "universe_domain": "googleapis.com",
            "account": "",
            "expiry": "2026-01-01T12:00:00.123456Z"
        }"#;
        let token: AuthorizedUserToken = serde_json::from_str(raw).expect("decode token file");
        assert_eq!(token.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(token.scopes.len(), 1);

        let before_expiry = Utc.with_ymd_and_hms(2026, 1, 1, 11, 0, 0).unwrap();
        assert_eq!(token.usable_access_token(before_expiry), Some("ya29.abc"));

        let within_skew = Utc.with_ymd_and_hms(2026, 1, 1, 11, 59, 30).unwrap();
        assert!(token.usable_access_token(within_skew).is_none());

        let from_token = ClientSecrets::from_token(&token).expect("secrets from token");
        assert_eq!(from_token.client_id, "client-id");
    }

    #[test]
    fn token_without_expiry_is_not_usable() {
        let token = AuthorizedUserToken {
            token: Some("ya29.abc".to_string()),
            ..AuthorizedUserToken::default()
        };
        assert!(token.usable_access_token(Utc::now()).is_none());
    }

    #[test]
    fn applying_refresh_keeps_existing_refresh_token() {
        let now = Utc::now();
        let mut token = AuthorizedUserToken {
            refresh_token: Some("keep-me".to_string()),
            ..AuthorizedUserToken::default()
        };
        let response: OAuthTokenResponse = serde_json::from_str(
            r#"{"access_token":"fresh","expires_in":3599,"token_type":"Bearer","scope":"x"}"#,
        )
        .expect("decode token response");

        let access_token = token.apply(response, now);
        assert_eq!(access_token, "fresh");
        assert_eq!(token.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(token.expiry, Some(now + Duration::seconds(3599)));
        assert_eq!(token.usable_access_token(now), Some("fresh"));
    }

    #[test]
    fn absurd_token_lifetimes_are_clamped() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let mut token = AuthorizedUserToken::default();
        let response: OAuthTokenResponse = serde_json::from_str(
            r#"{"access_token":"fresh","expires_in":18446744073709551615}"#,
        )
        .expect("decode token response");

        token.apply(response, now);
        assert_eq!(token.expiry, Some(now + Duration::hours(24)));
    }

    #[test]
    fn token_file_is_replaced_atomically() {
        let dir = temp_dir();
        let provider = provider(&dir);
        let first = AuthorizedUserToken {
            token: Some("ya29.first".to_string()),
            ..AuthorizedUserToken::default()
        };
        let second = AuthorizedUserToken {
            token: Some("ya29.second".to_string()),
            ..AuthorizedUserToken::default()
        };

        provider.store_token(&first).expect("store first token");
        provider.store_token(&second).expect("replace token");
        assert_eq!(provider.load_token(), Some(second));

        let leftovers = std::fs::read_dir(&dir)
            .expect("list token dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect::<Vec<_>>();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.join("token.json"))
                .expect("token metadata")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn token_file_round_trips_and_can_be_discarded() {
        let dir = temp_dir();
        let provider = provider(&dir);
        let token = AuthorizedUserToken {
            token: Some("ya29.stored".to_string()),
            refresh_token: Some("1//refresh".to_string()),
            expiry: Some(Utc::now() + Duration::minutes(30)),
            ..AuthorizedUserToken::default()
        };

        provider.store_token(&token).expect("store token");
        assert_eq!(provider.load_token(), Some(token));

        provider.discard_token().expect("discard token");
        assert!(provider.load_token().is_none());
        provider.discard_token().expect("discard missing token");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_token_file_is_ignored() {
        let dir = temp_dir();
        let provider = provider(&dir);
        std::fs::write(dir.join("token.json"), "not json").expect("write corrupt token");

        assert!(provider.load_token().is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn obtain_uses_unexpired_stored_token() {
        let dir = temp_dir();
        let provider = provider(&dir);
        provider
            .store_token(&AuthorizedUserToken {
                token: Some("ya29.cached".to_string()),
                expiry: Some(Utc::now() + Duration::minutes(30)),
                ..AuthorizedUserToken::default()
            })
            .expect("store token");

        let access_token = provider.obtain().await.expect("obtain token");
        assert_eq!(access_token, "ya29.cached");

        let _ = std::fs::remove_dir_all(dir);
    }
}
