//! Service-account credentials for the Google APIs.
//!
//! A signed RS256 assertion is exchanged for a short-lived bearer token
//! (JWT-bearer grant). Setting a subject makes the service account act on
//! behalf of that user, which the directory, reports, classroom and gmail
//! APIs require for domain-wide reads.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use puller_core::backoff::{retry_with_backoff, RetryPolicy};
use puller_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Supplies bearer tokens for outgoing requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// The fields of a service-account key file this crate uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Auth(format!("cannot read key file {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Auth(format!("invalid key file {}: {}", path.display(), e)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

pub struct ServiceAccountAuth {
    key: ServiceAccountKey,
    scopes: Vec<String>,
    subject: Option<String>,
    http: reqwest::Client,
    retry: RetryPolicy,
    cached: Mutex<Option<AccessToken>>,
}

impl ServiceAccountAuth {
    pub fn new(
        key: ServiceAccountKey,
        scopes: Vec<String>,
        subject: Option<String>,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if scopes.is_empty() {
            return Err(Error::Config("at least one OAuth scope is required".into()));
        }

        Ok(Self {
            key,
            scopes,
            subject: subject.filter(|s| !s.is_empty()),
            http,
            retry,
            cached: Mutex::new(None),
        })
    }

    pub fn claims(&self, now: DateTime<Utc>) -> Claims {
        let iat = now.timestamp();
        Claims {
            iss: self.key.client_email.clone(),
            sub: self.subject.clone(),
            scope: self.scopes.join(" "),
            aud: self.key.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        }
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| Error::Auth(format!("invalid private key: {}", e)))?;
        encode(&Header::new(Algorithm::RS256), &self.claims(now), &signing_key)
            .map_err(|e| Error::Auth(format!("failed to sign assertion: {}", e)))
    }

    #[instrument(skip(self), fields(client = %self.key.client_email))]
    async fn exchange(&self) -> Result<AccessToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response: TokenResponse = retry_with_backoff(
            || self.request_token(&assertion),
            Error::is_retryable,
            self.retry,
            "token_exchange",
        )
        .await?;

        debug!(expires_in = response.expires_in, "Obtained access token");

        Ok(AccessToken {
            value: response.access_token,
            expires_at: now + Duration::seconds(response.expires_in),
        })
    }

    async fn request_token(&self, assertion: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(Error::Api { status: status.as_u16(), message: body });
            }
            return Err(Error::Auth(format!("token exchange rejected ({}): {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountAuth {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let token = self.exchange().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}
