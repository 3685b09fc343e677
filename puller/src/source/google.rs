use super::ListSource;
use crate::auth::TokenProvider;
use crate::model::{scalar_to_string, ApiRequest};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use puller_core::backoff::{retry_with_backoff, RetryPolicy};
use puller_core::config::HttpConfig;
use puller_core::{Error, Result};
use reqwest::Url;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// REST client for the Google Workspace APIs.
pub struct GoogleApiClient {
    http: reqwest::Client,
    auth: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl GoogleApiClient {
    pub fn new(auth: Arc<dyn TokenProvider>, config: &HttpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let limiter = config
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            http,
            auth,
            retry: RetryPolicy::new(config.max_retries, config.retry_base_delay_ms),
            limiter,
        })
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let token = self.auth.token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ListSource for GoogleApiClient {
    #[instrument(skip(self, request), fields(method = request.method.name))]
    async fn execute(&self, request: &ApiRequest) -> Result<Value> {
        let url = build_url(request)?;
        debug!(%url, "Executing request");

        retry_with_backoff(
            || self.get_json(url.clone()),
            Error::is_retryable,
            self.retry,
            request.method.name,
        )
        .await
    }
}

/// Renders the request URL: path placeholders are taken out of the
/// parameters and percent-encoded, the rest become query pairs.
pub fn build_url(request: &ApiRequest) -> Result<Url> {
    let template = request.method.url_template;
    let path_start = template
        .find("://")
        .and_then(|scheme_end| {
            template[scheme_end + 3..]
                .find('/')
                .map(|i| scheme_end + 3 + i)
        })
        .unwrap_or(template.len());

    let mut url = Url::parse(&template[..path_start])
        .map_err(|e| Error::Validation(format!("bad URL template {}: {}", template, e)))?;
    let mut params = request.params.clone();

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Validation(format!("URL {} cannot have a path", template)))?;
        segments.clear();

        for segment in template[path_start..].split('/').filter(|s| !s.is_empty()) {
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    let value = params
                        .remove(name)
                        .as_ref()
                        .and_then(scalar_to_string)
                        .ok_or_else(|| {
                            Error::Validation(format!("path parameter `{}` is not set", name))
                        })?;
                    segments.push(&value);
                }
                None => {
                    segments.push(segment);
                }
            }
        }
    }

    {
        let mut query = url.query_pairs_mut();
        for (name, value) in &params {
            match value {
                Value::Array(items) => {
                    for item in items.iter().filter_map(scalar_to_string) {
                        query.append_pair(name, &item);
                    }
                }
                other => {
                    if let Some(text) = scalar_to_string(other) {
                        query.append_pair(name, &text);
                    }
                }
            }
        }
        if let Some(token) = &request.page_token {
            query.append_pair("pageToken", token);
        }
    }

    // An empty query_pairs_mut() still leaves a trailing '?'.
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

/// Extracts `error.message` from a Google error body, or falls back to the
/// raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}
