use crate::auth::{ServiceAccountAuth, ServiceAccountKey, BIGQUERY_SCOPE};
use crate::descriptor::ResourceKind;
use crate::paginator::Paginator;
use crate::sink::{BigQuerySink, Sink};
use crate::source::{GoogleApiClient, ListSource};
use crate::sweep::dates_back;
use chrono::{Local, NaiveDate};
use puller_core::backoff::RetryPolicy;
use puller_core::{Config, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Shared by every resource run in one process invocation.
pub struct RunContext {
    pub config: Arc<Config>,
    pub source: Arc<dyn ListSource>,
    pub sink: Arc<dyn Sink>,
}

impl RunContext {
    /// Builds the Google API client (acting as `admin_email`) and the
    /// BigQuery sink from the configured service-account keys.
    #[instrument(skip(config))]
    pub fn from_config(config: Config) -> Result<Self> {
        info!("Initializing clients");

        let retry = RetryPolicy::new(config.http.max_retries, config.http.retry_base_delay_ms);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_secs))
            .build()?;

        let workspace_auth = ServiceAccountAuth::new(
            ServiceAccountKey::from_file(&config.environment.service_account_key)?,
            config.environment.scopes.clone(),
            Some(config.environment.admin_email.clone()),
            http.clone(),
            retry,
        )?;
        let source = GoogleApiClient::new(Arc::new(workspace_auth), &config.http)?;

        let bigquery_auth = ServiceAccountAuth::new(
            ServiceAccountKey::from_file(config.bigquery_credentials())?,
            vec![BIGQUERY_SCOPE.to_string()],
            None,
            http.clone(),
            retry,
        )?;
        let sink = BigQuerySink::new(
            http,
            Arc::new(bigquery_auth),
            retry,
            config.bigquery.await_jobs,
            Duration::from_millis(config.bigquery.job_poll_interval_ms),
        );

        Ok(Self {
            config: Arc::new(config),
            source: Arc::new(source),
            sink: Arc::new(sink),
        })
    }

    pub fn paginator(&self) -> Paginator {
        Paginator::new(
            Arc::clone(&self.source),
            Arc::clone(&self.sink),
            self.config.environment.project_id.clone(),
            self.config.bigquery.dataset_id.clone(),
            self.config.bigquery.batch_size,
        )
    }
}

/// Which dates the usage report sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageWindow {
    /// The last N days, newest first, starting today.
    DaysBack(u32),
    /// A single date.
    Date(NaiveDate),
}

impl UsageWindow {
    pub fn dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        match self {
            UsageWindow::DaysBack(days) => dates_back(today, *days),
            UsageWindow::Date(date) => vec![*date],
        }
    }
}

pub struct App {
    context: RunContext,
    error_dir: PathBuf,
}

impl App {
    pub fn new(context: RunContext, error_dir: PathBuf) -> Self {
        Self { context, error_dir }
    }

    /// Runs one resource: a single pagination run, a date sweep for usage
    /// reports, or a key harvest followed by a fan-out for dependent
    /// resources.
    #[instrument(skip(self), fields(resource = %kind))]
    pub async fn run(&self, kind: ResourceKind, window: UsageWindow) -> Result<()> {
        info!("Regenerating {} data", kind);

        let config = &self.context.config;
        let paginator = self.context.paginator();
        let descriptor = kind.descriptor(config)?;

        if kind == ResourceKind::Usage {
            let dates = window.dates(Local::now().date_naive());
            paginator.run_dates(&descriptor, &dates).await?;
            return Ok(());
        }

        let Some(key_source) = kind.key_source() else {
            paginator.run(&descriptor).await?;
            return Ok(());
        };

        let keys = paginator
            .harvest(&key_source.resource.descriptor(config)?, key_source.field)
            .await?;
        let report = paginator.run_many(&descriptor, &keys).await?;

        if let Some(file) = kind.error_file() {
            let path = self.error_dir.join(file);
            if report.persist(&path)? {
                for failure in report.failures() {
                    debug!(key = %failure.key, reason = %failure.reason, "Failed key");
                }
                warn!(
                    path = %path.display(),
                    failed = report.len(),
                    "Some keys failed; wrote their ids for follow-up"
                );
            }
        }

        Ok(())
    }
}
