use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Request parameters for one resource, keyed in snake_case (`max_results`).
///
/// The `config` crate lowercases keys on load, so the API's camelCase names
/// only exist after [`ResourceConfig::api_parameters`].
pub type MethodParameters = BTreeMap<String, Value>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub environment: EnvironmentConfig,
    pub bigquery: BigQueryConfig,
    pub http: HttpConfig,
    pub usage_days_back: u32,
    pub resources: BTreeMap<String, ResourceConfig>,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    pub service_account_key: PathBuf,
    pub scopes: Vec<String>,
    pub admin_email: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BigQueryConfig {
    pub dataset_id: String,
    /// Flush threshold in records, checked between pages.
    pub batch_size: usize,
    /// Key file for the load jobs; falls back to `environment.service_account_key`.
    pub credentials: Option<PathBuf>,
    pub await_jobs: bool,
    pub job_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub method_parameters: MethodParameters,
    pub table_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    /// Loads defaults, then `path` (or `config.*` in the working directory if
    /// present), then `PULLER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Load default configuration
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                builder = builder.add_source(File::with_name("config").required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PULLER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Config = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.project_id.is_empty() {
            return Err(ConfigError::Message("environment.project_id is required".into()));
        }

        if self.bigquery.dataset_id.is_empty() {
            return Err(ConfigError::Message("bigquery.dataset_id is required".into()));
        }

        if self.bigquery.batch_size == 0 {
            return Err(ConfigError::Message(
                "bigquery.batch_size must be greater than 0".into(),
            ));
        }

        if self.usage_days_back == 0 {
            return Err(ConfigError::Message(
                "usage_days_back must be greater than 0".into(),
            ));
        }

        if let Some((name, _)) = self
            .resources
            .iter()
            .find(|(_, resource)| resource.table_id.trim().is_empty())
        {
            return Err(ConfigError::Message(format!(
                "resources.{name}.table_id is required"
            )));
        }

        Ok(())
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.get(name)
    }

    /// Key file used for BigQuery load jobs.
    pub fn bigquery_credentials(&self) -> &Path {
        self.bigquery
            .credentials
            .as_deref()
            .unwrap_or(&self.environment.service_account_key)
    }
}

impl ResourceConfig {
    /// The method parameters under the remote API's camelCase names.
    pub fn api_parameters(&self) -> MethodParameters {
        self.method_parameters
            .iter()
            .map(|(key, value)| (camel_case(key), value.clone()))
            .collect()
    }
}

/// `max_results` -> `maxResults`. Keys without underscores pass through.
pub fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, part) in key.split('_').filter(|p| !p.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(part);
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

fn resource(table_id: &str, parameters: Value) -> ResourceConfig {
    let method_parameters = match parameters {
        Value::Object(map) => map.into_iter().collect(),
        _ => MethodParameters::new(),
    };
    ResourceConfig {
        method_parameters,
        table_id: table_id.to_string(),
    }
}

fn activity(application: &str, table_id: &str) -> ResourceConfig {
    resource(
        table_id,
        json!({ "user_key": "all", "application_name": application, "max_results": 1000 }),
    )
}

impl Default for Config {
    fn default() -> Self {
        let resources = BTreeMap::from([
            (
                "users".to_string(),
                resource("users", json!({ "customer": "my_customer", "max_results": 500 })),
            ),
            ("meets".to_string(), activity("meet", "meets")),
            ("calendar".to_string(), activity("calendar", "calendar")),
            ("logins".to_string(), activity("login", "logins")),
            ("chat".to_string(), activity("chat", "chat")),
            ("drive".to_string(), activity("drive", "drive")),
            ("user_accounts".to_string(), activity("user_accounts", "user_accounts")),
            (
                "usage".to_string(),
                resource("user_usage", json!({ "user_key": "all", "max_results": 1000 })),
            ),
            ("courses".to_string(), resource("courses", json!({ "page_size": 500 }))),
            (
                "course_work".to_string(),
                resource("course_work", json!({ "page_size": 500 })),
            ),
            (
                "gmail_user_profiles".to_string(),
                resource("gmail_user_profiles", json!({})),
            ),
        ]);

        Self {
            environment: EnvironmentConfig {
                service_account_key: PathBuf::from("service_account.json"),
                scopes: vec![
                    "https://www.googleapis.com/auth/admin.directory.user.readonly".to_string(),
                    "https://www.googleapis.com/auth/admin.reports.audit.readonly".to_string(),
                    "https://www.googleapis.com/auth/admin.reports.usage.readonly".to_string(),
                    "https://www.googleapis.com/auth/classroom.courses.readonly".to_string(),
                    "https://www.googleapis.com/auth/classroom.coursework.students.readonly"
                        .to_string(),
                    "https://www.googleapis.com/auth/gmail.readonly".to_string(),
                ],
                admin_email: String::new(),
                project_id: "workspace-analytics".to_string(),
            },
            bigquery: BigQueryConfig {
                dataset_id: "workspace".to_string(),
                batch_size: 500,
                credentials: None,
                await_jobs: false,
                job_poll_interval_ms: 2000,
            },
            http: HttpConfig {
                max_retries: 3,
                retry_base_delay_ms: 1000,
                timeout_secs: 60,
                requests_per_second: None,
            },
            usage_days_back: 14,
            resources,
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
