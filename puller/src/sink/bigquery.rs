use super::{JobState, LoadJob, Sink, TableRef};
use crate::auth::TokenProvider;
use crate::model::Record;
use async_trait::async_trait;
use metrics::counter;
use puller_core::backoff::{retry_with_backoff, RetryPolicy};
use puller_core::telemetry::{LOAD_JOBS, RECORDS_LOADED};
use puller_core::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const UPLOAD_ENDPOINT: &str = "https://bigquery.googleapis.com/upload/bigquery/v2/projects";
const JOBS_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2/projects";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl JobResource {
    fn state(&self) -> JobState {
        match self.status.as_ref().map(|s| s.state.as_str()) {
            Some("DONE") => JobState::Done,
            Some("RUNNING") => JobState::Running,
            _ => JobState::Pending,
        }
    }

    fn failure(&self) -> Option<Error> {
        let error = self.status.as_ref()?.error_result.as_ref()?;
        Some(Error::Load {
            job_id: self.job_reference.job_id.clone(),
            message: format!(
                "{}: {}",
                error.reason.as_deref().unwrap_or("error"),
                error.message.as_deref().unwrap_or("no message")
            ),
        })
    }
}

/// Submits BigQuery load jobs from newline-delimited JSON.
///
/// By default a load returns as soon as BigQuery has accepted the job; with
/// `await_jobs` it polls until the job is done and reports its error result.
pub struct BigQuerySink {
    http: reqwest::Client,
    auth: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
    await_jobs: bool,
    poll_interval: Duration,
}

impl BigQuerySink {
    pub fn new(
        http: reqwest::Client,
        auth: Arc<dyn TokenProvider>,
        retry: RetryPolicy,
        await_jobs: bool,
        poll_interval: Duration,
    ) -> Self {
        Self {
            http,
            auth,
            retry,
            await_jobs,
            poll_interval,
        }
    }

    async fn submit(
        &self,
        destination: &TableRef,
        job_id: &str,
        boundary: &str,
        body: &[u8],
    ) -> Result<JobResource> {
        let token = self.auth.token().await?;
        let url = format!(
            "{}/{}/jobs?uploadType=multipart",
            UPLOAD_ENDPOINT, destination.project
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        // Job ids are client-generated, so a conflict means an earlier attempt
        // was accepted.
        if status == reqwest::StatusCode::CONFLICT {
            debug!(job_id, "Load job already exists");
            return self.get_job(&destination.project, job_id, None).await;
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    async fn get_job(
        &self,
        project: &str,
        job_id: &str,
        location: Option<&str>,
    ) -> Result<JobResource> {
        let token = self.auth.token().await?;
        let mut request = self
            .http
            .get(format!("{}/{}/jobs/{}", JOBS_ENDPOINT, project, job_id))
            .bearer_auth(token);
        if let Some(location) = location {
            request = request.query(&[("location", location)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    async fn wait(&self, project: &str, mut job: JobResource) -> Result<JobResource> {
        while job.state() != JobState::Done {
            tokio::time::sleep(self.poll_interval).await;
            let job_id = job.job_reference.job_id.clone();
            let location = job.job_reference.location.clone();
            job = retry_with_backoff(
                || self.get_job(project, &job_id, location.as_deref()),
                Error::is_retryable,
                self.retry,
                "bigquery.jobs.get",
            )
            .await?;
        }
        Ok(job)
    }
}

#[async_trait]
impl Sink for BigQuerySink {
    #[instrument(skip(self, records), fields(destination = %destination, records = records.len()))]
    async fn load(&self, records: &[Record], destination: &TableRef) -> Result<LoadJob> {
        if records.is_empty() {
            return Err(Error::Validation(format!(
                "refusing to submit an empty load to {}",
                destination
            )));
        }

        let job_id = format!("puller_{}_{}", destination.table, Uuid::new_v4().simple());
        let boundary = format!("puller_{}", Uuid::new_v4().simple());
        let configuration = load_configuration(destination, &job_id);
        let body = multipart_related(&configuration, &encode_ndjson(records)?, &boundary);

        let mut job = retry_with_backoff(
            || self.submit(destination, &job_id, &boundary, &body),
            Error::is_retryable,
            self.retry,
            "bigquery.jobs.insert",
        )
        .await?;

        if let Some(error) = job.failure() {
            return Err(error);
        }

        counter!(LOAD_JOBS).increment(1);
        counter!(RECORDS_LOADED).increment(records.len() as u64);
        info!(job_id = %job.job_reference.job_id, "Submitted load job");

        if self.await_jobs {
            job = self.wait(&destination.project, job).await?;
            if let Some(error) = job.failure() {
                return Err(error);
            }
            debug!(job_id = %job.job_reference.job_id, "Load job done");
        }

        Ok(LoadJob {
            job_id: job.job_reference.job_id.clone(),
            destination: destination.clone(),
            records: records.len(),
            state: job.state(),
        })
    }
}

/// Load job resource: append to the destination, create it if missing, and
/// let BigQuery infer the schema from the rows.
pub fn load_configuration(destination: &TableRef, job_id: &str) -> Value {
    json!({
        "jobReference": {
            "projectId": destination.project,
            "jobId": job_id,
        },
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": destination.project,
                    "datasetId": destination.dataset,
                    "tableId": destination.table,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "autodetect": true,
                "createDisposition": "CREATE_IF_NEEDED",
                "writeDisposition": "WRITE_APPEND",
            }
        }
    })
}

/// One compact JSON document per line.
pub fn encode_ndjson(records: &[Record]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(records.len() * 256);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn multipart_related(metadata: &Value, data: &[u8], boundary: &str) -> Vec<u8> {
    let metadata = metadata.to_string();
    let mut body = Vec::with_capacity(metadata.len() + data.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn users_table() -> TableRef {
        TableRef::new("proj", "workspace", "users").unwrap()
    }

    #[test]
    fn loads_always_append_and_create_if_needed() {
        let config = load_configuration(&users_table(), "job-1");
        let load = &config["configuration"]["load"];

        assert_eq!(load["writeDisposition"], "WRITE_APPEND");
        assert_eq!(load["createDisposition"], "CREATE_IF_NEEDED");
        assert_eq!(load["autodetect"], true);
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(
            load["destinationTable"],
            json!({ "projectId": "proj", "datasetId": "workspace", "tableId": "users" })
        );
        assert_eq!(config["jobReference"]["jobId"], "job-1");
    }

    #[test]
    fn ndjson_has_one_record_per_line() {
        let records = vec![
            json!({ "id": "1", "name": { "fullName": "Ada" } }),
            json!({ "id": "2", "suspended": true }),
        ];
        let encoded = String::from_utf8(encode_ndjson(&records).unwrap()).unwrap();
        let lines: Vec<&str> = encoded.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(serde_json::from_str::<Value>(lines[0]).unwrap(), records[0]);
        assert!(encoded.ends_with('\n'));
    }

    #[test]
    fn multipart_body_wraps_metadata_and_data() {
        let body = multipart_related(&json!({ "k": "v" }), b"{\"a\":1}\n", "b0");
        let text = String::from_utf8(body).unwrap();

        assert_eq!(
            text,
            "--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"k\":\"v\"}\r\n\
             --b0\r\nContent-Type: application/octet-stream\r\n\r\n{\"a\":1}\n\r\n--b0--\r\n"
        );
    }

    #[test]
    fn job_error_result_becomes_load_error() {
        let job: JobResource = serde_json::from_value(json!({
            "jobReference": { "projectId": "proj", "jobId": "j1", "location": "US" },
            "status": {
                "state": "DONE",
                "errorResult": { "reason": "invalid", "message": "bad row" }
            }
        }))
        .unwrap();

        assert_eq!(job.state(), JobState::Done);
        match job.failure() {
            Some(Error::Load { job_id, message }) => {
                assert_eq!(job_id, "j1");
                assert_eq!(message, "invalid: bad row");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn accepted_job_without_status_is_pending() {
        let job: JobResource =
            serde_json::from_value(json!({ "jobReference": { "jobId": "j2" } })).unwrap();
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.failure().is_none());
    }
}
