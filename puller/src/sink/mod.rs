pub mod bigquery;

use crate::model::Record;
use async_trait::async_trait;
use puller_core::{Error, Result};
use std::fmt;

/// Fully qualified destination table, `{project}.{dataset}.{table}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let table_ref = Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        };

        // Domain-scoped project ids ("example.com:proj") may contain dots.
        let bad_part = |part: &str, allow_dots: bool| part.is_empty() || (!allow_dots && part.contains('.'));
        if bad_part(&table_ref.project, true)
            || bad_part(&table_ref.dataset, false)
            || bad_part(&table_ref.table, false)
        {
            return Err(Error::Validation(format!(
                "invalid destination table `{}`",
                table_ref
            )));
        }
        Ok(table_ref)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

/// Handle to a submitted load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub job_id: String,
    pub destination: TableRef,
    pub records: usize,
    pub state: JobState,
}

/// Append-only destination for batches of records.
///
/// Implementations append to `destination`, create it from the records'
/// inferred schema when it does not exist, and never truncate or replace it.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn load(&self, records: &[Record], destination: &TableRef) -> Result<LoadJob>;
}

pub use bigquery::BigQuerySink;
