use crate::batch::Batch;
use crate::descriptor::{Paging, ResourceDescriptor};
use crate::model::{take_records, ErrorReport, Progress, RunStats};
use crate::paginator::{log_completion, Paginator};
use metrics::counter;
use puller_core::telemetry::{FANOUT_FAILURES, PAGES_FETCHED};
use puller_core::{Error, Result};
use tracing::{info, instrument, warn};

impl Paginator {
    /// Runs `template` once per key, in order, with the key substituted into
    /// the template's iteration parameter.
    ///
    /// A failing key is recorded in the returned report and the remaining keys
    /// still run. Paged methods get a full pagination run per key. One-shot
    /// methods share a single batch across keys, flushed at the threshold and
    /// once more at the end.
    #[instrument(skip(self, template, keys), fields(resource = template.name, keys = keys.len()))]
    pub async fn run_many(
        &self,
        template: &ResourceDescriptor,
        keys: &[String],
    ) -> Result<ErrorReport> {
        let param = template.iteration_param.ok_or_else(|| {
            Error::Validation(format!("{} has no per-key parameter", template.name))
        })?;

        match template.method.paging {
            Paging::Paged => self.run_paged_keys(template, param, keys).await,
            Paging::OneShot => self.run_one_shot_keys(template, param, keys).await,
        }
    }

    async fn run_paged_keys(
        &self,
        template: &ResourceDescriptor,
        param: &str,
        keys: &[String],
    ) -> Result<ErrorReport> {
        let mut report = ErrorReport::new();
        let mut totals = RunStats::default();

        for (index, key) in keys.iter().enumerate() {
            let descriptor = template.with_param(param, key.as_str());
            match self
                .run_pass(&descriptor, Progress::new(index, keys.len()))
                .await
            {
                Ok(stats) => totals.merge(stats),
                Err(e) => {
                    warn!(key = %key, error = %e, "Key failed, continuing with the rest");
                    counter!(FANOUT_FAILURES, "resource" => template.name).increment(1);
                    report.record(key, &e);
                }
            }
        }

        info!(keys = keys.len(), failed = report.len(), "Fan-out finished");
        log_completion(&totals);
        Ok(report)
    }

    async fn run_one_shot_keys(
        &self,
        template: &ResourceDescriptor,
        param: &str,
        keys: &[String],
    ) -> Result<ErrorReport> {
        info!("Initiating data acquisition and insertion process");

        let destination = self.destination(template)?;
        let mut batch = Batch::new(self.batch_size());
        let mut report = ErrorReport::new();
        let mut stats = RunStats::default();

        for key in keys {
            let descriptor = template.with_param(param, key.as_str());
            let fetched = async {
                let request = descriptor.first_request()?;
                self.source().execute(&request).await
            }
            .await;

            match fetched {
                Ok(response) => {
                    stats.pages += 1;
                    counter!(PAGES_FETCHED, "resource" => template.name).increment(1);
                    batch.extend(take_records(response, descriptor.record_field.as_deref()));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Key failed, continuing with the rest");
                    counter!(FANOUT_FAILURES, "resource" => template.name).increment(1);
                    report.record(key, &e);
                    continue;
                }
            }

            if batch.is_full() {
                self.flush(&mut batch, &destination, &mut stats).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &destination, &mut stats).await?;
        }

        info!(keys = keys.len(), failed = report.len(), "Fan-out finished");
        log_completion(&stats);
        Ok(report)
    }
}
