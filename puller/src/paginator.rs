use crate::batch::Batch;
use crate::descriptor::ResourceDescriptor;
use crate::model::{take_records, Progress, RunStats};
use crate::sink::{LoadJob, Sink, TableRef};
use crate::source::ListSource;
use metrics::counter;
use puller_core::telemetry::PAGES_FETCHED;
use puller_core::Result;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Drives a list API to exhaustion, accumulating records and flushing them to
/// the sink whenever the batch reaches the threshold or the listing ends.
///
/// Runs are sequential: every page of one run is fetched and flushed before
/// the call returns. Errors from the source or the sink end the run and are
/// returned as-is; there is no retry at this level.
pub struct Paginator {
    source: Arc<dyn ListSource>,
    sink: Arc<dyn Sink>,
    project: String,
    dataset: String,
    batch_size: usize,
}

impl Paginator {
    pub fn new(
        source: Arc<dyn ListSource>,
        sink: Arc<dyn Sink>,
        project: impl Into<String>,
        dataset: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            sink,
            project: project.into(),
            dataset: dataset.into(),
            batch_size,
        }
    }

    pub fn source(&self) -> &dyn ListSource {
        self.source.as_ref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn destination(&self, descriptor: &ResourceDescriptor) -> Result<TableRef> {
        TableRef::new(&self.project, &self.dataset, &descriptor.table_id)
    }

    pub async fn run(&self, descriptor: &ResourceDescriptor) -> Result<RunStats> {
        self.run_with_progress(descriptor, Progress::single()).await
    }

    /// One pagination run. The completion line is logged only when `progress`
    /// is the last item of the caller's sequence.
    pub async fn run_with_progress(
        &self,
        descriptor: &ResourceDescriptor,
        progress: Progress,
    ) -> Result<RunStats> {
        let stats = self.run_pass(descriptor, progress).await?;
        if progress.is_last() {
            log_completion(&stats);
        }
        Ok(stats)
    }

    /// A pagination run without the completion line, for drivers that report
    /// completion themselves.
    #[instrument(skip(self, descriptor), fields(resource = descriptor.name, progress = %progress))]
    pub(crate) async fn run_pass(
        &self,
        descriptor: &ResourceDescriptor,
        progress: Progress,
    ) -> Result<RunStats> {
        info!("Initiating data acquisition and insertion process");

        let destination = self.destination(descriptor)?;
        let mut batch = Batch::new(self.batch_size);
        let mut stats = RunStats::default();
        let mut request = Some(descriptor.first_request()?);

        while let Some(current) = request.take() {
            let response = self.source.execute(&current).await?;
            stats.pages += 1;
            counter!(PAGES_FETCHED, "resource" => descriptor.name).increment(1);

            let next = current.next(&response);
            let records = take_records(response, descriptor.record_field.as_deref());
            if records.is_empty() {
                info!("Nothing to write: data might not be ready or partially available");
                break;
            }

            debug!(page = stats.pages, records = records.len(), "Fetched page");
            batch.extend(records);
            request = next;

            if batch.is_full() || request.is_none() {
                self.flush(&mut batch, &destination, &mut stats).await?;
            }
        }

        // An empty page can arrive after earlier pages were buffered.
        if !batch.is_empty() {
            self.flush(&mut batch, &destination, &mut stats).await?;
        }

        Ok(stats)
    }

    /// Loads the batch and clears it once the sink has accepted it.
    pub(crate) async fn flush(
        &self,
        batch: &mut Batch,
        destination: &TableRef,
        stats: &mut RunStats,
    ) -> Result<LoadJob> {
        let job = self.sink.load(batch.records(), destination).await?;
        stats.flushes += 1;
        stats.records_loaded += batch.len() as u64;
        debug!(
            job_id = %job.job_id,
            table = %job.destination,
            records = job.records,
            state = ?job.state,
            "Flushed batch"
        );
        batch.clear();
        Ok(job)
    }
}

pub(crate) fn log_completion(stats: &RunStats) {
    info!(
        pages = stats.pages,
        records = stats.records_loaded,
        flushes = stats.flushes,
        "Data acquisition complete"
    );
}
