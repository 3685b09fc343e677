use crate::descriptor::ResourceDescriptor;
use crate::model::{Progress, RunStats};
use crate::paginator::Paginator;
use chrono::{Duration, NaiveDate};
use puller_core::{Error, Result};
use tracing::{info, instrument};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `days` calendar dates, newest first, starting at `today`.
pub fn dates_back(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64).map(|d| today - Duration::days(d)).collect()
}

impl Paginator {
    /// One pagination run per date, in the order given. An error on any date
    /// ends the sweep.
    #[instrument(skip(self, template, dates), fields(resource = template.name, dates = dates.len()))]
    pub async fn run_dates(
        &self,
        template: &ResourceDescriptor,
        dates: &[NaiveDate],
    ) -> Result<RunStats> {
        let param = template.iteration_param.ok_or_else(|| {
            Error::Validation(format!("{} has no date parameter", template.name))
        })?;

        let mut totals = RunStats::default();
        for (index, date) in dates.iter().enumerate() {
            let date = date.format(DATE_FORMAT).to_string();
            info!("-- getting data from {}", date);

            let descriptor = template.with_param(param, date);
            let stats = self
                .run_with_progress(&descriptor, Progress::new(index, dates.len()))
                .await?;
            totals.merge(stats);
        }
        Ok(totals)
    }
}
