use crate::descriptor::ResourceDescriptor;
use crate::model::{scalar_to_string, take_records, KeyList};
use crate::paginator::Paginator;
use metrics::counter;
use puller_core::telemetry::{KEYS_HARVESTED, PAGES_FETCHED};
use puller_core::{Error, Result};
use tracing::{debug, info, instrument};

impl Paginator {
    /// Walks every page of `descriptor` and collects `field` from each record,
    /// in listing order. Nothing is written to the sink.
    ///
    /// The whole key list is held in memory. A record without the field, or
    /// with a non-scalar value there, fails the pass.
    #[instrument(skip(self, descriptor), fields(resource = descriptor.name))]
    pub async fn harvest(&self, descriptor: &ResourceDescriptor, field: &str) -> Result<KeyList> {
        info!("Generating a local cache of {}", field);

        let mut keys = KeyList::new();
        let mut request = Some(descriptor.first_request()?);
        let mut pages = 0u64;

        while let Some(current) = request.take() {
            let response = self.source().execute(&current).await?;
            pages += 1;
            counter!(PAGES_FETCHED, "resource" => descriptor.name).increment(1);

            request = current.next(&response);
            for record in take_records(response, descriptor.record_field.as_deref()) {
                let value = record.get(field).ok_or_else(|| Error::MissingField {
                    field: field.to_string(),
                })?;
                let key = scalar_to_string(value).ok_or_else(|| {
                    Error::Validation(format!("`{}` is not a scalar: {}", field, value))
                })?;
                keys.push(key);
            }
            debug!(page = pages, keys = keys.len(), "Harvested page");
        }

        counter!(KEYS_HARVESTED, "resource" => descriptor.name).increment(keys.len() as u64);
        info!(keys = keys.len(), pages, "Local {} cache is ready", field);
        Ok(keys)
    }
}
