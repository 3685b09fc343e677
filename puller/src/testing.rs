//! In-memory list source and sink for exercising the engine.

use crate::descriptor::{ApiMethod, Paging, ResourceDescriptor};
use crate::model::{scalar_to_string, ApiRequest, Params, Record, NEXT_PAGE_TOKEN};
use crate::sink::{JobState, LoadJob, Sink, TableRef};
use crate::source::ListSource;
use async_trait::async_trait;
use puller_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub const GROUP_ITEMS: ApiMethod = ApiMethod {
    name: "test.groups.items.list",
    url_template: "https://example.test/v1/groups/{groupId}/items",
    paging: Paging::Paged,
};

pub const PROFILE_GET: ApiMethod = ApiMethod {
    name: "test.profiles.get",
    url_template: "https://example.test/v1/profiles/{userId}",
    paging: Paging::OneShot,
};

pub fn record(i: usize) -> Value {
    json!({ "id": i.to_string(), "seq": i })
}

/// Wraps each page under `field`, chaining them with continuation tokens
/// `"1"`, `"2"`, ...
pub fn paged(field: &str, pages: Vec<Vec<Value>>) -> Vec<Value> {
    let count = pages.len();
    pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| {
            let mut response = json!({ field: page });
            if i + 1 < count {
                response[NEXT_PAGE_TOKEN] = json!((i + 1).to_string());
            }
            response
        })
        .collect()
}

pub fn paged_descriptor(field: &str) -> ResourceDescriptor {
    ResourceDescriptor {
        name: "items",
        method: ApiMethod {
            name: "test.items.list",
            url_template: "https://example.test/v1/items",
            paging: Paging::Paged,
        },
        params: Params::new(),
        record_field: Some(field.to_string()),
        table_id: "items_table".to_string(),
        iteration_param: None,
    }
}

pub fn group_descriptor() -> ResourceDescriptor {
    ResourceDescriptor {
        name: "group_items",
        method: GROUP_ITEMS,
        params: Params::new(),
        record_field: Some("items".to_string()),
        table_id: "group_items".to_string(),
        iteration_param: Some("groupId"),
    }
}

pub fn profile_descriptor() -> ResourceDescriptor {
    ResourceDescriptor {
        name: "profiles",
        method: PROFILE_GET,
        params: Params::new(),
        record_field: None,
        table_id: "profiles".to_string(),
        iteration_param: Some("userId"),
    }
}

/// Serves canned responses, optionally partitioned by the value of one
/// request parameter. The page index is the request's continuation token.
#[derive(Default)]
pub struct FakeSource {
    scope_param: Option<&'static str>,
    responses: HashMap<String, Vec<Value>>,
    failing: HashSet<String>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeSource {
    pub fn new(responses: Vec<Value>) -> Self {
        Self::default().with_scope("", responses)
    }

    pub fn scoped(param: &'static str) -> Self {
        Self {
            scope_param: Some(param),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: &str, responses: Vec<Value>) -> Self {
        self.responses.insert(scope.to_string(), responses);
        self
    }

    pub fn failing(mut self, scope: &str) -> Self {
        self.failing.insert(scope.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ListSource for FakeSource {
    async fn execute(&self, request: &ApiRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request.clone());

        let scope = self
            .scope_param
            .and_then(|p| request.params.get(p))
            .and_then(scalar_to_string)
            .unwrap_or_default();

        if self.failing.contains(&scope) {
            return Err(Error::Api {
                status: 404,
                message: format!("{} not found", scope),
            });
        }

        let index = request
            .page_token
            .as_deref()
            .map(|t| t.parse::<usize>().unwrap())
            .unwrap_or(0);

        Ok(self
            .responses
            .get(&scope)
            .and_then(|pages| pages.get(index))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

/// Records every load in memory.
#[derive(Default)]
pub struct RecordingSink {
    loads: Mutex<Vec<(TableRef, Vec<Record>)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn loads(&self) -> Vec<(TableRef, Vec<Record>)> {
        self.loads.lock().unwrap().clone()
    }

    pub fn load_sizes(&self) -> Vec<usize> {
        self.loads().iter().map(|(_, records)| records.len()).collect()
    }

    pub fn all_records(&self) -> Vec<Record> {
        self.loads().into_iter().flat_map(|(_, records)| records).collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn load(&self, records: &[Record], destination: &TableRef) -> Result<LoadJob> {
        if self.fail {
            return Err(Error::Load {
                job_id: "test".to_string(),
                message: "sink unavailable".to_string(),
            });
        }

        let mut loads = self.loads.lock().unwrap();
        loads.push((destination.clone(), records.to_vec()));
        Ok(LoadJob {
            job_id: format!("job-{}", loads.len()),
            destination: destination.clone(),
            records: records.len(),
            state: JobState::Pending,
        })
    }
}

/// Counts log events whose message equals `message`, on the current thread,
/// for as long as the returned guard lives.
pub fn count_events(message: &'static str) -> (DefaultGuard, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let layer = EventCounter {
        message,
        count: Arc::clone(&count),
    };
    let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));
    (guard, count)
}

pub fn events(count: &AtomicUsize) -> usize {
    count.load(Ordering::SeqCst)
}

struct EventCounter {
    message: &'static str,
    count: Arc<AtomicUsize>,
}

impl<S: Subscriber> Layer<S> for EventCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if visitor.message == self.message {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }
}
