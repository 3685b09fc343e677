use crate::descriptor::{ApiMethod, Paging};
use puller_core::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// One semi-structured row as returned by the remote API.
pub type Record = Value;

/// Request parameters, keyed by the remote API's parameter name.
pub type Params = BTreeMap<String, Value>;

/// Scalar values harvested from one field of a listing, in source order.
pub type KeyList = Vec<String>;

/// Field carrying the continuation token in every Google list response.
pub const NEXT_PAGE_TOKEN: &str = "nextPageToken";

/// A single remote call: the method, a snapshot of its parameters and the
/// continuation token of the page it asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: ApiMethod,
    pub params: Params,
    pub page_token: Option<String>,
}

impl ApiRequest {
    pub fn new(method: ApiMethod, params: Params) -> Self {
        Self {
            method,
            params,
            page_token: None,
        }
    }

    /// The request for the page after `response`, if the method pages and the
    /// response carries a non-empty continuation token.
    pub fn next(&self, response: &Value) -> Option<ApiRequest> {
        if self.method.paging == Paging::OneShot {
            return None;
        }

        let token = response
            .get(NEXT_PAGE_TOKEN)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())?;

        Some(ApiRequest {
            method: self.method,
            params: self.params.clone(),
            page_token: Some(token.to_string()),
        })
    }
}

/// Pulls the record list out of a response.
///
/// With a field name, the records are the array under that field; anything
/// else counts as an empty page. Without one, a non-empty object response is
/// itself the single record.
pub fn take_records(response: Value, field: Option<&str>) -> Vec<Record> {
    match (response, field) {
        (Value::Object(mut object), Some(field)) => match object.remove(field) {
            Some(Value::Array(records)) => records,
            _ => Vec::new(),
        },
        (Value::Object(object), None) if !object.is_empty() => vec![Value::Object(object)],
        _ => Vec::new(),
    }
}

/// Renders a scalar parameter or key value as plain text.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Position of one pagination run within a driver's sequence of runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(index: usize, total: usize) -> Self {
        Self { index, total }
    }

    pub fn single() -> Self {
        Self::new(0, 1)
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.total
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index + 1, self.total)
    }
}

/// Counters for one or more pagination runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pages: u64,
    pub records_loaded: u64,
    pub flushes: u64,
}

impl RunStats {
    pub fn merge(&mut self, other: RunStats) {
        self.pages += other.pages;
        self.records_loaded += other.records_loaded;
        self.flushes += other.flushes;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFailure {
    pub key: String,
    pub reason: String,
}

/// Keys that failed during a fan-out run, with the cause of each failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorReport {
    failures: Vec<KeyFailure>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: &str, error: &Error) {
        self.failures.push(KeyFailure {
            key: key.to_string(),
            reason: error.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn failures(&self) -> &[KeyFailure] {
        &self.failures
    }

    pub fn keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.key.as_str()).collect()
    }

    /// Writes the failing keys to `path` as a JSON array. Does nothing and
    /// returns `false` when there were no failures.
    pub fn persist(&self, path: &Path) -> Result<bool> {
        if self.is_empty() {
            return Ok(false);
        }

        let body = serde_json::to_string_pretty(&self.keys())?;
        std::fs::write(path, body).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("writing {}: {}", path.display(), e),
            ))
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const LIST: ApiMethod = ApiMethod {
        name: "items.list",
        url_template: "https://example.test/v1/items",
        paging: Paging::Paged,
    };

    const GET: ApiMethod = ApiMethod {
        name: "items.get",
        url_template: "https://example.test/v1/items/{id}",
        paging: Paging::OneShot,
    };

    #[test]
    fn next_request_carries_token_and_params() {
        let params = Params::from([("maxResults".to_string(), json!(500))]);
        let first = ApiRequest::new(LIST, params.clone());

        let next = first.next(&json!({ "items": [], "nextPageToken": "abc" })).unwrap();
        assert_eq!(next.page_token.as_deref(), Some("abc"));
        assert_eq!(next.params, params);
    }

    #[test]
    fn missing_or_blank_token_ends_paging() {
        let first = ApiRequest::new(LIST, Params::new());
        assert!(first.next(&json!({ "items": [1] })).is_none());
        assert!(first.next(&json!({ "items": [1], "nextPageToken": "" })).is_none());
    }

    #[test]
    fn one_shot_methods_never_page() {
        let first = ApiRequest::new(GET, Params::new());
        assert!(first.next(&json!({ "nextPageToken": "abc" })).is_none());
    }

    #[test]
    fn records_come_from_the_named_field() {
        let response = json!({ "users": [{ "id": 1 }, { "id": 2 }], "nextPageToken": "t" });
        assert_eq!(
            take_records(response, Some("users")),
            vec![json!({ "id": 1 }), json!({ "id": 2 })]
        );
        assert!(take_records(json!({ "kind": "admin#users" }), Some("users")).is_empty());
        assert!(take_records(json!({ "users": "oops" }), Some("users")).is_empty());
    }

    #[test]
    fn whole_response_is_the_record_without_a_field() {
        let profile = json!({ "emailAddress": "a@example.com", "messagesTotal": 10 });
        assert_eq!(take_records(profile.clone(), None), vec![profile]);
        assert!(take_records(json!({}), None).is_empty());
        assert!(take_records(Value::Null, None).is_empty());
    }

    #[test]
    fn progress_reports_last_item() {
        assert!(Progress::single().is_last());
        assert!(!Progress::new(0, 3).is_last());
        assert!(Progress::new(2, 3).is_last());
        assert_eq!(Progress::new(1, 3).to_string(), "2/3");
    }

    #[test]
    fn empty_report_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("course_work.err");

        assert!(!ErrorReport::new().persist(&path).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn report_persists_failing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gmail_user_profiles.err");

        let mut report = ErrorReport::new();
        report.record("b@example.com", &Error::Api { status: 400, message: "bad".into() });
        assert!(report.persist(&path).unwrap());

        let written: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, vec!["b@example.com".to_string()]);
        assert!(report.failures()[0].reason.contains("400"));
    }
}
