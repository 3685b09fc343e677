pub mod google;

use crate::model::ApiRequest;
use async_trait::async_trait;
use puller_core::Result;
use serde_json::Value;

/// A remote API that can execute list and get calls.
#[async_trait]
pub trait ListSource: Send + Sync {
    /// Execute one request and return the raw response body.
    async fn execute(&self, request: &ApiRequest) -> Result<Value>;
}

pub use google::GoogleApiClient;
