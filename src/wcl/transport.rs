use async_trait::async_trait;
use serde_json::Value;

use crate::exception::EngineResult;

/// Seam between the report fetcher and the HTTP GraphQL client.
///
/// `execute` returns the response's `data` object with GraphQL-level errors
/// already classified. Tests swap in scripted transports.
#[async_trait]
pub trait GraphQlTransport: Send + Sync {
    async fn execute(&self, query: &'static str, variables: Value) -> EngineResult<Value>;
}
