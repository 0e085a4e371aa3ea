//! The call seam between managers and the transport.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Anything that can issue a `<kind>.<verb>` call and await its result.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call_method(&self, method: &str, params: Value) -> Result<Value>;
}
