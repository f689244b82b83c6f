//! Provider adapter contract.

use async_trait::async_trait;

use crate::errors::SDKError;
use crate::types::{Request, Response};

/// One chat-completion backend. `complete` sends exactly one request and returns exactly one
/// choice.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: Request) -> Result<Response, SDKError>;
}
