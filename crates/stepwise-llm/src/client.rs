//! Provider routing client.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::SDKError;
use crate::provider::ProviderAdapter;
use crate::types::{Request, Response};

#[derive(Clone, Default)]
pub struct Client {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    default_provider: Option<String>,
}

impl Client {
    pub fn new(
        providers: HashMap<String, Arc<dyn ProviderAdapter>>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers,
            default_provider,
        }
    }

    /// Builds a client routing every request to `provider`.
    pub fn with_provider(provider: Arc<dyn ProviderAdapter>) -> Self {
        let mut client = Self::default();
        client.register_provider(provider);
        client
    }

    pub fn register_provider(&mut self, provider: Arc<dyn ProviderAdapter>) {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn set_default_provider(&mut self, provider: impl Into<String>) {
        self.default_provider = Some(provider.into());
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub async fn complete(&self, mut request: Request) -> Result<Response, SDKError> {
        let provider_name = self.resolve_provider(&request)?;
        request.provider = Some(provider_name.clone());
        let adapter = self
            .providers
            .get(&provider_name)
            .ok_or_else(|| {
                SDKError::configuration(format!("provider '{provider_name}' not registered"))
            })?
            .clone();

        tracing::debug!(
            provider = %provider_name,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );
        adapter.complete(request).await
    }

    fn resolve_provider(&self, request: &Request) -> Result<String, SDKError> {
        if let Some(provider) = &request.provider {
            return Ok(provider.clone());
        }
        if let Some(provider) = &self.default_provider {
            return Ok(provider.clone());
        }
        Err(SDKError::configuration("no provider configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Message, Usage};
    use async_trait::async_trait;

    struct TestAdapter {
        name: String,
    }

    #[async_trait]
    impl ProviderAdapter for TestAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, request: Request) -> Result<Response, SDKError> {
            Ok(Response {
                id: "resp".to_string(),
                model: request.model,
                provider: self.name.clone(),
                message: Message::assistant("ok"),
                finish_reason: FinishReason::Stop,
                usage: Usage::default(),
            })
        }
    }

    fn adapter(name: &str) -> Arc<dyn ProviderAdapter> {
        Arc::new(TestAdapter {
            name: name.to_string(),
        })
    }

    #[tokio::test(flavor = "current_thread")]
    async fn first_registered_provider_becomes_default() {
        let mut client = Client::default();
        client.register_provider(adapter("first"));
        client.register_provider(adapter("second"));

        let response = client
            .complete(Request::new("model", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.provider, "first");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn provider_resolution_prefers_request_provider() {
        let mut client = Client::default();
        client.register_provider(adapter("first"));
        client.register_provider(adapter("second"));

        let mut request = Request::new("model", vec![Message::user("hi")]);
        request.provider = Some("second".to_string());
        let response = client.complete(request).await.unwrap();
        assert_eq!(response.provider, "second");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn missing_provider_is_configuration_error() {
        let client = Client::default();
        let error = client
            .complete(Request::new("model", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(error, SDKError::Configuration(_)));
    }
}
