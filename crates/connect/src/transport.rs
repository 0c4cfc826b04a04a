//! Adapter wiring the API client into the engine's transport seam.

use std::sync::Arc;

use async_trait::async_trait;

use glucolog_core::errors::TransportError;
use glucolog_core::readings::{ReadingPayload, RemoteReading};
use glucolog_core::sync::{ProfileService, SyncTransport};

use crate::client::ConnectClient;
use crate::types::CreateReadingRequest;

/// Identity/session boundary: hands out the current access token.
///
/// Returning `None` means no credential is available; the engine fails the
/// whole pass rather than attempting per-item calls that cannot succeed.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Static token provider for tests and tooling.
pub struct StaticTokenProvider(pub String);

impl AccessTokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// [`SyncTransport`] backed by the cloud API client.
pub struct ConnectTransport {
    client: ConnectClient,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl ConnectTransport {
    pub fn new(client: ConnectClient, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self { client, tokens }
    }

    fn token(&self) -> Result<String, TransportError> {
        self.tokens
            .access_token()
            .ok_or_else(|| TransportError::Auth("no access token available".to_string()))
    }
}

#[async_trait]
impl SyncTransport for ConnectTransport {
    async fn create_reading(
        &self,
        payload: &ReadingPayload,
    ) -> Result<RemoteReading, TransportError> {
        let token = self.token()?;
        let request = CreateReadingRequest::from(payload);
        let dto = self
            .client
            .create_reading(&token, &request)
            .await
            .map_err(TransportError::from)?;
        Ok(dto.into())
    }

    async fn list_my_readings(&self) -> Result<Vec<RemoteReading>, TransportError> {
        let token = self.token()?;
        let readings = self
            .client
            .list_my_readings(&token)
            .await
            .map_err(TransportError::from)?;
        Ok(readings.into_iter().map(RemoteReading::from).collect())
    }

    async fn list_latest_readings(
        &self,
        limit: usize,
    ) -> Result<Vec<RemoteReading>, TransportError> {
        let token = self.token()?;
        let readings = self
            .client
            .list_latest_readings(&token, limit)
            .await
            .map_err(TransportError::from)?;
        Ok(readings.into_iter().map(RemoteReading::from).collect())
    }
}

#[async_trait]
impl ProfileService for ConnectTransport {
    async fn refresh(&self) -> Result<(), TransportError> {
        let token = self.token()?;
        self.client
            .get_profile(&token)
            .await
            .map_err(TransportError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoToken;

    impl AccessTokenProvider for NoToken {
        fn access_token(&self) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn missing_credential_surfaces_as_auth_error() {
        let transport = ConnectTransport::new(
            ConnectClient::new("http://localhost:1"),
            Arc::new(NoToken),
        );
        let err = transport.list_my_readings().await.expect_err("must fail");
        assert!(matches!(err, TransportError::Auth(_)));
    }
}
