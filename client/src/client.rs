//! `reqwest` implementation of [`LibraryClient`]

use crate::error::{extract_message, ClientError};
use crate::types::Record;
use crate::{ClientFuture, LibraryClient};
use biblioteca_sync_core::entity::{EntityId, EntityKind};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// HTTP client for the library backend
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` if the URL is empty or the
    /// underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::InvalidRequest("base URL is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Backend root this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}{}", self.base_url, kind.collection_path())
    }

    fn item_url(&self, kind: EntityKind, id: EntityId) -> String {
        format!("{}{}/{id}", self.base_url, kind.collection_path())
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        tracing::debug!(%method, %url, "Sending backend request");
        self.client
            .request(method, url)
            .header("accept", "application/json")
    }

    async fn send(request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), "Backend rejected request");
        Err(ClientError::Status {
            status: status.as_u16(),
            message: extract_message(&body),
        })
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
        let response = Self::send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::ResponseParseFailed(e.to_string()))
    }
}

impl LibraryClient for RestClient {
    fn list(&self, kind: EntityKind) -> ClientFuture<'_, Vec<Record>> {
        let request = self.request(Method::GET, self.collection_url(kind));
        Box::pin(Self::send_json(request))
    }

    fn get(&self, kind: EntityKind, id: EntityId) -> ClientFuture<'_, Record> {
        let request = self.request(Method::GET, self.item_url(kind, id));
        Box::pin(Self::send_json(request))
    }

    fn create(&self, kind: EntityKind, body: serde_json::Value) -> ClientFuture<'_, Record> {
        let request = self
            .request(Method::POST, self.collection_url(kind))
            .json(&body);
        Box::pin(Self::send_json(request))
    }

    fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        body: serde_json::Value,
    ) -> ClientFuture<'_, Record> {
        let request = self
            .request(Method::PUT, self.item_url(kind, id))
            .json(&body);
        Box::pin(Self::send_json(request))
    }

    fn delete(&self, kind: EntityKind, id: EntityId) -> ClientFuture<'_, ()> {
        let request = self.request(Method::DELETE, self.item_url(kind, id));
        Box::pin(async move {
            Self::send(request).await?;
            Ok(())
        })
    }

    fn return_loan(&self, id: EntityId) -> ClientFuture<'_, Record> {
        let url = format!("{}/return", self.item_url(EntityKind::Loan, id));
        let request = self.request(Method::PUT, url);
        Box::pin(Self::send_json(request))
    }
}
