//! Service API client (publishing collaborator → Herald server).

use reqwest::Client;
use url::Url;

use super::{ClientError, parse_response};
use crate::objects::{PublishEventRequest, PublishEventResponse};
use crate::signature::{SIGNATURE_HEADER, SignedObject};

/// Typed HTTP client for the Herald **Service API**.
///
/// Used by out-of-process producers (ingestion adapters, parsers) to publish
/// events. Every request body is signed with
/// `HMAC-SHA256("{timestamp}.{json}", service_secret)`.
///
/// The client never retries; a caller that wants bounded retry should check
/// [`ClientError::is_transient`].
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
    base_url: Url,
    secret: Vec<u8>,
}

impl ServiceClient {
    /// Create a new `ServiceClient`.
    ///
    /// * `base_url` – root URL of the Herald server.
    /// * `service_secret` – the shared HMAC secret for body signing.
    pub fn new(base_url: Url, service_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            secret: service_secret.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /api/v1/service/events` – publish one event.
    pub async fn publish(
        &self,
        request: PublishEventRequest,
    ) -> Result<PublishEventResponse, ClientError> {
        let signed = SignedObject::new(request, &self.secret)?;

        let url = self.base_url.join("/api/v1/service/events")?;

        let resp = self
            .http
            .post(url)
            .header(SIGNATURE_HEADER, signed.to_header())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(signed.json)
            .send()
            .await?;

        parse_response(resp).await
    }
}
