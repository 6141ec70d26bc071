//! Admin API client (dashboard → Herald server).
//!
//! All requests carry the plaintext admin secret in the
//! `Herald-Admin-Authorization` header.

use reqwest::Client;
use url::Url;

use super::{ClientError, parse_response};
use crate::objects::{
    ChannelEventsQuery, EventCountResponse, EventResponse, FailuresQuery, HandlerFailureResponse,
    ListEventsQuery, ListenerStatusResponse, ReplayRequest, StatsQuery,
};
use crate::signature::ADMIN_AUTH_HEADER;

/// Typed HTTP client for the Herald **Admin API** (read side).
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Client,
    base_url: Url,
    admin_secret: String,
}

impl AdminClient {
    /// Create a new `AdminClient`.
    ///
    /// * `base_url` – root URL of the Herald server.
    /// * `admin_secret` – the plaintext admin secret.
    pub fn new(base_url: Url, admin_secret: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            admin_secret: admin_secret.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    async fn get<T, Q>(&self, path: &str, query: Option<&Q>) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let url = self.base_url.join(path)?;
        let mut request = self
            .http
            .get(url)
            .header(ADMIN_AUTH_HEADER, &self.admin_secret);
        if let Some(query) = query {
            request = request.query(query);
        }
        parse_response(request.send().await?).await
    }

    /// `GET /api/v1/admin/events` – list events with optional filters.
    pub async fn list_events(
        &self,
        query: &ListEventsQuery,
    ) -> Result<Vec<EventResponse>, ClientError> {
        self.get("/api/v1/admin/events", Some(query)).await
    }

    /// `GET /api/v1/admin/events/{id}` – fetch a single event.
    pub async fn get_event(&self, id: i64) -> Result<EventResponse, ClientError> {
        self.get::<_, ()>(&format!("/api/v1/admin/events/{id}"), None)
            .await
    }

    /// `GET /api/v1/admin/channels/{channel}/events` – recent events on one
    /// channel.
    pub async fn channel_events(
        &self,
        channel: &str,
        query: &ChannelEventsQuery,
    ) -> Result<Vec<EventResponse>, ClientError> {
        let path = format!(
            "/api/v1/admin/channels/{}/events",
            urlencoding::encode(channel)
        );
        self.get(&path, Some(query)).await
    }

    /// `GET /api/v1/admin/correlations/{correlation_id}/events` – the full
    /// flow for one correlation id, ordered by event id.
    pub async fn trace(&self, correlation_id: &str) -> Result<Vec<EventResponse>, ClientError> {
        let path = format!(
            "/api/v1/admin/correlations/{}/events",
            urlencoding::encode(correlation_id)
        );
        self.get::<_, ()>(&path, None).await
    }

    /// `GET /api/v1/admin/stats` – event counts by channel and type.
    pub async fn stats(&self, query: &StatsQuery) -> Result<Vec<EventCountResponse>, ClientError> {
        self.get("/api/v1/admin/stats", Some(query)).await
    }

    /// `GET /api/v1/admin/failures` – recorded handler failures.
    pub async fn failures(
        &self,
        query: &FailuresQuery,
    ) -> Result<Vec<HandlerFailureResponse>, ClientError> {
        self.get("/api/v1/admin/failures", Some(query)).await
    }

    /// `GET /api/v1/admin/listener` – status of the server's subscriber.
    pub async fn listener_status(&self) -> Result<ListenerStatusResponse, ClientError> {
        self.get::<_, ()>("/api/v1/admin/listener", None).await
    }

    /// `POST /api/v1/admin/listener/replay` – rewind the server's subscriber.
    pub async fn replay(&self, from_id: i64) -> Result<(), ClientError> {
        let url = self.base_url.join("/api/v1/admin/listener/replay")?;

        let resp = self
            .http
            .post(url)
            .header(ADMIN_AUTH_HEADER, &self.admin_secret)
            .json(&ReplayRequest { from_id })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, body });
        }

        Ok(())
    }
}
