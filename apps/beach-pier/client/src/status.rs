//! Side-channel HTTP endpoints of the chat server.

use beach_pier_core::{HealthStatus, HistoryPage, HistoryScope, InstanceInfo};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ServerEndpoint;
use crate::identity::ClientIdentity;

#[derive(Clone)]
pub struct StatusClient {
    http: Client,
    server: ServerEndpoint,
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl StatusClient {
    pub fn new(server: ServerEndpoint) -> Self {
        Self {
            http: Client::new(),
            server,
        }
    }

    pub fn with_client(server: ServerEndpoint, http: Client) -> Self {
        Self { http, server }
    }

    /// `GET /instance`
    pub async fn instance_info(&self) -> Result<InstanceInfo, StatusError> {
        self.get_json(self.server.http_url("instance")).await
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthStatus, StatusError> {
        self.get_json(self.server.http_url("health")).await
    }

    /// `GET /chat/history`. The user scope is resolved server side from the
    /// caller address and `client_id`.
    pub async fn chat_history(
        &self,
        limit: u32,
        scope: HistoryScope,
        client: Option<&ClientIdentity>,
    ) -> Result<HistoryPage, StatusError> {
        let mut url = self.server.http_url("chat/history");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            query.append_pair("history_type", scope.as_str());
            if let Some(client) = client {
                query.append_pair("client_id", client.as_str());
            }
        }
        self.get_json(url).await
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, StatusError>
    where
        T: DeserializeOwned,
    {
        debug!(target: "beach_pier::status", url = %url, "status request");
        let res = self.http.get(url).send().await?;

        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(StatusError::UnexpectedStatus { status, body })
        }
    }
}
