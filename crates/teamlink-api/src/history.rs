use std::sync::RwLock;

use futures_util::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use teamlink_gateway::TokenProvider;
use teamlink_types::api::{HistoryPage, HistoryQuery};
use teamlink_types::models::RoomSeq;

use crate::error::ApiError;

/// Anything that can serve pages of room history.
pub trait HistorySource: Send + Sync + 'static {
    fn fetch(&self, room: RoomSeq, query: HistoryQuery) -> BoxFuture<'_, Result<HistoryPage, ApiError>>;
}

/// `GET {base}/api/chat/rooms/{room}/messages` over reqwest. The token is
/// resolved before every request, so a dynamic provider refreshes here the
/// same way it does for the broker connection.
pub struct HistoryClient {
    http: Client,
    base_url: String,
    token: RwLock<TokenProvider>,
}

impl HistoryClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<TokenProvider>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>, token: impl Into<TokenProvider>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token.into()),
        }
    }

    /// Swap the token provider.
    pub fn set_token(&self, token: impl Into<TokenProvider>) {
        *self.token.write().expect("token lock poisoned") = token.into();
    }

    pub fn messages_url(&self, room: RoomSeq) -> String {
        format!("{}/api/chat/rooms/{}/messages", self.base_url, room)
    }

    pub async fn history(&self, room: RoomSeq, query: &HistoryQuery) -> Result<HistoryPage, ApiError> {
        let provider = self.token.read().expect("token lock poisoned").clone();
        let token = provider
            .resolve()
            .await
            .map_err(|e| ApiError::Token(e.to_string()))?;
        let url = self.messages_url(room);
        debug!("GET {} {:?}", url, query);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        let page: HistoryPage = resp.json().await?;
        debug!("Room {} page: {} messages, older={}", room, page.messages.len(), page.has_older());
        Ok(page)
    }
}

impl HistorySource for HistoryClient {
    fn fetch(&self, room: RoomSeq, query: HistoryQuery) -> BoxFuture<'_, Result<HistoryPage, ApiError>> {
        Box::pin(async move { self.history(room, &query).await })
    }
}
