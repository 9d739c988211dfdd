//! REST client for the board backend.
//!
//! Every call resolves to `Result<T, RemoteError>`. Nothing here retries;
//! callers own retry and deduplication policy.

use std::time::Duration;

use corkboard_core::ServerConfig;
use reqwest::{header, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::board::*;
use crate::error::RemoteError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote board store client
#[derive(Debug, Clone)]
pub struct BoardClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BoardClient {
    /// Create a client for `base_url` (e.g. `http://localhost:8000/api/v1`)
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(server: &ServerConfig) -> Result<Self, RemoteError> {
        Self::with_timeout(
            &server.api_url,
            server.resolved_token(),
            server.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build request with auth headers
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header(header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let response = req.send().await?;
        self.handle_response(response).await
    }

    async fn send_discard(&self, req: RequestBuilder) -> Result<(), RemoteError> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(RemoteError::from_status(status.as_u16(), &text))
        }
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| RemoteError::Decode(format!("JSON parse error: {}", e)))
        } else {
            let text = response.text().await.unwrap_or_default();
            tracing::debug!("Board API returned {}: {}", status, text);
            Err(RemoteError::from_status(status.as_u16(), &text))
        }
    }

    // -- boards -----------------------------------------------------------

    /// Fetch a full board snapshot including columns and tickets.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_board(&self, board_id: BoardId) -> Result<Board, RemoteError> {
        let board: Board = self
            .send_json(self.request(Method::GET, &format!("/boards/{}", board_id)))
            .await?;
        tracing::debug!(
            "Fetched board {} ({} columns, revision {})",
            board.id,
            board.columns.len(),
            board.revision()
        );
        Ok(board)
    }

    #[instrument(skip(self), level = "info")]
    pub async fn list_boards(&self) -> Result<Vec<Board>, RemoteError> {
        self.send_json(self.request(Method::GET, "/boards/")).await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn create_board(&self, req: CreateBoardRequest) -> Result<Board, RemoteError> {
        self.send_json(self.request(Method::POST, "/boards/").json(&req))
            .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn delete_board(&self, board_id: BoardId) -> Result<Board, RemoteError> {
        self.send_json(self.request(Method::DELETE, &format!("/boards/{}", board_id)))
            .await
    }

    // -- tickets ----------------------------------------------------------

    /// Move a ticket to another column. Idempotent by intent.
    #[instrument(skip(self), level = "info")]
    pub async fn set_ticket_column(
        &self,
        ticket_id: TicketId,
        column_id: ColumnId,
    ) -> Result<Ticket, RemoteError> {
        self.update_ticket(ticket_id, UpdateTicketRequest::move_to(column_id))
            .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn update_ticket(
        &self,
        ticket_id: TicketId,
        req: UpdateTicketRequest,
    ) -> Result<Ticket, RemoteError> {
        self.send_json(
            self.request(Method::PUT, &format!("/tickets/{}", ticket_id))
                .json(&req),
        )
        .await
    }

    #[instrument(skip(self, req), level = "info")]
    pub async fn create_ticket(&self, req: CreateTicketRequest) -> Result<Ticket, RemoteError> {
        self.send_json(self.request(Method::POST, "/tickets/").json(&req))
            .await
    }

    // -- columns ----------------------------------------------------------

    /// Create a column. The backend answers with the whole board.
    #[instrument(skip(self), level = "info")]
    pub async fn create_column(
        &self,
        board_id: BoardId,
        req: ColumnRequest,
    ) -> Result<Board, RemoteError> {
        self.send_json(
            self.request(Method::POST, &format!("/boards/{}/columns", board_id))
                .json(&req),
        )
        .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn update_column(
        &self,
        column_id: ColumnId,
        req: ColumnRequest,
    ) -> Result<Column, RemoteError> {
        self.send_json(
            self.request(Method::PUT, &format!("/columns/{}", column_id))
                .json(&req),
        )
        .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn delete_column(&self, column_id: ColumnId) -> Result<Board, RemoteError> {
        self.send_json(self.request(Method::DELETE, &format!("/columns/{}", column_id)))
            .await
    }

    // -- members ----------------------------------------------------------

    #[instrument(skip(self), level = "info")]
    pub async fn list_members(&self, board_id: BoardId) -> Result<Vec<User>, RemoteError> {
        self.send_json(self.request(Method::GET, &format!("/boards/{}/members", board_id)))
            .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn add_member(&self, board_id: BoardId, email: &str) -> Result<Board, RemoteError> {
        let req = AddMemberRequest {
            email: email.to_string(),
        };
        self.send_json(
            self.request(Method::POST, &format!("/boards/{}/members", board_id))
                .json(&req),
        )
        .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn remove_member(
        &self,
        board_id: BoardId,
        user_id: UserId,
    ) -> Result<Board, RemoteError> {
        self.send_json(self.request(
            Method::DELETE,
            &format!("/boards/{}/members/{}", board_id, user_id),
        ))
        .await
    }

    // -- comments ---------------------------------------------------------

    #[instrument(skip(self), level = "info")]
    pub async fn list_comments(&self, ticket_id: TicketId) -> Result<Vec<Comment>, RemoteError> {
        self.send_json(self.request(Method::GET, &format!("/tickets/{}/comments", ticket_id)))
            .await
    }

    #[instrument(skip(self, content), level = "info")]
    pub async fn create_comment(
        &self,
        ticket_id: TicketId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        let req = CommentRequest {
            content: content.to_string(),
        };
        self.send_json(
            self.request(Method::POST, &format!("/tickets/{}/comments", ticket_id))
                .json(&req),
        )
        .await
    }

    #[instrument(skip(self, content), level = "info")]
    pub async fn update_comment(
        &self,
        comment_id: CommentId,
        content: &str,
    ) -> Result<Comment, RemoteError> {
        let req = CommentRequest {
            content: content.to_string(),
        };
        self.send_json(
            self.request(Method::PUT, &format!("/comments/{}", comment_id))
                .json(&req),
        )
        .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn delete_comment(&self, comment_id: CommentId) -> Result<(), RemoteError> {
        self.send_discard(self.request(Method::DELETE, &format!("/comments/{}", comment_id)))
            .await
    }

    // -- watchers ---------------------------------------------------------

    #[instrument(skip(self), level = "info")]
    pub async fn list_watchers(&self, ticket_id: TicketId) -> Result<Vec<Watcher>, RemoteError> {
        self.send_json(self.request(Method::GET, &format!("/tickets/{}/watchers", ticket_id)))
            .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn add_watcher(
        &self,
        ticket_id: TicketId,
        user_id: UserId,
    ) -> Result<Watcher, RemoteError> {
        self.send_json(
            self.request(Method::POST, &format!("/tickets/{}/watchers", ticket_id))
                .json(&AddWatcherRequest { user_id }),
        )
        .await
    }

    #[instrument(skip(self), level = "info")]
    pub async fn remove_watcher(
        &self,
        ticket_id: TicketId,
        user_id: UserId,
    ) -> Result<(), RemoteError> {
        self.send_discard(self.request(
            Method::DELETE,
            &format!("/tickets/{}/watchers/{}", ticket_id, user_id),
        ))
        .await
    }

    // -- users ------------------------------------------------------------

    #[instrument(skip(self), level = "info")]
    pub async fn current_user(&self) -> Result<User, RemoteError> {
        self.send_json(self.request(Method::GET, "/users/me")).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_bearer_token_is_sent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "6f1c2f7e-1b7a-4d43-9f0e-0d7b8f1f0a99",
                "email": "me@example.com"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = BoardClient::new(&mock_server.uri(), Some("test_token".into())).unwrap();
        let me = client.current_user().await.unwrap();
        assert_eq!(me.email, "me@example.com");
    }

    #[tokio::test]
    async fn test_delete_comment_ignores_body() {
        let mock_server = MockServer::start().await;
        let comment = CommentId::new_v4();

        Mock::given(method("DELETE"))
            .and(path(format!("/comments/{}", comment)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "Comment deleted successfully"
            })))
            .mount(&mock_server)
            .await;

        let client = BoardClient::new(&mock_server.uri(), None).unwrap();
        assert!(client.delete_comment(comment).await.is_ok());
    }

    #[tokio::test]
    async fn test_trailing_slash_in_base_url_is_trimmed() {
        let client = BoardClient::new("http://localhost:8000/api/v1/", None).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api/v1");
    }
}
