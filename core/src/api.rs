use crate::config::ClientConfig;
use crate::session::SessionStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("session expired or unauthorized")]
    SessionExpired,
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid request payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// One field of a multipart upload (post creation attaches media this way).
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: value.into().into_bytes(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ApiBody {
    Empty,
    Json(Value),
    Multipart(Vec<MultipartField>),
}

/// A backend request, independent of the HTTP client executing it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: ApiBody,
    pub bearer: Option<String>,
}

impl ApiRequest {
    fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: ApiBody::Empty,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = ApiBody::Json(body);
        self
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = ApiBody::Multipart(fields);
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The server's `message` field, when the body carries one.
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}

/// Seam between the stores and the HTTP stack, so tests can script responses.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base_url: config.api_base_url.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            ApiBody::Empty => builder,
            ApiBody::Json(value) => builder.json(&value),
            ApiBody::Multipart(fields) => {
                let mut form = reqwest::multipart::Form::new();
                for field in fields {
                    let mut part = reqwest::multipart::Part::bytes(field.data);
                    if let Some(filename) = field.filename {
                        part = part.file_name(filename);
                    }
                    if let Some(content_type) = field.content_type {
                        part = part
                            .mime_str(&content_type)
                            .map_err(|err| ApiError::Payload(err.to_string()))?;
                    }
                    form = form.part(field.name, part);
                }
                builder.multipart(form)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

/// Platform navigation capability. The CLI host has nowhere to navigate, so
/// the default implementation is a no-op.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &str);
}

pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn navigate(&self, _route: &str) {}
}

/// Authenticated API client for the Burrow backend.
///
/// Every call reads the bearer token from the session store before the
/// request goes out, and any 401/403 while authenticated forces a logout and
/// a single redirect to the login view before the error is propagated.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn RestTransport>,
    session: SessionStore,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn RestTransport>,
        session: SessionStore,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            transport,
            session,
            navigator,
        }
    }

    async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if let Some(token) = self.session.token() {
            request.bearer = Some(token);
        }
        let was_authenticated = self.session.is_authenticated();
        let response = self.transport.execute(request).await?;

        if response.status == 401 || response.status == 403 {
            if was_authenticated {
                warn!(status = response.status, "authorization failure, signing out");
                self.session.logout();
                self.navigator.navigate("/login");
            }
            return Err(ApiError::Status {
                status: response.status,
                message: response
                    .message()
                    .unwrap_or("unauthorized or forbidden")
                    .to_string(),
            });
        }
        if !response.is_success() {
            return Err(ApiError::Status {
                status: response.status,
                message: response
                    .message()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }
        Ok(response)
    }

    // Auth.

    pub async fn signup(&self, payload: Value) -> Result<Value, ApiError> {
        let response = self.execute(ApiRequest::post("/auth/signup").json(payload)).await?;
        Ok(response.body)
    }

    pub async fn login(&self, credentials: Value) -> Result<Value, ApiError> {
        let response = self.execute(ApiRequest::post("/auth/login").json(credentials)).await?;
        Ok(response.body)
    }

    // Posts.

    /// List posts with zero-based pagination and an optional tag filter.
    /// Tags go out as one comma-joined, percent-encoded query parameter.
    pub async fn list_posts(
        &self,
        page: u32,
        size: u32,
        tags: &[String],
    ) -> Result<Value, ApiError> {
        let mut request = ApiRequest::get("/posts")
            .query("page", page.to_string())
            .query("size", size.to_string());
        if !tags.is_empty() {
            request = request.query("tags", tags.join(","));
        }
        Ok(self.execute(request).await?.body)
    }

    pub async fn get_post(&self, id: &str) -> Result<Value, ApiError> {
        Ok(self.execute(ApiRequest::get(format!("/posts/{id}"))).await?.body)
    }

    /// Create a post. The backend takes multipart form data so media can be
    /// attached alongside the text fields.
    pub async fn create_post(&self, fields: Vec<MultipartField>) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::post("/posts").multipart(fields))
            .await?
            .body)
    }

    pub async fn toggle_like(&self, post_id: &str) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::put(format!("/posts/{post_id}/like")))
            .await?
            .body)
    }

    pub async fn update_post(&self, post_id: &str, payload: Value) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::put(format!("/posts/{post_id}")).json(payload))
            .await?
            .body)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::delete(format!("/posts/{post_id}")))
            .await?
            .body)
    }

    pub async fn search_posts(
        &self,
        query: &str,
        page: u32,
        size: u32,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest::get("/posts/search")
            .query("q", query)
            .query("page", page.to_string())
            .query("size", size.to_string());
        Ok(self.execute(request).await?.body)
    }

    // Comments.

    pub async fn comments_for_post(&self, post_id: &str) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::get(format!("/posts/{post_id}/comments")))
            .await?
            .body)
    }

    pub async fn create_comment(&self, post_id: &str, content: &str) -> Result<Value, ApiError> {
        let payload = json!({ "postId": post_id, "content": content });
        Ok(self
            .execute(ApiRequest::post("/comments").json(payload))
            .await?
            .body)
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::delete(format!("/comments/{comment_id}")))
            .await?
            .body)
    }

    // Messaging history (live chat runs over the websocket store).

    pub async fn conversation_history(&self, user_id: &str) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::get(format!("/messages/{user_id}")))
            .await?
            .body)
    }

    // Admin.

    pub async fn admin_users(&self) -> Result<Value, ApiError> {
        Ok(self.execute(ApiRequest::get("/admin/users")).await?.body)
    }

    pub async fn admin_delete_user(&self, user_id: &str) -> Result<Value, ApiError> {
        Ok(self
            .execute(ApiRequest::delete(format!("/admin/users/{user_id}")))
            .await?
            .body)
    }

    pub async fn admin_update_roles(
        &self,
        user_id: &str,
        roles: &[String],
    ) -> Result<Value, ApiError> {
        let payload = json!({ "roles": roles });
        Ok(self
            .execute(ApiRequest::put(format!("/admin/users/{user_id}/roles")).json(payload))
            .await?
            .body)
    }
}
