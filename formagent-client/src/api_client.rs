//! Resource client: typed REST verbs over a [`Transport`].

use crate::api::{AgentsApi, BillingApi, SessionsApi, WebhooksApi};
use crate::auth::AuthContext;
use crate::config::ClientConfig;
use crate::download::{file_name_from_disposition, Download};
use crate::transport::ReqwestTransport;
use formagent_core::{HttpRequest, HttpResponse, Method, MultipartPart, Transport, TransportError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The 401 side effects have already run by the time a caller sees this.
    #[error("Session expired, please sign in again")]
    Unauthorized,
    /// Non-2xx response; `message` is the server's or `"API Error: <status>"`.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
}

impl ApiClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiClientError::Unauthorized => Some(401),
            ApiClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiClientError::Unauthorized)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Human-readable message for a failed response.
pub fn error_message(status: u16, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("API Error: {}", status))
}

#[derive(Clone)]
pub struct ResourceClient {
    transport: Arc<dyn Transport>,
    auth: AuthContext,
}

impl ResourceClient {
    pub fn new(transport: Arc<dyn Transport>, auth: AuthContext) -> Self {
        Self { transport, auth }
    }

    pub fn from_config(config: &ClientConfig, auth: AuthContext) -> Result<Self, ApiClientError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), auth))
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiClientError> {
        let response = self.execute(HttpRequest::new(Method::Get, path)).await?;
        decode(&response)
    }

    pub async fn get_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request = HttpRequest::new(Method::Get, path).query(query)?;
        let response = self.execute(request).await?;
        decode(&response)
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::Post, path, body).await
    }

    /// POST without a body, used for status transitions.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiClientError> {
        let response = self.execute(HttpRequest::new(Method::Post, path)).await?;
        decode(&response)
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::Put, path, body).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_json(Method::Patch, path, body).await
    }

    /// DELETE; any response body is ignored.
    pub async fn delete(&self, path: &str) -> Result<(), ApiClientError> {
        self.execute(HttpRequest::new(Method::Delete, path)).await?;
        Ok(())
    }

    /// Multipart form submission.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<MultipartPart>,
    ) -> Result<T, ApiClientError> {
        let request = HttpRequest::new(Method::Post, path).multipart(parts);
        let response = self.execute(request).await?;
        decode(&response)
    }

    /// Fetch an opaque binary body. The file name comes from
    /// `Content-Disposition`, else `fallback_name`.
    pub async fn download<Q>(
        &self,
        path: &str,
        query: Option<&Q>,
        fallback_name: &str,
    ) -> Result<Download, ApiClientError>
    where
        Q: Serialize + ?Sized,
    {
        let mut request = HttpRequest::new(Method::Get, path);
        if let Some(query) = query {
            request = request.query(query)?;
        }
        let response = self.execute(request).await?;
        let file_name = response
            .header("content-disposition")
            .and_then(file_name_from_disposition)
            .unwrap_or_else(|| fallback_name.to_string());
        let content_type = response.header("content-type").map(str::to_string);
        Ok(Download {
            file_name,
            content_type,
            bytes: response.body,
        })
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: &B) -> Result<T, ApiClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = HttpRequest::new(method, path).json(body)?;
        let response = self.execute(request).await?;
        decode(&response)
    }

    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiClientError> {
        request = request.header("accept", "application/json");
        if let Some(token) = self.auth.access_token() {
            request = request.header("authorization", format!("Bearer {}", token));
        }

        let method = request.method;
        let path = request.path.clone();
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%method, %path, error = %err, "request failed");
                return Err(err.into());
            }
        };
        tracing::debug!(%method, %path, status = response.status, "request completed");

        if response.status == 401 {
            self.auth.handle_unauthorized();
            return Err(ApiClientError::Unauthorized);
        }
        if !response.is_success() {
            let message = error_message(response.status, &response.body);
            tracing::warn!(%method, %path, status = response.status, %message, "API error");
            return Err(ApiClientError::Api {
                status: response.status,
                message,
            });
        }
        Ok(response)
    }
}

/// Decode a JSON body; an empty body decodes as `null` so `()` and
/// `Option<T>` work for 204 responses.
fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiClientError> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(serde_json::from_slice(&response.body)?)
}

/// Entry point bundling the typed endpoint groups.
#[derive(Clone)]
pub struct ApiClient {
    rest: ResourceClient,
}

impl ApiClient {
    pub fn new(rest: ResourceClient) -> Self {
        Self { rest }
    }

    pub fn rest(&self) -> &ResourceClient {
        &self.rest
    }

    pub fn agents(&self) -> AgentsApi {
        AgentsApi::new(self.rest.clone())
    }

    pub fn sessions(&self) -> SessionsApi {
        SessionsApi::new(self.rest.clone())
    }

    pub fn webhooks(&self) -> WebhooksApi {
        WebhooksApi::new(self.rest.clone())
    }

    pub fn billing(&self) -> BillingApi {
        BillingApi::new(self.rest.clone())
    }
}
