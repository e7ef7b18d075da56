use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::{ApiRequest, Transport};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// Header carrying the selected user's id on every request
pub const CURRENT_USER_HEADER: &str = "currentUserId";

/// HTTP transport for the library backend
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  base: Url,
  timeout: Duration,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> color_eyre::Result<Self> {
    let timeout = Duration::from_secs(config.timeout_secs);
    Self::with_timeout(&config.base_url, timeout)
  }

  pub fn with_timeout(base_url: &str, timeout: Duration) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    // A trailing slash keeps any path prefix when request paths are joined
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base = Url::parse(&normalized)
      .map_err(|e| eyre!("Failed to parse API base URL {}: {}", base_url, e))?;

    let client = Client::builder()
      .user_agent(concat!("libris/", env!("CARGO_PKG_VERSION")))
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      timeout,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn url(&self, request: &ApiRequest) -> Result<Url, ApiError> {
    let mut url = self
      .base
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| ApiError::InvalidRequest(format!("bad path {}: {}", request.path, e)))?;
    if !request.query.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in &request.query {
        pairs.append_pair(name, value);
      }
    }
    Ok(url)
  }

  async fn send(
    client: Client,
    url: Url,
    request: ApiRequest,
    timeout: Duration,
  ) -> Result<Option<Value>, ApiError> {
    let mut builder = client.request(request.method.clone(), url);
    if let Some(user_id) = request.user_id {
      builder = builder.header(CURRENT_USER_HEADER, user_id.to_string());
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| transport_error(e, timeout))?;
    handle(response, timeout).await
  }
}

async fn handle(response: Response, timeout: Duration) -> Result<Option<Value>, ApiError> {
  let status = response.status();
  let is_json = response
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.contains("json"));
  let bytes = response
    .bytes()
    .await
    .map_err(|e| transport_error(e, timeout))?;

  if !status.is_success() {
    return Err(ApiError::from_response(
      status.as_u16(),
      status.canonical_reason(),
      &bytes,
    ));
  }

  if status == StatusCode::NO_CONTENT || !is_json || bytes.is_empty() {
    return Ok(None);
  }

  serde_json::from_slice(&bytes)
    .map(Some)
    .map_err(|e| ApiError::Parse(e.to_string()))
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ApiError {
  if e.is_timeout() {
    ApiError::Timeout(timeout)
  } else {
    ApiError::Transport(e.to_string())
  }
}

impl Transport for ApiClient {
  fn execute(&self, request: ApiRequest) -> BoxFuture<'static, Result<Option<Value>, ApiError>> {
    let client = self.client.clone();
    let timeout = self.timeout;
    let url = self.url(&request);

    async move {
      let url = url?;
      debug!(method = %request.method, %url, "sending request");
      Self::send(client, url, request, timeout).await
    }
    .boxed()
  }
}
