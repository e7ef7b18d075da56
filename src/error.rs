use std::time::Duration;

use thiserror::Error;

/// Failure of a single query or mutation.
///
/// Cloneable because one failed fetch is delivered to every subscriber of the
/// entry that issued it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
  /// The request never completed (connection refused, DNS, reset, ...)
  #[error("network error: {0}")]
  Transport(String),
  /// No response arrived within the configured bound
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  /// The server answered with a non-2xx status
  #[error("server returned {status}: {message}")]
  Application { status: u16, message: String },
  /// A 2xx response whose body was not the JSON we expected
  #[error("failed to decode response: {0}")]
  Parse(String),
  /// Rejected locally before anything was sent
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl ApiError {
  /// Build an application error from a non-2xx response body.
  ///
  /// JSON bodies carrying an `error` or `message` string use that string,
  /// other JSON is echoed verbatim and anything else falls back to the status.
  pub fn from_response(status: u16, reason: Option<&str>, body: &[u8]) -> Self {
    let message = match serde_json::from_slice::<serde_json::Value>(body) {
      Ok(serde_json::Value::Object(map)) => map
        .get("error")
        .or_else(|| map.get("message"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .unwrap_or_else(|| serde_json::Value::Object(map.clone()).to_string()),
      Ok(serde_json::Value::String(s)) => s,
      Ok(serde_json::Value::Null) | Err(_) => generic_message(status, reason),
      Ok(other) => other.to_string(),
    };

    ApiError::Application { status, message }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, ApiError::Timeout(_))
  }

  /// HTTP status for application failures
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Application { status, .. } => Some(*status),
      _ => None,
    }
  }
}

fn generic_message(status: u16, reason: Option<&str>) -> String {
  match reason {
    Some(reason) => format!("request failed with status {} {}", status, reason),
    None => format!("request failed with status {}", status),
  }
}
