//! Minimal JSON client for the managed server's REST API: login, refresh,
//! create user, delete user, and list adapters. Every call carries a 10 s
//! timeout and classifies failures as transient or permanent so that the
//! auth and adapter-discovery sub-loops can decide whether to back off or
//! surface an error.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    username: &'a str,
    password: &'a str,
    role: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[allow(dead_code)]
    pub token_type: String,
    pub expires_in: i64,
    #[allow(dead_code)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdapterInfo {
    #[serde(rename = "type")]
    pub type_: String,
    pub enabled: bool,
    pub running: bool,
    pub port: i32,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

/// Whether a REST call failure should be treated as transient (network
/// reachability) or surfaced as a permanent/semantic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientCause {
    Network,
    Dns,
    Timeout,
    ConnectionReset,
    PrematureClose,
    None,
}

/// Errors produced by calls to the managed server's API, tagged with enough
/// information to classify transient vs permanent without re-parsing.
#[derive(Debug, thiserror::Error)]
pub enum RestClientError {
    #[error("transient failure contacting managed server: {0}")]
    Transient(#[source] reqwest::Error),

    #[error("managed server returned an error: code={code} message={message}")]
    Api { code: String, message: String },

    #[error("unexpected response from managed server: {0}")]
    Protocol(#[source] reqwest::Error),
}

impl RestClientError {
    /// Returns `CONFLICT` iff this is an API-level conflict response — the
    /// "user already exists" signal the bootstrap flow treats as success.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RestClientError::Api { code, .. } if code == "CONFLICT")
    }

    pub fn transient_cause(&self) -> TransientCause {
        let source = match self {
            RestClientError::Transient(e) | RestClientError::Protocol(e) => e,
            RestClientError::Api { .. } => return TransientCause::None,
        };
        if source.is_timeout() {
            TransientCause::Timeout
        } else if source.is_connect() {
            TransientCause::Network
        } else if let Some(inner) = source.source() {
            classify_by_message(&inner.to_string())
        } else {
            classify_by_message(&source.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient_cause() != TransientCause::None
    }
}

use std::error::Error as _;

fn classify_by_message(message: &str) -> TransientCause {
    let lowered = message.to_lowercase();
    if lowered.contains("dns") || lowered.contains("name resolution") {
        TransientCause::Dns
    } else if lowered.contains("connection reset") {
        TransientCause::ConnectionReset
    } else if lowered.contains("connection closed before message completed")
        || lowered.contains("premature")
    {
        TransientCause::PrematureClose
    } else if lowered.contains("timed out") || lowered.contains("timeout") {
        TransientCause::Timeout
    } else if lowered.contains("connection refused") || lowered.contains("connect error") {
        TransientCause::Network
    } else {
        TransientCause::None
    }
}

/// Thin wrapper around `reqwest::Client` scoped to one managed server's base
/// URL. Stateless beyond the HTTP client and base URL — tokens are the
/// caller's responsibility (persisted in the operator-credentials secret).
#[derive(Clone, Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builder with a timeout never fails");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, RestClientError> {
        let body = LoginRequest { username, password };
        self.post_for_tokens("/api/v1/auth/login", &body).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, RestClientError> {
        let body = RefreshRequest { refresh_token };
        self.post_for_tokens("/api/v1/auth/refresh", &body).await
    }

    /// Creates the operator's service-account user, authenticated as the
    /// caller identified by `access_token` (the admin during bootstrap). A
    /// `CONFLICT` response (user already exists) is surfaced as `Err` with
    /// `is_conflict() == true`; callers treat that case as success.
    pub async fn create_user(&self, access_token: &str, username: &str, password: &str, role: &str) -> Result<(), RestClientError> {
        let body = CreateUserRequest { username, password, role };
        let response = self
            .http
            .post(self.url("/api/v1/users"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(RestClientError::Transient)?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(self.error_from_response(response).await)
    }

    /// Best-effort user deletion during CR cleanup; callers are expected to
    /// log and ignore any error rather than fail the pass.
    pub async fn delete_user(&self, username: &str, access_token: &str) -> Result<(), RestClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/users/{username}")))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(RestClientError::Transient)?;
        if response.status().is_success() || response.status().is_client_error() {
            return Ok(());
        }
        Err(self.error_from_response(response).await)
    }

    pub async fn list_adapters(&self, access_token: &str) -> Result<Vec<AdapterInfo>, RestClientError> {
        let response = self
            .http
            .get(self.url("/api/v1/adapters"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(RestClientError::Transient)?;
        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }
        response.json().await.map_err(RestClientError::Protocol)
    }

    async fn post_for_tokens<B: Serialize>(&self, path: &str, body: &B) -> Result<TokenResponse, RestClientError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(RestClientError::Transient)?;
        if !response.status().is_success() {
            return Err(self.error_from_response(response).await);
        }
        response.json().await.map_err(RestClientError::Protocol)
    }

    async fn error_from_response(&self, response: reqwest::Response) -> RestClientError {
        match response.json::<ErrorPayload>().await {
            Ok(payload) => RestClientError::Api {
                code: payload.code,
                message: payload.message,
            },
            Err(e) => RestClientError::Protocol(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_message_recognizes_known_transient_signatures() {
        assert_eq!(classify_by_message("dns error: name resolution failed"), TransientCause::Dns);
        assert_eq!(classify_by_message("connection reset by peer"), TransientCause::ConnectionReset);
        assert_eq!(classify_by_message("connection closed before message completed"), TransientCause::PrematureClose);
        assert_eq!(classify_by_message("operation timed out"), TransientCause::Timeout);
        assert_eq!(classify_by_message("tcp connect error: connection refused"), TransientCause::Network);
        assert_eq!(classify_by_message("invalid header value"), TransientCause::None);
    }

    #[test]
    fn conflict_error_is_recognized() {
        let err = RestClientError::Api {
            code: "CONFLICT".to_owned(),
            message: "user exists".to_owned(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }
}
