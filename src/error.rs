use axum::{Json, http::StatusCode, response::IntoResponse};
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde::{Deserialize, Serialize};
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum RallyError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("OAuth2 token request error: {0}")]
    Oauth2Token(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server { error: String },

    #[error("OAuth flow error: {0}")]
    OauthFlow(String),

    #[error("X API error: {0}")]
    XApi(XApiError),

    #[error("invalid post reference: {0:?}")]
    InvalidPostRef(String),

    #[error("a broadcast is already running")]
    BroadcastRunning,

    #[error("not signed in")]
    Unauthorized,

    #[error("admins only")]
    Forbidden,

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),
}

impl RallyError {
    /// Failure detail recorded in audit entries and announcements.
    pub fn audit_note(&self) -> String {
        match self {
            RallyError::XApi(api) => api.note(),
            RallyError::Oauth2Server { error } => error.clone(),
            other => other.to_string(),
        }
    }
}

/// Whether a failed upstream call may succeed when repeated.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for RallyError {
    fn is_retryable(&self) -> bool {
        match self {
            RallyError::Reqwest(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    return true;
                }
                e.status()
                    .is_some_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            }
            RallyError::Oauth2Token(_) => true,
            RallyError::XApi(api) => {
                api.status >= 500 || api.status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            _ => false,
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for RallyError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => RallyError::Oauth2Server {
                error: err.error().to_string(),
            },
            RequestTokenError::Request(req_e) => {
                RallyError::Oauth2Token(format!("request failed: {}", req_e))
            }
            RequestTokenError::Parse(parse_err, _body) => RallyError::Json(parse_err.into_inner()),
            RequestTokenError::Other(s) => RallyError::Oauth2Token(s),
        }
    }
}

impl IntoResponse for RallyError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            RallyError::InvalidPostRef(_) => (
                StatusCode::BAD_REQUEST,
                "BAD_INPUT",
                "Post URL or id is not valid.".to_string(),
            ),
            RallyError::BroadcastRunning => (
                StatusCode::CONFLICT,
                "CONFLICT",
                "A broadcast is already running; retry later.".to_string(),
            ),
            RallyError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Sign in first.".to_string(),
            ),
            RallyError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Admins only.".to_string(),
            ),
            RallyError::OauthFlow(reason) => (
                StatusCode::BAD_REQUEST,
                "OAUTH_FLOW",
                reason.clone(),
            ),
            RallyError::Json(_) | RallyError::Oauth2Token(_) | RallyError::Oauth2Server { .. } => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "OAuth token exchange failed.".to_string(),
            ),
            RallyError::XApi(_) | RallyError::Reqwest(_) | RallyError::UrlParse(_) => (
                StatusCode::BAD_GATEWAY,
                "BAD_GATEWAY",
                "Upstream service is unavailable.".to_string(),
            ),
            RallyError::DatabaseError(_) | RallyError::RactorError(_) | RallyError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.".to_string(),
            ),
        };
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

/// Error returned by the X API for a non-2xx response.
#[derive(Debug, Clone)]
pub struct XApiError {
    pub status: u16,
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl XApiError {
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed: XErrorBody = serde_json::from_str(body).unwrap_or_default();
        let detail = parsed.detail.or_else(|| {
            parsed
                .errors
                .into_iter()
                .find_map(|e| e.message)
        });
        Self {
            status,
            title: parsed.title,
            detail,
        }
    }

    pub fn note(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.detail.clone())
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

impl std::fmt::Display for XApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({}): {}", self.note(), self.status, detail),
            None => write!(f, "{} ({})", self.note(), self.status),
        }
    }
}

/// Problem-details payload the X API sends with failures.
#[derive(Deserialize, Debug, Default)]
struct XErrorBody {
    title: Option<String>,
    detail: Option<String>,
    #[serde(default)]
    errors: Vec<XErrorItem>,
}

#[derive(Deserialize, Debug)]
struct XErrorItem {
    message: Option<String>,
}
