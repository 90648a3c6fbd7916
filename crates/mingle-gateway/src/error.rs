use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error type for the hosted-API collaborators.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Non-success HTTP status from the remote service.
    #[error("api error: http {status}: {body}")]
    Api { status: u16, body: String },

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        GatewayError::Api {
            status,
            body: body.into(),
        }
    }

    /// Whether the failure is likely transient (server-side or rate
    /// limiting) and worth retrying later.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Api { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}
