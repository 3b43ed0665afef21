use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("all {attempts} attempts failed: {detail}")]
    AllAttemptsFailed { attempts: usize, detail: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("upstream code {code}: {message}")]
    UpstreamCode { code: i64, message: String },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid credential header: {0}")]
    InvalidCredential(String),
}
