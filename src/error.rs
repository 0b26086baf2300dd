use thiserror::Error;

/// Failure of a single backend HTTP call, classified for the aggregation
/// layer: non-200 statuses are distinguished from transport and decode
/// failures because they map to different outcomes.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("unexpected backend status: {0}")]
    Status(u16),

    #[error("backend request failed: {0}")]
    Transport(String),

    #[error("malformed backend response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
