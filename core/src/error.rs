use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("remote API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("load job {job_id} failed: {message}")]
    Load { job_id: String, message: String },

    #[error("record has no field `{field}`")]
    MissingField { field: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Api { status, .. } => *status == 429 || *status >= 500,
            Error::Io(_) => true,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Validation(_) | Error::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        let throttled = Error::Api { status: 429, message: "rate limited".into() };
        let unavailable = Error::Api { status: 503, message: "backend".into() };
        let not_found = Error::Api { status: 404, message: "no such course".into() };

        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn config_errors_are_fatal() {
        assert!(Error::Config("missing".into()).is_fatal());
        assert!(!Error::MissingField { field: "id".into() }.is_fatal());
    }
}
