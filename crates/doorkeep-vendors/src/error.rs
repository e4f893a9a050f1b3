use reqwest::StatusCode;
use thiserror::Error;

/// Vendor call failure.
#[derive(Debug, Error)]
pub enum VendorError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },

    /// 2xx response whose body reports failure or lacks a required field.
    #[error("{service} rejected the request: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("{service} authentication failed: {message}")]
    Auth {
        service: &'static str,
        message: String,
    },
}

pub type VendorResult<T> = Result<T, VendorError>;
