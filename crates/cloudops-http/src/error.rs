//! HTTP transport setup errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, HttpError>;
