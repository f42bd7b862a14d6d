// src/utils/errors.rs

use std::{error::Error, fmt};
use reqwest;
use serde_json;
use tungstenite::Error as WsError;

/// Errors coming from external API calls (HTTP, JSON, WS, etc).
#[derive(Debug)]
pub enum ApiError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    WebSocket(WsError),
    Io(std::io::Error),
    Other(String),
    Custom(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Http(e)      => write!(f, "HTTP error: {}", e),
            ApiError::Json(e)      => write!(f, "JSON error: {}", e),
            ApiError::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            ApiError::Io(e)        => write!(f, "I/O error: {}", e),
            ApiError::Other(msg)   => write!(f, "{}", msg),
            ApiError::Custom(msg)  => write!(f, "Custom error: {}", msg),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Http(e)      => Some(e),
            ApiError::Json(e)      => Some(e),
            ApiError::WebSocket(e) => Some(e),
            ApiError::Io(e)        => Some(e),
            ApiError::Other(_)     => None,
            ApiError::Custom(_)    => None,
        }
    }
}

// Conversions from underlying errors into ApiError
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self { ApiError::Http(err) }
}
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self { ApiError::Json(err) }
}
impl From<WsError> for ApiError {
    fn from(err: WsError) -> Self { ApiError::WebSocket(err) }
}
impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self { ApiError::Io(err) }
}

/// Errors at the broadcast-hub level.
#[derive(thiserror::Error, Debug)]
pub enum HubError {
    #[error("unknown client {0}")]
    UnknownClient(uuid::Uuid),
    #[error("client {0} went away mid-send")]
    ClientGone(uuid::Uuid),
}
