// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The closed error taxonomy from the external-interfaces error code table.
//! Every handler error in the gateway is one of these variants; the
//! dispatcher converts it to an `ErrorPayload` and never lets it escape as
//! a panic or an unmapped status.

use crate::ErrorPayload;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("not connected")]
    NotConnected,
    #[error("unsupported protocol version")]
    UnsupportedProtocol,
    #[error("invalid client mode or runtime")]
    InvalidMode,
    #[error("bad params: {0}")]
    BadParams(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not authorized: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("downstream not connected: {0}")]
    DownstreamUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("timed out")]
    Timeout,
}

impl GatewayError {
    pub fn code(&self) -> u16 {
        match self {
            GatewayError::NotConnected => 101,
            GatewayError::UnsupportedProtocol => 102,
            GatewayError::InvalidMode => 103,
            GatewayError::BadParams(_) => 400,
            GatewayError::Unauthorized => 401,
            GatewayError::Forbidden(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::Conflict(_) => 409,
            GatewayError::Internal(_) => 500,
            GatewayError::NotImplemented => 501,
            GatewayError::DownstreamUnavailable(_) => 503,
            GatewayError::Timeout => 504,
        }
    }

    pub fn retryable(&self) -> Option<bool> {
        match self {
            GatewayError::DownstreamUnavailable(_) | GatewayError::Timeout => Some(true),
            _ => None,
        }
    }
}

impl From<GatewayError> for ErrorPayload {
    fn from(e: GatewayError) -> Self {
        ErrorPayload {
            code: e.code(),
            retryable: e.retryable(),
            message: e.to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_maps_to_101() {
        assert_eq!(GatewayError::NotConnected.code(), 101);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(GatewayError::NotFound("tool x".into()).code(), 404);
    }

    #[test]
    fn downstream_unavailable_is_retryable() {
        assert_eq!(GatewayError::DownstreamUnavailable("node".into()).retryable(), Some(true));
    }

    #[test]
    fn conflict_is_not_marked_retryable() {
        assert_eq!(GatewayError::Conflict("node.forget while connected".into()).retryable(), None);
    }
}
