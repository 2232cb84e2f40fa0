use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ApiResponse, CODE_OK, CODE_SESSION_INVALID};

/// How a non-200 envelope code is treated by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// 402: the session token is no longer accepted. Terminal for the caller.
    SessionInvalid,
    /// Any other non-200 code. Returned as data; the caller branches on it.
    Business,
}

impl ErrorCode {
    pub fn classify(code: i64) -> Option<Self> {
        match code {
            CODE_OK => None,
            CODE_SESSION_INVALID => Some(ErrorCode::SessionInvalid),
            _ => Some(ErrorCode::Business),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub status: i64,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, status: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
        }
    }

    /// Failure carried by an envelope with `success == false`.
    pub fn rejected(response: &ApiResponse) -> Self {
        Self {
            code: response.error_code().unwrap_or(ErrorCode::Business),
            status: response.code,
            message: response.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_envelope_codes() {
        assert_eq!(ErrorCode::classify(200), None);
        assert_eq!(ErrorCode::classify(402), Some(ErrorCode::SessionInvalid));
        assert_eq!(ErrorCode::classify(500), Some(ErrorCode::Business));
        assert_eq!(ErrorCode::classify(0), Some(ErrorCode::Business));
    }

    #[test]
    fn rejected_keeps_backend_message() {
        let response = ApiResponse {
            code: 200,
            success: false,
            message: "wrong password".into(),
            ..ApiResponse::default()
        };

        let err = ApiError::rejected(&response);
        assert_eq!(err.code, ErrorCode::Business);
        assert_eq!(err.status, 200);
        assert_eq!(err.to_string(), "wrong password");
    }
}
