//! Dashboard API Types

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// Envelope for every JSON response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// HTTP status for a supervisor error
pub fn status_for(err: &BotError) -> StatusCode {
    match err {
        BotError::AlreadyRunning(_) | BotError::NotRunning(_) => StatusCode::CONFLICT,
        BotError::ConfigMissing(_) => StatusCode::BAD_REQUEST,
        BotError::ConnectFailed { .. } => StatusCode::BAD_GATEWAY,
        BotError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    #[test]
    fn conflicts_map_to_409() {
        assert_eq!(
            status_for(&BotError::AlreadyRunning(UserId(1))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&BotError::ConfigMissing(UserId(1))),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn error_envelope_has_no_data() {
        let resp: ApiResponse<()> = ApiResponse::error("boom");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["data"].is_null());
        assert_eq!(json["error"], "boom");
    }
}
