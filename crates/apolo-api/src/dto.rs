//! Response DTOs shared by the handlers

use serde::Serialize;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// Response message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a success response with data
    pub fn success(data: T) -> Self {
        Self {
            data,
            message: None,
        }
    }

    /// Create a success response with data and message
    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
        }
    }
}

/// `GetMaxSessionTime` reply: seconds a session may last, `-1` when unlimited
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MaxSessionTime {
    pub max_session_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_is_omitted_when_absent() {
        let plain = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert_eq!(plain, json!({"data": 1}));

        let noted = serde_json::to_value(ApiResponse::with_message("x", "Saved")).unwrap();
        assert_eq!(noted, json!({"data": "x", "message": "Saved"}));
    }
}
