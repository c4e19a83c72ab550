//! Data Models

use serde::{Deserialize, Serialize};

/// Standard API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChallenge {
    pub title: String,
    #[serde(default = "default_max_participants")]
    pub max_participants: i64,
}

fn default_max_participants() -> i64 {
    25
}

#[derive(Debug, Deserialize)]
pub struct AddParticipants {
    pub external_user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemPromo {
    pub code: String,
}
