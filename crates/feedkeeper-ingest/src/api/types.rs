//! Response envelope of the data365 API

use serde::Deserialize;
use serde_json::Value;

pub const STATUS_OK: &str = "ok";
pub const STATUS_ACCEPTED: &str = "accepted";
pub const STATUS_FAIL: &str = "fail";

/// Error code for items the platform does not have
pub const NOT_FOUND_CODE: &str = "NotFoundError";

/// Every response: `{ "data": ..., "error": ..., "status": "ok" | "fail" | "accepted" }`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
    #[serde(default)]
    pub status: String,
}

impl ApiEnvelope {
    pub fn is_not_found(&self) -> bool {
        self.status == STATUS_FAIL
            && self
                .error
                .as_ref()
                .and_then(|e| e.code.as_deref())
                .is_some_and(|code| code == NOT_FOUND_CODE)
    }

    /// Short description of a failed envelope for error messages
    pub fn describe(&self) -> String {
        match &self.error {
            Some(error) => format!(
                "status={}, code={}, message={}",
                self.status,
                error.code.as_deref().unwrap_or("-"),
                error.message.as_deref().unwrap_or("-")
            ),
            None => format!("status={}", self.status),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `data` of a collection response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageData {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// `data` of a refresh status response
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateData {
    pub status: String,
    #[serde(default)]
    pub task_id: Option<String>,
}
