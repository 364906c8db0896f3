//! Operation-audit event payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Action names emitted by the user service.
pub mod actions {
    pub const USER_REGISTER: &str = "USER_REGISTER";
    pub const USER_LOGIN: &str = "USER_LOGIN";
    pub const USER_LOGOUT: &str = "USER_LOGOUT";
    pub const USER_UPDATE: &str = "USER_UPDATE";
    pub const PASSWORD_RESET: &str = "PASSWORD_RESET";
    pub const USER_INFO_VIEW: &str = "USER_INFO_VIEW";
    pub const USER_LIST_VIEW: &str = "USER_LIST_VIEW";
}

/// One audited operation.
///
/// `detail` is a JSON document rendered as a string so the persisted column
/// stays schema-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEvent {
    pub user_id: i64,
    pub action: String,
    pub ip: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl OperationEvent {
    /// Build an event with a structured detail document.
    pub fn new(
        user_id: i64,
        action: impl Into<String>,
        ip: impl Into<String>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            user_id,
            action: action.into(),
            ip: ip.into(),
            detail: detail.to_string(),
            timestamp: Utc::now(),
            retry_count: 0,
        }
    }

    /// Override the event timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn user_register(user_id: i64, username: &str, email: &str, phone: &str, ip: &str) -> Self {
        Self::new(
            user_id,
            actions::USER_REGISTER,
            ip,
            json!({ "username": username, "email": email, "phone": phone }),
        )
    }

    pub fn user_login(user_id: i64, username: &str, ip: &str) -> Self {
        Self::new(user_id, actions::USER_LOGIN, ip, json!({ "username": username }))
    }

    pub fn user_logout(user_id: i64, username: &str, ip: &str) -> Self {
        Self::new(user_id, actions::USER_LOGOUT, ip, json!({ "username": username }))
    }

    pub fn user_update(user_id: i64, username: &str, ip: &str, changes: serde_json::Value) -> Self {
        Self::new(
            user_id,
            actions::USER_UPDATE,
            ip,
            json!({ "username": username, "changes": changes }),
        )
    }

    pub fn password_reset(user_id: i64, username: &str, ip: &str) -> Self {
        Self::new(user_id, actions::PASSWORD_RESET, ip, json!({ "username": username }))
    }

    /// A user looked at another user's profile.
    pub fn user_info_view(
        current_user_id: i64,
        target_username: &str,
        target_user_id: i64,
        ip: &str,
    ) -> Self {
        Self::new(
            current_user_id,
            actions::USER_INFO_VIEW,
            ip,
            json!({
                "targetUsername": target_username,
                "targetUserId": target_user_id,
                "viewType": "single_user",
            }),
        )
    }

    /// A user paged through the user list.
    pub fn user_list_view(
        current_user_id: i64,
        current_user_role: &str,
        page_no: u64,
        page_size: u64,
        result_count: usize,
        ip: &str,
    ) -> Self {
        Self::new(
            current_user_id,
            actions::USER_LIST_VIEW,
            ip,
            json!({
                "currentUserRole": current_user_role,
                "pageNo": page_no,
                "pageSize": page_size,
                "resultCount": result_count,
                "viewType": "user_list",
            }),
        )
    }
}
