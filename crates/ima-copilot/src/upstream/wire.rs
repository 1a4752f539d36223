//! Request and response bodies of the vendor endpoints.

use serde::{Deserialize, Serialize};

use crate::message::lenient_i64;

// ============================================================================
// Token Refresh
// ============================================================================

/// Token type the refresh endpoint expects for browser sessions.
pub const TOKEN_TYPE: i64 = 14;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenRefreshRequest {
    pub user_id: String,
    pub refresh_token: String,
    pub token_type: i64,
}

impl TokenRefreshRequest {
    pub fn new(user_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            refresh_token: refresh_token.into(),
            token_type: TOKEN_TYPE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRefreshResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Token lifetime in seconds; sent as a numeric string.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub token_valid_time: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
}

// ============================================================================
// Session Init
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionRequest {
    pub env_info: EnvInfo,
    pub related_url: String,
    pub scene_type: i64,
    pub msgs_limit: i64,
    pub forbid_auto_add_to_history_list: bool,
    pub knowledge_base_info_with_folder: KnowledgeBaseInfoWithFolder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvInfo {
    pub robot_type: i64,
    pub interact_type: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseInfoWithFolder {
    pub knowledge_base_id: String,
    pub folder_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitSessionResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

// ============================================================================
// Ask Question
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskQuestionRequest {
    pub session_id: String,
    pub robot_type: i64,
    pub question: String,
    pub question_type: i64,
    pub client_id: String,
    pub command_info: CommandInfo,
    pub model_info: ModelInfo,
    pub history_info: HistoryInfo,
    pub device_info: DeviceInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandInfo {
    #[serde(rename = "type")]
    pub kind: i64,
    pub knowledge_qa_info: KnowledgeQaInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KnowledgeQaInfo {
    pub tags: Vec<String>,
    pub knowledge_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model_type: i64,
    pub enable_enhancement: bool,
}

/// Always sent as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryInfo {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub uskey: String,
    pub uskey_bus_infos_input: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Business error envelope returned instead of a stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// `-1` when the vendor omits the code.
    #[serde(default = "missing_code")]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

fn missing_code() -> i64 {
    -1
}
