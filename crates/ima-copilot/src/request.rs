//! Wire payloads for session init and ask-question.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use rand::Rng;

use crate::config::{BehaviorConfig, Config};
use crate::error::{ImaError, Result};
use crate::upstream::wire::{
    AskQuestionRequest, CommandInfo, DeviceInfo, EnvInfo, HistoryInfo, InitSessionRequest,
    KnowledgeBaseInfoWithFolder, KnowledgeQaInfo, ModelInfo,
};

const QUESTION_TYPE: i64 = 2;
const KNOWLEDGE_QA_COMMAND: i64 = 14;
const MSGS_LIMIT: i64 = 10;
const SESSION_ID_LEN: usize = 24;
const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A vendor conversation, used for exactly one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque id returned by session init.
    pub id: String,
    /// Locally generated id correlating logs and trace files.
    pub local_id: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            local_id: RequestBuilder::session_id(),
        }
    }
}

/// Builds request bodies from configuration and per-call inputs.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    client_id: String,
    behavior: BehaviorConfig,
}

impl RequestBuilder {
    pub fn new(client_id: impl Into<String>, behavior: BehaviorConfig) -> Self {
        Self {
            client_id: client_id.into(),
            behavior,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.client_id.clone(), config.behavior.clone())
    }

    /// Body of an ask-question call. The question is sent unmodified.
    ///
    /// `guid` is the browser GUID used to tag the device info.
    pub fn ask_request(
        &self,
        question: &str,
        session: &Session,
        guid: &str,
    ) -> Result<AskQuestionRequest> {
        if question.trim().is_empty() {
            return Err(ImaError::invalid_argument("question must not be empty"));
        }

        Ok(AskQuestionRequest {
            session_id: session.id.clone(),
            robot_type: self.behavior.robot_type,
            question: question.to_string(),
            question_type: QUESTION_TYPE,
            client_id: self.client_id.clone(),
            command_info: CommandInfo {
                kind: KNOWLEDGE_QA_COMMAND,
                knowledge_qa_info: KnowledgeQaInfo::default(),
            },
            model_info: ModelInfo {
                model_type: self.behavior.model_type,
                enable_enhancement: false,
            },
            history_info: HistoryInfo::default(),
            device_info: DeviceInfo {
                uskey: uskey(),
                uskey_bus_infos_input: format!("{}_{}", guid, Utc::now().timestamp()),
            },
        })
    }

    /// Body of a session-init call for `knowledge_base_id`.
    pub fn init_session_request(&self, knowledge_base_id: &str) -> InitSessionRequest {
        InitSessionRequest {
            env_info: EnvInfo {
                robot_type: self.behavior.robot_type,
                interact_type: 0,
            },
            related_url: knowledge_base_id.to_string(),
            scene_type: self.behavior.scene_type,
            msgs_limit: MSGS_LIMIT,
            forbid_auto_add_to_history_list: false,
            knowledge_base_info_with_folder: KnowledgeBaseInfoWithFolder {
                knowledge_base_id: knowledge_base_id.to_string(),
                folder_ids: Vec::new(),
            },
        }
    }

    /// Fresh 24-character `[a-z0-9]` identifier.
    pub fn session_id() -> String {
        let mut rng = rand::rng();
        (0..SESSION_ID_LEN)
            .map(|_| SESSION_ID_ALPHABET[rng.random_range(0..SESSION_ID_ALPHABET.len())] as char)
            .collect()
    }
}

/// Base64 of 32 random bytes, fresh per request.
fn uskey() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    STANDARD.encode(bytes)
}
