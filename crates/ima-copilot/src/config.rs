use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub credentials: CredentialsConfig,
    /// Knowledge base every question is asked against.
    pub knowledge_base_id: String,
    pub client_id: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Wall-clock budget for one question, across all attempts.
    #[serde(default = "default_question_timeout")]
    pub question_timeout_seconds: u64,
    /// Budget for the readiness token check.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub raw_trace: RawTraceConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("required setting '{0}' is empty")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Falls back to `IMA_*` environment variables when the file does not exist.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Self::from_env(),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text, expanding environment variables first.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: Self = serde_saphyr::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `IMA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
        };
        let optional = |name: &str| std::env::var(name).ok();

        let mut config = Self::new(
            CredentialsConfig {
                x_ima_cookie: required("IMA_X_IMA_COOKIE")?,
                x_ima_bkn: required("IMA_X_IMA_BKN")?,
                cookies: optional("IMA_COOKIES"),
                user_id: optional("IMA_USER_ID"),
                refresh_token: optional("IMA_REFRESH_TOKEN"),
            },
            required("IMA_KNOWLEDGE_BASE_ID")?,
            required("IMA_CLIENT_ID")?,
        );
        config.transport.proxy = optional("IMA_PROXY");
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration with defaults for everything but the required settings.
    pub fn new(
        credentials: CredentialsConfig,
        knowledge_base_id: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            knowledge_base_id: knowledge_base_id.into(),
            client_id: client_id.into(),
            base_url: default_base_url(),
            question_timeout_seconds: default_question_timeout(),
            ready_timeout_seconds: default_ready_timeout(),
            behavior: BehaviorConfig::default(),
            transport: TransportConfig::default(),
            stream: StreamConfig::default(),
            retry: RetryConfig::default(),
            raw_trace: RawTraceConfig::default(),
        }
    }

    /// Check that all required settings are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("credentials.x_ima_cookie", &self.credentials.x_ima_cookie),
            ("credentials.x_ima_bkn", &self.credentials.x_ima_bkn),
            ("knowledge_base_id", &self.knowledge_base_id),
            ("client_id", &self.client_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn question_timeout(&self) -> Duration {
        Duration::from_secs(self.question_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Configuration view safe to print: no cookies, tokens, or bkn.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub base_url: String,
    pub client_id: String,
    pub knowledge_base_id: String,
    pub question_timeout_seconds: u64,
    pub ready_timeout_seconds: u64,
    pub initial_timeout_seconds: u64,
    pub chunk_timeout_seconds: u64,
    pub max_attempts: u32,
    pub proxy: Option<String>,
    pub has_full_cookies: bool,
    pub raw_trace_enabled: bool,
    pub raw_trace_dir: PathBuf,
    pub raw_trace_on_success: bool,
}

impl Config {
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            base_url: self.base_url.clone(),
            client_id: self.client_id.clone(),
            knowledge_base_id: self.knowledge_base_id.clone(),
            question_timeout_seconds: self.question_timeout_seconds,
            ready_timeout_seconds: self.ready_timeout_seconds,
            initial_timeout_seconds: self.stream.initial_timeout_seconds,
            chunk_timeout_seconds: self.stream.chunk_timeout_seconds,
            max_attempts: self.retry.max_attempts,
            proxy: self.transport.proxy.clone(),
            has_full_cookies: self
                .credentials
                .cookies
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty()),
            raw_trace_enabled: self.raw_trace.enabled,
            raw_trace_dir: self.raw_trace.dir.clone(),
            raw_trace_on_success: self.raw_trace.on_success,
        }
    }
}

// ============================================================================
// Section Types
// ============================================================================

/// Browser-derived session artifacts.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Value of the `x-ima-cookie` header.
    pub x_ima_cookie: String,
    /// Value of the `x-ima-bkn` anti-bot header.
    pub x_ima_bkn: String,
    /// Full browser cookie string, if available.
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Vendor behavior knobs sent with every request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub robot_type: i64,
    pub scene_type: i64,
    pub model_type: i64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            robot_type: 5,
            scene_type: 1,
            model_type: 4,
        }
    }
}

/// Connection pool and per-call timeouts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_seconds: u64,
    /// Timeout for the JSON endpoints (refresh, session init).
    pub request_timeout_seconds: u64,
    pub max_connections: usize,
    pub max_connections_per_host: usize,
    pub keep_alive_seconds: u64,
    pub proxy: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 30,
            request_timeout_seconds: 30,
            max_connections: 100,
            max_connections_per_host: 30,
            keep_alive_seconds: 60,
            proxy: None,
        }
    }
}

/// Timers and heuristics for one streaming attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Silence allowed before the first byte arrives.
    pub initial_timeout_seconds: u64,
    /// Silence allowed between chunks once data is flowing.
    pub chunk_timeout_seconds: u64,
    /// Whole-body reparse kicks in when fewer than one content message
    /// arrived per this many chunks.
    pub fallback_chunks_per_message: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_timeout_seconds: 180,
            chunk_timeout_seconds: 120,
            fallback_chunks_per_message: 100,
        }
    }
}

/// Question-level retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per question, including the first one.
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
    /// Case-insensitive substrings that identify an expired login.
    pub login_expiry_patterns: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_min_ms: 1000,
            backoff_max_ms: 10_000,
            login_expiry_patterns: default_login_expiry_patterns(),
        }
    }
}

/// Raw stream capture for troubleshooting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawTraceConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    /// Bytes of body kept per trace file; 0 keeps everything.
    pub max_bytes: usize,
    /// Also write traces for successful attempts.
    pub on_success: bool,
}

impl Default for RawTraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from(DEFAULT_RAW_TRACE_DIR),
            max_bytes: 1024 * 1024,
            on_success: false,
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "ima-copilot.yaml";
/// Default directory for raw stream traces.
pub const DEFAULT_RAW_TRACE_DIR: &str = "logs/sse_raw";
/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://ima.qq.com";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_question_timeout() -> u64 {
    50
}

fn default_ready_timeout() -> u64 {
    15
}

fn default_login_expiry_patterns() -> Vec<String> {
    [
        "Session initialization failed",
        "登录过期",
        "登录失败",
        "authentication failed",
        "认证失败",
        "code: 600001",
        "code: 600002",
        "code: 600003",
        "token expired",
        "会话已过期",
        "请重新登录",
        "unauthorized",
        "401",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// ```yaml
/// credentials:
///   x_ima_cookie: ${IMA_X_IMA_COOKIE}
///   cookies: ${IMA_COOKIES:-}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut found_closing_brace = false;

    while let Some(c) = chars.next() {
        match c {
            '}' => {
                found_closing_brace = true;
                break;
            }
            ':' if default_value.is_none() && chars.peek() == Some(&'-') => {
                chars.next();
                default_value = Some(String::new());
            }
            _ => match default_value.as_mut() {
                Some(default) => default.push(c),
                None => var_name.push(c),
            },
        }
    }

    if !found_closing_brace {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
credentials:
  x_ima_cookie: "IMA-GUID=g1; IMA-UID=u1"
  x_ima_bkn: "bkn"
knowledge_base_id: "kb-1"
client_id: "client-1"
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.behavior.robot_type, 5);
        assert_eq!(config.transport.max_connections_per_host, 30);
        assert_eq!(config.stream.initial_timeout_seconds, 180);
        assert_eq!(config.retry.max_attempts, 4);
        assert!(!config.raw_trace.enabled);
        assert_eq!(config.question_timeout(), Duration::from_secs(50));
        assert!(
            config
                .retry
                .login_expiry_patterns
                .iter()
                .any(|p| p == "token expired")
        );
    }

    #[test]
    fn sections_override_defaults() {
        let yaml = format!(
            "{MINIMAL}
retry:
  max_attempts: 2
  login_expiry_patterns: [\"expired\"]
raw_trace:
  enabled: true
  dir: /tmp/traces
  on_success: true
"
        );
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.backoff_max_ms, 10_000);
        assert_eq!(config.retry.login_expiry_patterns, vec!["expired"]);
        assert!(config.raw_trace.enabled);
        assert_eq!(config.raw_trace.dir, PathBuf::from("/tmp/traces"));
        assert_eq!(config.raw_trace.max_bytes, 1024 * 1024);
    }

    #[test]
    fn summary_omits_secrets() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        let json = serde_json::to_string(&config.summary()).unwrap();
        assert!(json.contains("kb-1"));
        assert!(!json.contains("IMA-UID"));
        assert!(!json.contains("bkn"));
    }

    #[test]
    fn empty_required_field_is_rejected() {
        let yaml = MINIMAL.replace("client-1", "");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("client_id")));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let yaml = format!("{MINIMAL}\nretry:\n  max_attempts: 0\n");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.knowledge_base_id, "kb-1");
    }

    #[test]
    fn expand_uses_default_when_unset() {
        let out = expand_env_vars("a: ${IMA_TEST_SURELY_UNSET_VAR:-fallback}").unwrap();
        assert_eq!(out, "a: fallback");
    }

    #[test]
    fn expand_empty_default() {
        let out = expand_env_vars("a: '${IMA_TEST_SURELY_UNSET_VAR:-}'").unwrap();
        assert_eq!(out, "a: ''");
    }

    #[test]
    fn expand_missing_required_var_errors() {
        let err = expand_env_vars("${IMA_TEST_SURELY_UNSET_VAR}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(name) if name == "IMA_TEST_SURELY_UNSET_VAR"));
    }

    #[test]
    fn expand_reads_environment() {
        // PATH is set in every test environment.
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("${PATH}").unwrap(), path);
    }

    #[test]
    fn expand_keeps_plain_and_escaped_dollars() {
        assert_eq!(expand_env_vars("price: $100").unwrap(), "price: $100");
        assert_eq!(expand_env_vars("$${NOT_A_VAR}").unwrap(), "${NOT_A_VAR}");
    }

    #[test]
    fn expand_unclosed_reference_errors() {
        let err = expand_env_vars("${UNCLOSED").unwrap_err();
        assert!(matches!(err, ConfigError::UnclosedVarReference));
    }
}
