//! Browser-derived credentials and outbound header construction.

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::CredentialsConfig;
use crate::error::{ImaError, Result};

/// Tokens are treated as expired this long before their nominal end.
pub const EXPIRY_MARGIN_SECS: i64 = 300;
/// Lifetime assumed when the refresh response omits one.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 7200;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6";
const REFERER: &str = "https://ima.qq.com/wikis";
const EXTENSION_VERSION: &str = "999.999.999";
const DEFAULT_GUID: &str = "default_guid";

/// Which vendor endpoint a header set is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    TokenRefresh,
    SessionInit,
    AskQuestion,
}

// ============================================================================
// Cookie Extraction
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum CookieSource {
    /// The `x-ima-cookie` blob.
    Blob,
    /// The full browser cookie string.
    Full,
}

struct ExtractRule {
    source: CookieSource,
    pattern: Regex,
    percent_decode: bool,
}

impl ExtractRule {
    fn new(source: CookieSource, pattern: &str, percent_decode: bool) -> Option<Self> {
        Some(Self {
            source,
            pattern: Regex::new(pattern).ok()?,
            percent_decode,
        })
    }
}

static USER_ID_RULES: LazyLock<Vec<ExtractRule>> = LazyLock::new(|| {
    [
        ExtractRule::new(CookieSource::Blob, r"IMA-UID=([^;]+)", false),
        ExtractRule::new(CookieSource::Full, r"user_id=([a-f0-9]{16})", false),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static REFRESH_TOKEN_RULES: LazyLock<Vec<ExtractRule>> = LazyLock::new(|| {
    [
        ExtractRule::new(CookieSource::Blob, r"IMA-REFRESH-TOKEN=([^;]+)", true),
        // Older cookie blobs only carry the access token.
        ExtractRule::new(CookieSource::Blob, r"IMA-TOKEN=([^;]+)", true),
        ExtractRule::new(CookieSource::Full, r"refresh_token=([^;]+)", true),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static GUID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"IMA-GUID=([^;]+)").ok());

static TOKEN_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"IMA-TOKEN=[^;]+").ok());

// ============================================================================
// Credentials
// ============================================================================

/// Session artifacts plus the current access token.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub x_ima_cookie: String,
    pub x_ima_bkn: String,
    pub cookies: Option<String>,
    pub user_id: Option<String>,
    pub refresh_token: Option<String>,
    pub token: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub ttl_secs: Option<i64>,
}

impl Credentials {
    pub fn from_config(config: &CredentialsConfig) -> Self {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        Self {
            x_ima_cookie: config.x_ima_cookie.clone(),
            x_ima_bkn: config.x_ima_bkn.clone(),
            cookies: non_empty(&config.cookies),
            user_id: non_empty(&config.user_id),
            refresh_token: non_empty(&config.refresh_token),
            ..Self::default()
        }
    }

    /// Instant from which the token counts as expired.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.as_ref()?;
        let issued_at = self.issued_at?;
        let ttl = self.ttl_secs?;
        Some(issued_at + TimeDelta::seconds(ttl - EXPIRY_MARGIN_SECS))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record a freshly issued token.
    pub fn apply_refresh(&mut self, token: String, ttl_secs: Option<i64>, now: DateTime<Utc>) {
        self.token = Some(token);
        self.ttl_secs = Some(ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS));
        self.issued_at = Some(now);
    }

    /// Configured user id, or one derived from the cookies.
    pub fn resolve_user_id(&self) -> Option<String> {
        self.user_id
            .clone()
            .or_else(|| self.extract(&USER_ID_RULES))
    }

    /// Configured refresh token, or one derived from the cookies.
    pub fn resolve_refresh_token(&self) -> Option<String> {
        self.refresh_token
            .clone()
            .or_else(|| self.extract(&REFRESH_TOKEN_RULES))
    }

    /// Browser GUID from the cookie blob, used to tag device info.
    pub fn guid(&self) -> &str {
        GUID_PATTERN
            .as_ref()
            .and_then(|re| re.captures(&self.x_ima_cookie))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(DEFAULT_GUID)
    }

    fn extract(&self, rules: &[ExtractRule]) -> Option<String> {
        rules.iter().find_map(|rule| {
            let haystack = match rule.source {
                CookieSource::Blob => self.x_ima_cookie.as_str(),
                CookieSource::Full => self.cookies.as_deref()?,
            };
            let value = rule.pattern.captures(haystack)?.get(1)?.as_str();
            if rule.percent_decode {
                urlencoding::decode(value).ok().map(|v| v.into_owned())
            } else {
                Some(value.to_string())
            }
        })
    }

    /// Cookie blob with the current token substituted in.
    pub fn cookie_with_token(&self) -> String {
        let Some(token) = &self.token else {
            return self.x_ima_cookie.clone();
        };
        let field = format!("IMA-TOKEN={token}");
        if let Some(re) = TOKEN_FIELD.as_ref()
            && re.is_match(&self.x_ima_cookie)
        {
            re.replace_all(&self.x_ima_cookie, regex::NoExpand(&field))
                .into_owned()
        } else {
            let base = self.x_ima_cookie.trim_end_matches([';', ' ']);
            if base.is_empty() {
                field
            } else {
                format!("{base}; {field}")
            }
        }
    }

    /// Headers for a request to `endpoint`.
    ///
    /// Refresh requests never carry the current token, which may be stale.
    pub fn headers(&self, endpoint: Endpoint) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let (accept, content_type) = match endpoint {
            Endpoint::TokenRefresh | Endpoint::SessionInit => {
                ("application/json", "application/json")
            }
            Endpoint::AskQuestion => ("*/*", "text/event-stream"),
        };

        insert(&mut headers, "accept", accept)?;
        insert(&mut headers, "content-type", content_type)?;
        insert(&mut headers, "accept-language", ACCEPT_LANGUAGE)?;
        insert(&mut headers, "from_browser_ima", "1")?;
        insert(&mut headers, "x-ima-bkn", &self.x_ima_bkn)?;
        insert(&mut headers, "referer", REFERER)?;
        insert(&mut headers, "user-agent", USER_AGENT)?;

        if endpoint == Endpoint::TokenRefresh {
            insert(&mut headers, "x-ima-cookie", &self.x_ima_cookie)?;
        } else {
            insert(&mut headers, "x-ima-cookie", &self.cookie_with_token())?;
            insert(&mut headers, "extension_version", EXTENSION_VERSION)?;
            if let Some(token) = &self.token {
                insert(&mut headers, "authorization", &format!("Bearer {token}"))?;
            }
        }

        if let Some(cookies) = &self.cookies {
            insert(&mut headers, "cookie", cookies)?;
        }

        Ok(headers)
    }
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| ImaError::invalid_argument(format!("header '{name}' has an invalid value")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}
