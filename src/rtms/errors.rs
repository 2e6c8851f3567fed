//! Typed error taxonomy for the ingestion core.
//!
//! Every RTMS failure carries a stable code, a category that decides
//! retryability, and operator-facing remediation hints.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories; retryability is decided per category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Auth,
    Meeting,
    Stream,
    Permission,
    Network,
    Server,
    Limit,
    Media,
    Protocol,
    Security,
    Connection,
    Request,
    Sdk,
    Config,
    Unknown,
}

impl ErrorCategory {
    /// Retryable failures reconnect with the 3-second debounce; everything
    /// else disables reconnect for the session.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Network
                | ErrorCategory::Server
                | ErrorCategory::Limit
                | ErrorCategory::Connection
                | ErrorCategory::Media
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::Meeting => "meeting",
            ErrorCategory::Stream => "stream",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Network => "network",
            ErrorCategory::Server => "server",
            ErrorCategory::Limit => "limit",
            ErrorCategory::Media => "media",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Security => "security",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Request => "request",
            ErrorCategory::Sdk => "sdk",
            ErrorCategory::Config => "config",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Error envelope surfaced on the session's `error` events
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{code}] {category}: {message}")]
pub struct RtmsError {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub causes: Vec<String>,
    pub fixes: Vec<String>,
    pub docs_url: String,
}

const DOCS_BASE: &str = "https://developers.example.com/docs/rtms/errors";

impl RtmsError {
    pub fn new(code: &str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            category,
            message: message.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
            docs_url: format!("{}#{}", DOCS_BASE, code.to_ascii_lowercase()),
        }
    }

    pub fn with_causes(mut self, causes: &[&str]) -> Self {
        self.causes = causes.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_fixes(mut self, fixes: &[&str]) -> Self {
        self.fixes = fixes.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    /// Maps a vendor handshake `status_code` to the taxonomy.
    ///
    /// Status 0 is success and must not reach this function.
    pub fn from_status_code(status_code: i64, context: &str) -> Self {
        let (code, category, message): (&str, ErrorCategory, String) = match status_code {
            1 | 2 | 18 => (
                "AUTH_REJECTED",
                ErrorCategory::Auth,
                format!("{} rejected the client credentials", context),
            ),
            3 | 4 => (
                "BAD_REQUEST",
                ErrorCategory::Request,
                format!("{} rejected the request as malformed", context),
            ),
            5 | 13 => (
                "MEETING_UNAVAILABLE",
                ErrorCategory::Meeting,
                format!("{} could not find or join the meeting", context),
            ),
            6 | 14 => (
                "STREAM_UNAVAILABLE",
                ErrorCategory::Stream,
                format!("{} could not resolve the stream", context),
            ),
            7 => (
                "PERMISSION_DENIED",
                ErrorCategory::Permission,
                format!("{} denied access for this account", context),
            ),
            8 => (
                "RATE_LIMITED",
                ErrorCategory::Limit,
                format!("{} rate limit exceeded", context),
            ),
            9 => (
                "PROTOCOL_VIOLATION",
                ErrorCategory::Protocol,
                format!("{} reported a protocol violation", context),
            ),
            10 | 11 => (
                "SERVER_ERROR",
                ErrorCategory::Server,
                format!("{} reported an internal error", context),
            ),
            12 => (
                "NETWORK_ERROR",
                ErrorCategory::Network,
                format!("{} reported a network failure", context),
            ),
            15 | 17 => (
                "SIGNATURE_REJECTED",
                ErrorCategory::Security,
                format!("{} rejected the handshake signature", context),
            ),
            16 => (
                "MEDIA_ERROR",
                ErrorCategory::Media,
                format!("{} reported a media-plane failure", context),
            ),
            other => (
                "UNKNOWN_STATUS",
                ErrorCategory::Unknown,
                format!("{} returned unrecognised status {}", context, other),
            ),
        };

        let mut error = RtmsError::new(code, category, message);
        error.causes = default_causes(category);
        error.fixes = default_fixes(category);
        error
    }

    /// Socket-level connection failure (dial, TLS, abrupt close)
    pub fn connection(message: impl Into<String>) -> Self {
        RtmsError::new("CONNECTION_FAILED", ErrorCategory::Connection, message)
            .with_causes(&["media server unreachable", "connection reset by peer"])
            .with_fixes(&["verify outbound connectivity to the media server"])
    }
}

fn default_causes(category: ErrorCategory) -> Vec<String> {
    let causes: &[&str] = match category {
        ErrorCategory::Auth => &["expired or revoked OAuth client", "wrong client id/secret pair"],
        ErrorCategory::Security => &[
            "signature computed with the wrong client secret",
            "stream id or meeting uuid mismatch in the signed payload",
        ],
        ErrorCategory::Meeting => &["meeting already ended", "meeting uuid unknown to the vendor"],
        ErrorCategory::Stream => &["stream expired before the handshake completed"],
        ErrorCategory::Network | ErrorCategory::Connection => {
            &["transient network failure between service and media server"]
        }
        ErrorCategory::Server => &["vendor-side outage"],
        ErrorCategory::Limit => &["too many concurrent streams for this account"],
        ErrorCategory::Media => &["media plane restarted mid-stream"],
        _ => &[],
    };
    causes.iter().map(|c| c.to_string()).collect()
}

fn default_fixes(category: ErrorCategory) -> Vec<String> {
    let fixes: &[&str] = match category {
        ErrorCategory::Auth => &["rotate the OAuth client credentials and update configuration"],
        ErrorCategory::Security => &["confirm the client secret matches the app issuing webhooks"],
        ErrorCategory::Meeting | ErrorCategory::Stream => {
            &["wait for a fresh rtms_started event; stale events cannot be replayed"]
        }
        ErrorCategory::Network | ErrorCategory::Connection | ErrorCategory::Server => {
            &["no action needed; the session retries automatically"]
        }
        ErrorCategory::Limit => &["reduce concurrent stream subscriptions or raise the account limit"],
        _ => &[],
    };
    fixes.iter().map(|f| f.to_string()).collect()
}
