use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Auth,
    Network,
    Temporary,
    LoggingService,
    Unknown,
}

const AUTH_MARKERS: &[&str] = &[
    "401",
    "unauthenticated",
    "unauthorized",
    "authentication credential",
    "authentication failed",
    "invalid session key",
    "cookie expired",
    "expired cookie",
    "headers.append",
    "invalid header value",
    "__secure-3papisid",
];

const TEMPORARY_MARKERS: &[&str] = &[
    "503",
    "service unavailable",
    "502",
    "bad gateway",
    "429",
    "too many requests",
    "rate limit",
    "temporarily unavailable",
    "try again",
];

const NETWORK_MARKERS: &[&str] = &[
    "failed to fetch",
    "network",
    "timeout",
    "timed out",
    "econnreset",
    "connection reset",
    "connection refused",
    "enotfound",
    "dns error",
    "connectionerror",
    "error sending request",
];

const LOGGING_SERVICE_MARKERS: &[&str] = &["audioscrobbler", "last.fm", "libre.fm", "scrobble"];

impl FailureKind {
    /// Failed submissions of this kind will fail the same way for every remaining item.
    pub fn is_fatal_for_run(self) -> bool {
        self == FailureKind::Auth
    }

    pub fn deactivation_threshold(self) -> u32 {
        match self {
            FailureKind::Auth => 3,
            FailureKind::Network => 8,
            FailureKind::Temporary => 15,
            FailureKind::LoggingService => 5,
            FailureKind::Unknown => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Auth => "AUTH",
            FailureKind::Network => "NETWORK",
            FailureKind::Temporary => "TEMPORARY",
            FailureKind::LoggingService => "LOGGING_SERVICE",
            FailureKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|marker| message.contains(marker));
    if matches(AUTH_MARKERS) {
        FailureKind::Auth
    } else if matches(TEMPORARY_MARKERS) {
        FailureKind::Temporary
    } else if matches(NETWORK_MARKERS) {
        FailureKind::Network
    } else if matches(LOGGING_SERVICE_MARKERS) {
        FailureKind::LoggingService
    } else {
        FailureKind::Unknown
    }
}

/// Classifies an `anyhow` error by its whole context chain.
pub fn classify_error(err: &anyhow::Error) -> FailureKind {
    classify(&format!("{err:#}"))
}

pub fn should_deactivate(kind: FailureKind, consecutive_failures: u32) -> bool {
    consecutive_failures >= kind.deactivation_threshold()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsecutiveFailureCounter {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub last_kind: Option<FailureKind>,
}

impl ConsecutiveFailureCounter {
    pub fn record_success(&mut self) {
        self.count = 0;
        self.last_kind = None;
    }

    pub fn record_failure(&mut self, kind: FailureKind) -> u32 {
        self.count = self.count.saturating_add(1);
        self.last_kind = Some(kind);
        self.count
    }

    pub fn should_deactivate(&self) -> bool {
        self.last_kind
            .is_some_and(|kind| should_deactivate(kind, self.count))
    }
}
