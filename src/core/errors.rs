//! TT-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, TtError>;

/// Top-level error type for the transport tracker.
#[derive(Debug, Error)]
pub enum TtError {
    #[error("[TT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TT-1101] invalid entity id {entity_id:?}: {reason}")]
    InvalidEntityId { entity_id: String, reason: String },

    #[error("[TT-1201] runtime parameter fetch failed: {details}")]
    ParamsFetch { details: String },

    #[error("[TT-2001] invalid location fix: {details}")]
    InvalidFix { details: String },

    #[error("[TT-2002] status index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("[TT-2003] invalid controller state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("[TT-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TT-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[TT-3001] authentication failed for {entity_id}: {details}")]
    AuthFailed { entity_id: String, details: String },

    #[error("[TT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TT-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[TT-3004] remote store failure for {entity_id}: {details}")]
    Remote { entity_id: String, details: String },

    #[error("[TT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl TtError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TT-1001",
            Self::MissingConfig { .. } => "TT-1002",
            Self::ConfigParse { .. } => "TT-1003",
            Self::InvalidEntityId { .. } => "TT-1101",
            Self::ParamsFetch { .. } => "TT-1201",
            Self::InvalidFix { .. } => "TT-2001",
            Self::IndexOutOfBounds { .. } => "TT-2002",
            Self::InvalidState { .. } => "TT-2003",
            Self::Serialization { .. } => "TT-2101",
            Self::Sql { .. } => "TT-2102",
            Self::AuthFailed { .. } => "TT-3001",
            Self::Io { .. } => "TT-3002",
            Self::ChannelClosed { .. } => "TT-3003",
            Self::Remote { .. } => "TT-3004",
            Self::Runtime { .. } => "TT-3900",
        }
    }

    /// Whether retrying (on the next fix cycle) might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Remote { .. }
                | Self::ParamsFetch { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the failure must terminate the tracking session.
    ///
    /// Only authentication failures do; everything else degrades to
    /// best-effort tracking.
    #[must_use]
    pub const fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for remote store failures.
    #[must_use]
    pub fn remote(entity_id: &str, details: impl Into<String>) -> Self {
        Self::Remote {
            entity_id: entity_id.to_string(),
            details: details.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for TtError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for TtError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for TtError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
