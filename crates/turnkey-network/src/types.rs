//! Payloads exchanged with the backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend verdict for one card presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub authorized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AccessDecision {
    pub fn granted() -> Self {
        Self {
            authorized: true,
            message: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            authorized: false,
            message: None,
        }
    }
}

/// Progress reported for an update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Archive format of an update package.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArchiveFormat {
    #[default]
    TarGz,
    Zip,
    /// Anything else; rejected at extraction time.
    Other(String),
}

impl ArchiveFormat {
    pub fn extension(&self) -> &str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for ArchiveFormat {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tar.gz" | "tgz" => Self::TarGz,
            "zip" => Self::Zip,
            _ => Self::Other(value),
        }
    }
}

impl From<ArchiveFormat> for String {
    fn from(value: ArchiveFormat) -> Self {
        value.extension().to_string()
    }
}

fn default_requires_restart() -> bool {
    true
}

/// Description of an available update package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    pub id: String,
    pub version: String,
    /// Expected SHA-256 of the package, lowercase hex.
    #[serde(default)]
    pub hash: Option<String>,
    /// Expected package length in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub format: ArchiveFormat,
    #[serde(default = "default_requires_restart")]
    pub requires_restart: bool,
    #[serde(default)]
    pub update_available: bool,
    /// Absolute download location; `/updates/{id}/download` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl UpdateMetadata {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            hash: None,
            size: None,
            format: ArchiveFormat::TarGz,
            requires_restart: true,
            update_available: true,
            download_url: None,
        }
    }
}
