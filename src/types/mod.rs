//! Pod Security levels and policy versions.
//!
//! [`SecurityLevel`] is totally ordered by how much privilege it grants:
//! `restricted < baseline < privileged < unknown`. The `unknown` variant is
//! an error sentinel and never parses from a label.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Namespace label selecting the enforced Pod Security level.
pub const ENFORCE_LEVEL_LABEL: &str = "pod-security.kubernetes.io/enforce";
/// Namespace label selecting the enforced policy version.
pub const ENFORCE_VERSION_LABEL: &str = "pod-security.kubernetes.io/enforce-version";
/// Namespace label selecting the audited Pod Security level.
pub const AUDIT_LEVEL_LABEL: &str = "pod-security.kubernetes.io/audit";
/// Namespace label selecting the audited policy version.
pub const AUDIT_VERSION_LABEL: &str = "pod-security.kubernetes.io/audit-version";
/// Namespace label selecting the warned Pod Security level.
pub const WARN_LEVEL_LABEL: &str = "pod-security.kubernetes.io/warn";
/// Namespace label selecting the warned policy version.
pub const WARN_VERSION_LABEL: &str = "pod-security.kubernetes.io/warn-version";

/// Minor version of the newest policy release the checks are written against.
pub const LATEST_MINOR: u32 = 32;

/// Pod Security level, ordered from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Heavily restricted, current pod hardening best practices.
    Restricted,
    /// Minimally restrictive, prevents known privilege escalations.
    Baseline,
    /// Unrestricted.
    Privileged,
    /// Evaluation could not determine a level.
    Unknown,
}

impl SecurityLevel {
    /// The three real levels in increasing privilege order.
    pub const ALL: [SecurityLevel; 3] = [Self::Restricted, Self::Baseline, Self::Privileged];

    /// Label value for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restricted => "restricted",
            Self::Baseline => "baseline",
            Self::Privileged => "privileged",
            Self::Unknown => "unknown",
        }
    }

    /// Returns the more permissive of two levels.
    pub fn least_restrictive(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from parsing levels and versions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Not one of `restricted`, `baseline`, `privileged`.
    #[error("invalid pod security level {0:?}, expected restricted, baseline or privileged")]
    Level(String),
    /// Not `latest` or `v<major>.<minor>`.
    #[error("invalid pod security version {0:?}, expected \"latest\" or \"v1.<minor>\"")]
    Version(String),
}

impl FromStr for SecurityLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restricted" => Ok(Self::Restricted),
            "baseline" => Ok(Self::Baseline),
            "privileged" => Ok(Self::Privileged),
            other => Err(ParseError::Level(other.to_owned())),
        }
    }
}

/// Policy version a level is evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolicyVersion {
    /// Newest available checks.
    #[default]
    Latest,
    /// A pinned Kubernetes minor release.
    Pinned {
        /// Major version, always 1 for supported policies.
        major: u32,
        /// Minor version.
        minor: u32,
    },
}

impl PolicyVersion {
    /// Whether checks exist for this version.
    ///
    /// Pod Security policies are published for `v1.0` up to the latest release.
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Latest => true,
            Self::Pinned { major, minor } => *major == 1 && *minor <= LATEST_MINOR,
        }
    }
}

impl FromStr for PolicyVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "latest" {
            return Ok(Self::Latest);
        }
        let invalid = || ParseError::Version(s.to_owned());
        let rest = s.strip_prefix('v').ok_or_else(invalid)?;
        let (major, minor) = rest.split_once('.').ok_or_else(invalid)?;
        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self::Pinned { major, minor })
    }
}

impl fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Pinned { major, minor } => write!(f, "v{major}.{minor}"),
        }
    }
}

impl Serialize for PolicyVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PolicyVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A level evaluated at a specific policy version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelVersion {
    /// Level to evaluate against.
    pub level: SecurityLevel,
    /// Policy version of the checks.
    pub version: PolicyVersion,
}

impl LevelVersion {
    /// Pair a level with a version.
    pub fn new(level: SecurityLevel, version: PolicyVersion) -> Self {
        Self { level, version }
    }
}

impl fmt::Display for LevelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.level, self.version)
    }
}
