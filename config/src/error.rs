//! Error types for profile and repository configuration

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Identifier(#[from] model::Error),

    #[error("Invalid package atom: {0}")]
    InvalidAtom(String),

    #[error("Invalid USE flag: {0}")]
    InvalidUseFlag(String),

    #[error("Profile not found: {}", .0.display())]
    ProfileNotFound(PathBuf),

    #[error("{}", format_parse_error(.path, .lineno, .line, .reason))]
    ProfileParse {
        path: PathBuf,
        lineno: Option<usize>,
        line: Option<String>,
        reason: String,
    },

    #[error("Failed resolving profile {profile}: {reason}")]
    ProfileResolution {
        profile: String,
        #[source]
        reason: ResolutionFailure,
    },

    #[error("{}: unsupported EAPI {eapi:?}", .path.display())]
    UnsupportedEapi { path: PathBuf, eapi: String },

    #[error("Shell syntax error on line {lineno}: {reason}")]
    ShellSyntax { lineno: usize, reason: String },

    #[error("Invalid repository configuration: {0}")]
    InvalidRepository(String),
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Why a profile stack could not be built
#[derive(Error, Debug)]
pub enum ResolutionFailure {
    /// The profile is reachable as its own ancestor
    #[error("cyclic parent chain: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A `repo_id:path` parent names a repository nobody knows about
    #[error("parent line {lineno} ({line:?}) references unknown repository {repo_id:?}")]
    UnknownRepository { repo_id: String, line: String, lineno: usize },

    /// A parent reference points at a directory that does not exist
    #[error("parent line {lineno} ({line:?}) does not exist")]
    MissingParent { line: String, lineno: usize },

    /// A parent reference climbs out of the profiles directory
    #[error("parent line {lineno} ({line:?}) escapes the profiles directory")]
    EscapingPath { line: String, lineno: usize },

    /// A deprecated profile is used as a parent
    #[error("parent profile {parent} is deprecated")]
    DeprecatedParent { parent: String },

    /// A parent profile failed to parse
    #[error(transparent)]
    Parent(Box<ConfigError>),
}

fn format_parse_error(
    path: &std::path::Path,
    lineno: &Option<usize>,
    line: &Option<String>,
    reason: &str,
) -> String {
    match (lineno, line) {
        (Some(n), Some(l)) => format!("{}, line {}: {:?}: {}", path.display(), n, l, reason),
        (Some(n), None) => format!("{}, line {}: {}", path.display(), n, reason),
        _ => format!("{}: {}", path.display(), reason),
    }
}

impl ConfigError {
    /// Build a parse error for one declaration line
    pub fn parse_line(
        path: impl Into<PathBuf>,
        lineno: usize,
        line: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::ProfileParse {
            path: path.into(),
            lineno: Some(lineno),
            line: Some(line.into()),
            reason: reason.into(),
        }
    }

    /// Build a parse error that concerns a whole file
    pub fn parse_file(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ConfigError::ProfileParse {
            path: path.into(),
            lineno: None,
            line: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }
}
