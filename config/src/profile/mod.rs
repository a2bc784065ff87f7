//! Gentoo profiles
//!
//! A profile is a directory under a repository's `profiles/` holding
//! declaration files and a `parent` file naming the profiles it inherits
//! from. Resolution works in three layers:
//! - [`ProfileNode`]: parses one directory on demand
//! - [`ProfileStack`]: orders a profile and its ancestors, ancestors first
//! - collapsing: folds the stack into an [`EffectiveConfig`]
//!
//! ```no_run
//! use glep_config::{ProfileManager, RepoConfig};
//!
//! let repo = RepoConfig::load("/var/db/repos/gentoo")?;
//! let manager = ProfileManager::new(repo);
//! let stack = manager.resolve("default/linux/amd64/23.0")?;
//! let config = stack.effective_config()?;
//! println!("{} masks", config.masks.len());
//! # Ok::<(), glep_config::ConfigError>(())
//! ```

mod collapse;
mod node;
mod stack;

pub use collapse::{EffectiveConfig, KeywordRule};
pub use node::{
    Deprecation, KeywordEntry, Negations, PackageSet, ParentLine, ParentRef, ProfileNode,
    ProfilePackages,
};
pub use stack::{ProfileManager, ProfileStack};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A declaration line that was skipped because it could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub lineno: usize,
    pub line: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, line {}: {} ({:?})",
            self.path.display(),
            self.lineno,
            self.message,
            self.line
        )
    }
}
