//! Gentoo profile configuration
//!
//! This crate reads the profiles of ebuild repositories and turns a
//! selected profile into the effective configuration a dependency
//! resolver works from.
//!
//! # Overview
//!
//! - [`atom`]: Package atoms used throughout profile files
//! - [`eapi`]: EAPI capabilities that gate optional profile files
//! - [`reader`]: Line oriented access to declaration files
//! - [`bash`]: `make.defaults` assignment parsing
//! - [`repos`]: Repository metadata and repos.conf
//! - [`use_flags`]: USE flag adjustments and chunked USE dictionaries
//! - [`env`]: Incremental environment variables
//! - [`profile`]: Profile nodes, stacks and collapsing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use glep_config::{ProfileManager, RepoSet, CPV};
//! use std::path::Path;
//!
//! let repos = RepoSet::from_repos_conf(Path::new("/etc/portage/repos.conf")).unwrap();
//! let manager = ProfileManager::from_repo_set(repos, "gentoo").unwrap();
//! let stack = manager.resolve("default/linux/amd64/23.0").unwrap();
//!
//! let config = stack.effective_config().unwrap();
//! let pkg = CPV::parse("sys-apps/portage-3.0.63").unwrap();
//! println!("masked: {}", config.is_masked(&pkg));
//! println!("FEATURES: {:?}", config.get_var("FEATURES"));
//! ```

pub mod atom;
pub mod bash;
pub mod eapi;
pub mod env;
pub mod error;
pub mod profile;
pub mod reader;
pub mod repos;
pub mod use_flags;

// Re-exports for convenience
pub use atom::{Atom, UseDep, VersionOp};
pub use bash::parse_bash_assignments;
pub use eapi::{Eapi, EapiOptions};
pub use env::{incremental_expansion, IncrementalEnv, INCREMENTALS, INCREMENTALS_UNFINALIZED};
pub use error::{ConfigError, ResolutionFailure, Result};
pub use profile::{
    Deprecation, Diagnostic, EffectiveConfig, KeywordEntry, KeywordRule, Negations, PackageSet,
    ParentLine, ParentRef, ProfileManager, ProfileNode, ProfilePackages, ProfileStack,
};
pub use reader::{DeclarationLine, DeclarationReader, FsReader};
pub use repos::{parse_repos_conf, RepoConfig, RepoResolver, RepoSet, ReposConf, ReposConfEntry};
pub use use_flags::{split_negations, PackageUseEntry, UseAdjustment, UseChunk, UseDict};
pub use model::{CP, CPV};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Atom, ConfigError, EffectiveConfig, ProfileManager, ProfileStack, RepoConfig, RepoSet,
        Result, UseDict,
    };
}
