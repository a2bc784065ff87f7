//! Gentoo profile resolution
//!
//! Re-exports the identifier crate ([`model`]) and the profile crate
//! ([`config`]), plus shortcuts for the common case of resolving one
//! profile of an installed repository.

pub use config;
pub use model;

use config::{ProfileManager, ProfileStack, RepoConfig, RepoSet, Result};
use std::path::Path;
use tracing::info;

/// Resolve `profile` of the repository checked out at `location`.
///
/// Only that repository is known, so `repo_id:path` parents naming
/// another repository fail to resolve.
pub fn resolve_profile(location: &Path, profile: &str) -> Result<ProfileStack> {
    let repo = RepoConfig::load(location)?;
    info!("Loaded repository {} from {}", repo.repo_id, location.display());
    ProfileManager::new(repo).resolve(profile)
}

/// Resolve `profile` of `repo_id` with every repository listed in
/// `repos_conf` available to cross-repository parents
pub fn resolve_configured_profile(
    repos_conf: &Path,
    repo_id: &str,
    profile: &str,
) -> Result<ProfileStack> {
    let repos = RepoSet::from_repos_conf(repos_conf)?;
    ProfileManager::from_repo_set(repos, repo_id)?.resolve(profile)
}

pub mod prelude {
    pub use crate::{resolve_configured_profile, resolve_profile};
    pub use config::prelude::*;
    pub use model::{CP, CPV};
}
