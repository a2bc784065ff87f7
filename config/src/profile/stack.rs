//! Profile linearization

use super::collapse::Collapsed;
use super::node::{normalize, ParentLine, ParentRef, ProfileNode};
use super::Diagnostic;
use crate::reader::{DeclarationReader, FsReader};
use crate::repos::{RepoConfig, RepoResolver, RepoSet};
use crate::{ConfigError, ResolutionFailure, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opens profiles of a repository and resolves them into stacks.
///
/// Parsed nodes are cached by path and shared between the stacks this
/// manager produces.
pub struct ProfileManager {
    repo: Arc<RepoConfig>,
    resolver: Arc<dyn RepoResolver>,
    reader: Arc<dyn DeclarationReader>,
    repos: Mutex<HashMap<String, Arc<RepoConfig>>>,
    nodes: Mutex<HashMap<PathBuf, Arc<ProfileNode>>>,
}

impl ProfileManager {
    /// Manage the profiles of `repo`, reading from the filesystem.
    ///
    /// Only `repo` itself is known for `repo_id:path` parents until
    /// [`ProfileManager::with_resolver`] is used.
    pub fn new(repo: RepoConfig) -> Self {
        let repo = Arc::new(repo);
        let mut repos = HashMap::new();
        repos.insert(repo.repo_id.clone(), repo.clone());
        Self {
            resolver: Arc::new(RepoSet::new().with_repo((*repo).clone())),
            repo,
            reader: Arc::new(FsReader::new()),
            repos: Mutex::new(repos),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Manage the profiles of `repo_id`, resolving other repositories from `set`
    pub fn from_repo_set(set: RepoSet, repo_id: &str) -> Result<Self> {
        let repo = set.get(repo_id).cloned().ok_or_else(|| {
            ConfigError::InvalidRepository(format!("unknown repository {}", repo_id))
        })?;
        Ok(Self::new(repo).with_resolver(set))
    }

    /// Use `resolver` for cross-repository parents
    pub fn with_resolver(mut self, resolver: impl RepoResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Read declaration files through `reader`
    pub fn with_reader(mut self, reader: impl DeclarationReader + 'static) -> Self {
        self.reader = Arc::new(reader);
        self.nodes.lock().clear();
        self
    }

    /// The repository whose profiles are resolved
    pub fn repo(&self) -> &RepoConfig {
        &self.repo
    }

    /// Drop every cached node, e.g. after profile files changed on disk
    pub fn clear_cache(&self) {
        self.nodes.lock().clear();
    }

    /// Open (or fetch from the cache) the profile `name` of `repo`
    pub fn node(&self, repo: &Arc<RepoConfig>, name: &str) -> Result<Arc<ProfileNode>> {
        let path = repo.profiles_dir().join(name);
        if let Some(node) = self.nodes.lock().get(&path) {
            return Ok(node.clone());
        }

        let node = Arc::new(ProfileNode::new(repo.clone(), name, self.reader.clone())?);
        // A racing thread may have inserted first; keep its node
        let mut nodes = self.nodes.lock();
        Ok(nodes.entry(path).or_insert(node).clone())
    }

    fn lookup_repo(&self, repo_id: &str) -> Option<Arc<RepoConfig>> {
        let mut repos = self.repos.lock();
        if let Some(repo) = repos.get(repo_id) {
            return Some(repo.clone());
        }
        let repo = Arc::new(self.resolver.repository(repo_id)?.clone());
        repos.insert(repo_id.to_string(), repo.clone());
        Some(repo)
    }

    /// Resolve `name` and all of its ancestors into a stack
    pub fn resolve(&self, name: &str) -> Result<ProfileStack> {
        let name = name.trim_matches('/');
        info!("Resolving profile {}::{}", self.repo.repo_id, name);

        let terminal = self.node(&self.repo, name)?;
        let mut walk = Walk::default();
        self.visit(terminal, &mut walk)?;

        let nodes = walk.nodes;
        if let Some((_, ancestors)) = nodes.split_last() {
            for ancestor in ancestors {
                if ancestor.deprecated()?.is_some() {
                    return Err(ConfigError::ProfileResolution {
                        profile: name.to_string(),
                        reason: ResolutionFailure::DeprecatedParent {
                            parent: ancestor.to_string(),
                        },
                    });
                }
            }
        }

        let stack = ProfileStack {
            name: name.to_string(),
            nodes,
            collapsed: Collapsed::default(),
        };
        if let Some(deprecation) = stack.deprecation()? {
            warn!(
                "Profile {} is deprecated, switch to {}: {}",
                name, deprecation.replacement, deprecation.message
            );
        }
        debug!(
            "Profile {} resolved to {:?}",
            name,
            stack.nodes.iter().map(|n| n.name()).collect::<Vec<_>>()
        );
        Ok(stack)
    }

    fn visit(&self, node: Arc<ProfileNode>, walk: &mut Walk) -> Result<()> {
        if walk.in_progress.iter().any(|n| n.path() == node.path()) {
            let mut chain: Vec<String> = walk.in_progress.iter().map(|n| n.to_string()).collect();
            chain.push(node.to_string());
            return Err(ConfigError::ProfileResolution {
                profile: node.to_string(),
                reason: ResolutionFailure::Cycle(chain),
            });
        }
        if !walk.seen.insert(node.path().to_path_buf()) {
            return Ok(());
        }

        let parents = node
            .parent_paths()
            .map_err(|e| ConfigError::ProfileResolution {
                profile: node.to_string(),
                reason: ResolutionFailure::Parent(Box::new(e)),
            })?
            .to_vec();

        walk.in_progress.push(node.clone());
        for parent in &parents {
            let parent_node = self.parent_node(&node, parent)?;
            self.visit(parent_node, walk)?;
        }
        walk.in_progress.pop();

        walk.nodes.push(node);
        Ok(())
    }

    fn parent_node(&self, child: &ProfileNode, parent: &ParentLine) -> Result<Arc<ProfileNode>> {
        let fail = |reason: ResolutionFailure| ConfigError::ProfileResolution {
            profile: child.to_string(),
            reason,
        };

        let (repo, name) = match &parent.target {
            ParentRef::Local(path) => {
                let repo = self
                    .lookup_repo(&child.repo().repo_id)
                    .unwrap_or_else(|| self.repo.clone());
                let name = relative_name(&normalize(&repo.profiles_dir()), path).ok_or_else(|| {
                    fail(ResolutionFailure::EscapingPath {
                        line: parent.line.clone(),
                        lineno: parent.lineno,
                    })
                })?;
                (repo, name)
            }
            ParentRef::Repo { repo_id, path } => {
                let repo = self.lookup_repo(repo_id).ok_or_else(|| {
                    fail(ResolutionFailure::UnknownRepository {
                        repo_id: repo_id.clone(),
                        line: parent.line.clone(),
                        lineno: parent.lineno,
                    })
                })?;
                (repo, path.clone())
            }
        };

        if name.is_empty() || !self.reader.is_dir(&repo.profiles_dir().join(&name)) {
            return Err(fail(ResolutionFailure::MissingParent {
                line: parent.line.clone(),
                lineno: parent.lineno,
            }));
        }

        self.node(&repo, &name)
            .map_err(|e| fail(ResolutionFailure::Parent(Box::new(e))))
    }
}

#[derive(Default)]
struct Walk {
    in_progress: Vec<Arc<ProfileNode>>,
    seen: HashSet<PathBuf>,
    nodes: Vec<Arc<ProfileNode>>,
}

/// `path` relative to `base` with `/` separators, `None` if outside `base`
fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// A profile and its ancestors, most distant ancestor first
pub struct ProfileStack {
    name: String,
    nodes: Vec<Arc<ProfileNode>>,
    pub(super) collapsed: Collapsed,
}

impl std::fmt::Debug for ProfileStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileStack")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .finish()
    }
}

impl ProfileStack {
    /// Name of the requested profile
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All nodes, ancestors first, ending with the requested profile
    pub fn nodes(&self) -> &[Arc<ProfileNode>] {
        &self.nodes
    }

    /// The requested profile
    pub fn node(&self) -> &ProfileNode {
        // A stack always contains at least the requested node
        &self.nodes[self.nodes.len() - 1]
    }

    /// EAPI of the requested profile
    pub fn eapi(&self) -> Result<&'static crate::Eapi> {
        self.node().eapi()
    }

    /// Skipped declaration lines of every node parsed so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.nodes.iter().flat_map(|n| n.diagnostics()).collect()
    }

    /// Re-read the declaration files of every node and drop every collapsed
    /// value, e.g. after the profiles changed on disk.
    ///
    /// The node sequence itself is kept; resolve again to pick up changed
    /// `parent` files. Nodes cached by the [`ProfileManager`] are not touched.
    pub fn invalidate(&mut self) -> Result<()> {
        let nodes = self
            .nodes
            .iter()
            .map(|n| n.reload().map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        self.nodes = nodes;
        self.collapsed = Collapsed::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn names(stack: &ProfileStack) -> Vec<&str> {
        stack.nodes().iter().map(|n| n.name()).collect()
    }

    #[test]
    fn test_diamond_keeps_first_occurrence() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/base/eapi", "5\n");
        write(dir.path(), "profiles/left/parent", "../base\n");
        write(dir.path(), "profiles/right/parent", "../base\n");
        write(dir.path(), "profiles/top/parent", "../left\n../right\n");

        let manager = ProfileManager::new(RepoConfig::new("test", dir.path()));
        let stack = manager.resolve("top").unwrap();
        assert_eq!(names(&stack), vec!["base", "left", "right", "top"]);
        assert_eq!(stack.node().name(), "top");
        assert_eq!(stack.eapi().unwrap().id, "0");
    }

    #[test]
    fn test_nodes_are_shared_between_stacks() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/base/make.defaults", "ARCH=amd64\n");
        write(dir.path(), "profiles/a/parent", "../base\n");
        write(dir.path(), "profiles/b/parent", "../base\n");

        let manager = ProfileManager::new(RepoConfig::new("test", dir.path()));
        let a = manager.resolve("a").unwrap();
        let b = manager.resolve("b").unwrap();
        assert!(Arc::ptr_eq(&a.nodes()[0], &b.nodes()[0]));
    }

    #[test]
    fn test_missing_parent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/a/parent", "../gone\n");

        let manager = ProfileManager::new(RepoConfig::new("test", dir.path()));
        assert_matches!(
            manager.resolve("a"),
            Err(ConfigError::ProfileResolution {
                reason: ResolutionFailure::MissingParent { lineno: 1, .. },
                ..
            })
        );
    }

    #[test]
    fn test_escaping_parent() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("outside")).unwrap();
        write(dir.path(), "profiles/a/parent", "../../outside\n");

        let manager = ProfileManager::new(RepoConfig::new("test", dir.path()));
        assert_matches!(
            manager.resolve("a"),
            Err(ConfigError::ProfileResolution {
                reason: ResolutionFailure::EscapingPath { .. },
                ..
            })
        );
    }

    #[test]
    fn test_unknown_repository() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/a/parent", "gentoo:base\n");

        let repo = RepoConfig::new("test", dir.path()).with_profile_formats(["portage-2"]);
        let manager = ProfileManager::new(repo);
        assert_matches!(
            manager.resolve("a"),
            Err(ConfigError::ProfileResolution {
                reason: ResolutionFailure::UnknownRepository { repo_id, .. },
                ..
            }) if repo_id == "gentoo"
        );
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/a/parent", ".\n");

        let manager = ProfileManager::new(RepoConfig::new("test", dir.path()));
        assert_matches!(
            manager.resolve("a"),
            Err(ConfigError::ProfileResolution {
                reason: ResolutionFailure::Cycle(_),
                ..
            })
        );
    }

    #[test]
    fn test_missing_profile() {
        let dir = TempDir::new().unwrap();
        let manager = ProfileManager::new(RepoConfig::new("test", dir.path()));
        assert_matches!(manager.resolve("nope"), Err(ConfigError::ProfileNotFound(_)));
    }
}
