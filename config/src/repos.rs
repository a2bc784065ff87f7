//! Repository metadata and lookup
//!
//! Profiles live inside ebuild repositories. What the profile code needs
//! from a repository is read from its metadata files:
//! - `profiles/repo_name`: the repository id
//! - `metadata/layout.conf`: `profile-formats`, `masters`, `repo-name`
//! - `profiles/arch.list`: known architectures
//!
//! `repos.conf` maps repository ids to locations.

use crate::reader::{DeclarationReader, FsReader};
use crate::{ConfigError, Result};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Profile format that enables `repo_id:path` parent references
pub const FORMAT_PORTAGE_2: &str = "portage-2";
/// Profile format that enables profile-set entries in `packages`
pub const FORMAT_PROFILE_SET: &str = "profile-set";
/// Profile format assumed when layout.conf declares none
pub const FORMAT_PMS: &str = "pms";

/// Profile-relevant settings of one ebuild repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository id (e.g. "gentoo")
    pub repo_id: String,
    /// Repository root
    pub location: PathBuf,
    /// Declared profile formats
    pub profile_formats: IndexSet<String>,
    /// Architectures from `profiles/arch.list`
    pub known_arches: IndexSet<String>,
    /// Master repositories
    pub masters: Vec<String>,
    /// Priority from repos.conf
    pub priority: i32,
}

impl RepoConfig {
    /// Create a repository description with PMS profile format
    pub fn new(repo_id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            repo_id: repo_id.into(),
            location: location.into(),
            profile_formats: IndexSet::from([FORMAT_PMS.to_string()]),
            known_arches: IndexSet::new(),
            masters: Vec::new(),
            priority: 0,
        }
    }

    /// Replace the declared profile formats
    pub fn with_profile_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profile_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the known architectures
    pub fn with_arches<I, S>(mut self, arches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_arches = arches.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the master repositories
    pub fn with_masters<I, S>(mut self, masters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.masters = masters.into_iter().map(Into::into).collect();
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Read repository metadata from disk
    pub fn load(location: impl Into<PathBuf>) -> Result<Self> {
        let location = location.into();
        let reader = FsReader::new();

        if !location.is_dir() {
            return Err(ConfigError::InvalidRepository(format!(
                "{} is not a directory",
                location.display()
            )));
        }

        let layout = match reader.read_lines(&location.join("metadata/layout.conf"))? {
            Some(lines) => parse_key_values(lines.iter().map(|l| l.content.as_str())),
            None => IndexMap::new(),
        };

        let repo_name = reader
            .read_lines(&location.join("profiles/repo_name"))?
            .and_then(|lines| lines.into_iter().next())
            .map(|l| l.content);
        let repo_id = match (repo_name, layout.get("repo-name")) {
            (Some(name), _) => name,
            (None, Some(name)) => name.clone(),
            (None, None) => {
                return Err(ConfigError::InvalidRepository(format!(
                    "{} has no profiles/repo_name",
                    location.display()
                )))
            }
        };

        let mut repo = RepoConfig::new(repo_id, location.clone());
        if let Some(formats) = layout.get("profile-formats") {
            repo = repo.with_profile_formats(formats.split_whitespace());
        }
        if let Some(masters) = layout.get("masters") {
            repo = repo.with_masters(masters.split_whitespace());
        }
        if let Some(lines) = reader.read_lines(&location.join("profiles/arch.list"))? {
            repo = repo.with_arches(lines.into_iter().map(|l| l.content));
        }

        debug!(
            "Loaded repository {} from {:?} (profile-formats: {:?})",
            repo.repo_id, repo.location, repo.profile_formats
        );
        Ok(repo)
    }

    /// The `profiles/` directory of this repository
    pub fn profiles_dir(&self) -> PathBuf {
        self.location.join("profiles")
    }

    /// Check whether layout.conf declares a profile format
    pub fn has_profile_format(&self, format: &str) -> bool {
        self.profile_formats.contains(format)
    }
}

/// Lookup of repositories by id, used for cross-repository parents
pub trait RepoResolver: Send + Sync {
    fn repository(&self, repo_id: &str) -> Option<&RepoConfig>;
}

impl RepoResolver for RepoConfig {
    fn repository(&self, repo_id: &str) -> Option<&RepoConfig> {
        (self.repo_id == repo_id).then_some(self)
    }
}

/// A set of known repositories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoSet {
    repos: IndexMap<String, RepoConfig>,
    main_repo: Option<String>,
}

impl RepoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a repository, replacing one with the same id
    pub fn add(&mut self, repo: RepoConfig) {
        self.repos.insert(repo.repo_id.clone(), repo);
    }

    /// Builder form of [`RepoSet::add`]
    pub fn with_repo(mut self, repo: RepoConfig) -> Self {
        self.add(repo);
        self
    }

    pub fn get(&self, repo_id: &str) -> Option<&RepoConfig> {
        self.repos.get(repo_id)
    }

    /// Repositories, highest priority first
    pub fn by_priority(&self) -> Vec<&RepoConfig> {
        let mut repos: Vec<&RepoConfig> = self.repos.values().collect();
        repos.sort_by_key(|r| std::cmp::Reverse(r.priority));
        repos
    }

    /// The main repository from repos.conf, or the highest priority one
    pub fn main_repo(&self) -> Option<&RepoConfig> {
        match &self.main_repo {
            Some(name) => self.repos.get(name),
            None => self.by_priority().first().copied(),
        }
    }

    /// Load every repository listed in a repos.conf file or directory
    pub fn from_repos_conf(path: &Path) -> Result<Self> {
        let conf = parse_repos_conf(path)?;
        let mut set = RepoSet {
            repos: IndexMap::new(),
            main_repo: conf.main_repo,
        };

        for (section, entry) in conf.repos {
            let location = entry.location.ok_or_else(|| {
                ConfigError::InvalidRepository(format!("[{}] has no location", section))
            })?;
            let repo = RepoConfig::load(location)?.with_priority(entry.priority);
            if repo.repo_id != section {
                warn!(
                    "repos.conf section [{}] points at repository {}",
                    section, repo.repo_id
                );
            }
            set.add(repo);
        }

        Ok(set)
    }
}

impl RepoResolver for RepoSet {
    fn repository(&self, repo_id: &str) -> Option<&RepoConfig> {
        self.get(repo_id)
    }
}

/// Parsed repos.conf
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReposConf {
    /// `main-repo` from the DEFAULT section
    pub main_repo: Option<String>,
    /// Repository sections in file order
    pub repos: IndexMap<String, ReposConfEntry>,
}

/// One repository section of repos.conf
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReposConfEntry {
    pub location: Option<PathBuf>,
    pub priority: i32,
}

/// Parse a repos.conf file, or every non-hidden file of a repos.conf
/// directory in name order
pub fn parse_repos_conf(path: &Path) -> Result<ReposConf> {
    let lines = FsReader::new().read_lines(path)?.ok_or_else(|| {
        ConfigError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound))
    })?;

    let mut conf = ReposConf::default();
    let mut start = 0;
    // Sections never continue into the next file
    while start < lines.len() {
        let file = &lines[start].path;
        let end = lines[start..]
            .iter()
            .position(|l| &l.path != file)
            .map_or(lines.len(), |n| start + n);
        parse_repos_conf_lines(lines[start..end].iter().map(|l| l.content.as_str()), &mut conf)?;
        start = end;
    }

    Ok(conf)
}

/// Parse the lines of one repos.conf file (INI-like format)
fn parse_repos_conf_lines<'a>(
    lines: impl Iterator<Item = &'a str>,
    conf: &mut ReposConf,
) -> Result<()> {
    let mut current_section: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    for line in lines {
        let line = line.trim();

        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Section header
        if line.starts_with('[') && line.ends_with(']') {
            if let Some(section) = current_section.take() {
                save_section(&section, parse_key_values(current_lines.drain(..)), conf)?;
            }
            current_section = Some(line[1..line.len() - 1].trim().to_string());
            continue;
        }

        if current_section.is_none() {
            return Err(ConfigError::InvalidRepository(format!(
                "entry outside of any section: {}",
                line
            )));
        }
        current_lines.push(line);
    }

    // Save last section
    if let Some(section) = current_section {
        save_section(&section, parse_key_values(current_lines.drain(..)), conf)?;
    }

    Ok(())
}

fn save_section(
    section: &str,
    values: IndexMap<String, String>,
    conf: &mut ReposConf,
) -> Result<()> {
    if section == "DEFAULT" {
        if let Some(v) = values.get("main-repo") {
            conf.main_repo = Some(v.clone());
        }
        return Ok(());
    }

    // Later files override earlier ones key by key
    let entry = conf.repos.entry(section.to_string()).or_default();
    if let Some(v) = values.get("location") {
        entry.location = Some(PathBuf::from(v));
    }
    if let Some(v) = values.get("priority") {
        entry.priority = v.parse().map_err(|_| {
            ConfigError::InvalidRepository(format!(
                "[{}] priority {:?} is not a number",
                section, v
            ))
        })?;
    }

    Ok(())
}

/// `key = value` lines; lines without `=` are ignored
fn parse_key_values<'a>(lines: impl Iterator<Item = &'a str>) -> IndexMap<String, String> {
    lines
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_repository_metadata() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "profiles/repo_name", "gentoo\n");
        write(
            dir.path(),
            "metadata/layout.conf",
            "# layout\nmasters =\nprofile-formats = portage-2 profile-set\n",
        );
        write(dir.path(), "profiles/arch.list", "amd64\narm64\n# prefix\nx64-macos\n");

        let repo = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(repo.repo_id, "gentoo");
        assert!(repo.has_profile_format(FORMAT_PORTAGE_2));
        assert!(repo.has_profile_format(FORMAT_PROFILE_SET));
        assert!(!repo.has_profile_format(FORMAT_PMS));
        assert_eq!(
            repo.known_arches.iter().collect::<Vec<_>>(),
            vec!["amd64", "arm64", "x64-macos"]
        );
        assert!(repo.masters.is_empty());
        assert_eq!(repo.profiles_dir(), dir.path().join("profiles"));
    }

    #[test]
    fn test_load_defaults_to_pms() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "metadata/layout.conf", "repo-name = overlay\nmasters = gentoo\n");

        let repo = RepoConfig::load(dir.path()).unwrap();
        assert_eq!(repo.repo_id, "overlay");
        assert!(repo.has_profile_format(FORMAT_PMS));
        assert_eq!(repo.masters, vec!["gentoo".to_string()]);
    }

    #[test]
    fn test_load_without_name_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RepoConfig::load(dir.path()),
            Err(ConfigError::InvalidRepository(_))
        ));
    }

    #[test]
    fn test_parse_repos_conf() {
        let content = r#"
[DEFAULT]
main-repo = gentoo

[gentoo]
location = /var/db/repos/gentoo
sync-type = rsync
sync-uri = rsync://rsync.gentoo.org/gentoo-portage
priority = 100

[custom]
location = /var/db/repos/custom
priority = -50
"#;

        let mut conf = ReposConf::default();
        parse_repos_conf_lines(content.lines(), &mut conf).unwrap();

        assert_eq!(conf.main_repo, Some("gentoo".to_string()));
        assert_eq!(conf.repos.keys().collect::<Vec<_>>(), vec!["gentoo", "custom"]);
        assert_eq!(conf.repos["custom"].priority, -50);
        assert_eq!(
            conf.repos["gentoo"].location,
            Some(PathBuf::from("/var/db/repos/gentoo"))
        );
    }

    #[test]
    fn test_repo_set_from_repos_conf() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("main");
        let overlay = dir.path().join("overlay");
        write(&main, "profiles/repo_name", "main\n");
        write(&overlay, "profiles/repo_name", "overlay\n");
        write(
            dir.path(),
            "repos.conf/10-main.conf",
            &format!("[main]\nlocation = {}\npriority = 10\n", main.display()),
        );
        write(
            dir.path(),
            "repos.conf/20-overlay.conf",
            &format!("[overlay]\nlocation = {}\npriority = 50\n", overlay.display()),
        );

        let set = RepoSet::from_repos_conf(&dir.path().join("repos.conf")).unwrap();
        assert_eq!(set.repository("main").map(|r| r.priority), Some(10));
        assert_eq!(set.main_repo().map(|r| r.repo_id.as_str()), Some("overlay"));
        assert!(set.repository("gentoo").is_none());
    }

    #[test]
    fn test_repos_conf_directory_files() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "repos.conf/a.conf", "[DEFAULT]\nmain-repo = b # trailing\n");
        write(dir.path(), "repos.conf/b", "[b]\nlocation = /var/db/repos/b\n");
        write(dir.path(), "repos.conf/.hidden.conf", "[hidden]\nlocation = /nowhere\n");
        write(dir.path(), "repos.conf/b~", "[backup]\nlocation = /nowhere\n");

        let conf = parse_repos_conf(&dir.path().join("repos.conf")).unwrap();
        assert_eq!(conf.main_repo.as_deref(), Some("b"));
        assert_eq!(conf.repos.keys().collect::<Vec<_>>(), vec!["b"]);

        // A section header in one file does not cover the next one
        write(dir.path(), "repos.conf/c.conf", "location = /var/db/repos/c\n");
        assert!(matches!(
            parse_repos_conf(&dir.path().join("repos.conf")),
            Err(ConfigError::InvalidRepository(_))
        ));
        assert!(matches!(
            parse_repos_conf(&dir.path().join("missing.conf")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_single_repo_resolver() {
        let repo = RepoConfig::new("gentoo", "/var/db/repos/gentoo");
        assert!(repo.repository("gentoo").is_some());
        assert!(repo.repository("other").is_none());
    }
}
