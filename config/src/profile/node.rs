//! A single profile directory
//!
//! [`ProfileNode`] parses the declaration files of one directory under
//! `profiles/` without looking at its parents. Every attribute is parsed
//! on first access and cached for the lifetime of the node.

use super::Diagnostic;
use crate::atom::Atom;
use crate::bash::parse_bash_assignments;
use crate::eapi::{Eapi, EapiOptions};
use crate::reader::{DeclarationLine, DeclarationReader};
use crate::repos::{RepoConfig, FORMAT_PORTAGE_2, FORMAT_PROFILE_SET};
use crate::use_flags::{PackageUseEntry, UseAdjustment, UseDict};
use crate::{ConfigError, Result};
use indexmap::{IndexMap, IndexSet};
use model::{CP, CPV};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error};

/// A parent reference from a `parent` file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParentRef {
    /// Path in the same repository, already resolved against the node
    Local(PathBuf),
    /// `repo_id:path`, relative to the named repository's `profiles/`
    Repo { repo_id: String, path: String },
}

/// One line of a `parent` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLine {
    pub target: ParentRef,
    pub line: String,
    pub lineno: usize,
}

/// Atoms split by a leading `-`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negations<T> {
    pub negated: Vec<T>,
    pub positive: Vec<T>,
}

impl<T> Default for Negations<T> {
    fn default() -> Self {
        Self {
            negated: Vec::new(),
            positive: Vec::new(),
        }
    }
}

impl<T> Negations<T> {
    pub fn is_empty(&self) -> bool {
        self.negated.is_empty() && self.positive.is_empty()
    }
}

/// A set of atoms with negation and full reset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSet {
    pub negated: Vec<Atom>,
    pub positive: Vec<Atom>,
    /// `-*` was given: drop everything inherited first
    pub reset: bool,
}

/// Parsed `packages` file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePackages {
    /// Entries prefixed with `*`
    pub system: PackageSet,
    /// Bare entries, only with the `profile-set` profile format
    pub profile: PackageSet,
}

/// A `package.keywords` / `package.accept_keywords` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub atom: Atom,
    pub keywords: Vec<String>,
}

/// Contents of a `deprecated` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    /// Profile to switch to
    pub replacement: String,
    pub message: String,
}

type PackageUseMap = IndexMap<CP, Vec<PackageUseEntry>>;

/// EAPI capability a property file depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Always,
    StableUse,
    PkgProvided,
}

impl Gate {
    fn is_open(self, options: &EapiOptions) -> bool {
        match self {
            Gate::Always => true,
            Gate::StableUse => options.profile_stable_use,
            Gate::PkgProvided => options.profile_pkg_provided,
        }
    }
}

#[derive(Default)]
struct NodeAttrs {
    eapi: OnceCell<&'static Eapi>,
    parent_paths: OnceCell<Vec<ParentLine>>,
    packages: OnceCell<ProfilePackages>,
    masks: OnceCell<Negations<Atom>>,
    unmasks: OnceCell<Negations<Atom>>,
    pkg_deprecated: OnceCell<Negations<Atom>>,
    keywords: OnceCell<Negations<KeywordEntry>>,
    accept_keywords: OnceCell<Negations<KeywordEntry>>,
    pkg_provided: OnceCell<Vec<CPV>>,
    pkg_use: OnceCell<PackageUseMap>,
    pkg_use_force: OnceCell<PackageUseMap>,
    pkg_use_mask: OnceCell<PackageUseMap>,
    pkg_use_stable_force: OnceCell<PackageUseMap>,
    pkg_use_stable_mask: OnceCell<PackageUseMap>,
    use_force: OnceCell<UseAdjustment>,
    use_mask: OnceCell<UseAdjustment>,
    use_stable_force: OnceCell<UseAdjustment>,
    use_stable_mask: OnceCell<UseAdjustment>,
    forced_use: OnceCell<UseDict>,
    masked_use: OnceCell<UseDict>,
    stable_forced_use: OnceCell<UseDict>,
    stable_masked_use: OnceCell<UseDict>,
    make_defaults_text: OnceCell<Option<String>>,
    make_defaults: OnceCell<IndexMap<String, String>>,
    deprecated: OnceCell<Option<Deprecation>>,
    bashrc: OnceCell<Option<PathBuf>>,
}

/// One profile directory
pub struct ProfileNode {
    repo: Arc<RepoConfig>,
    name: String,
    path: PathBuf,
    reader: Arc<dyn DeclarationReader>,
    attrs: NodeAttrs,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl fmt::Debug for ProfileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileNode")
            .field("repo", &self.repo.repo_id)
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for ProfileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.repo.repo_id, self.name)
    }
}

impl ProfileNode {
    /// Open the profile `name` (relative to `profiles/`) of `repo`
    pub fn new(
        repo: Arc<RepoConfig>,
        name: impl Into<String>,
        reader: Arc<dyn DeclarationReader>,
    ) -> Result<Self> {
        let name = name.into();
        let path = repo.profiles_dir().join(&name);
        if !reader.is_dir(&path) {
            return Err(ConfigError::ProfileNotFound(path));
        }

        debug!("Opened profile {}::{}", repo.repo_id, name);
        Ok(Self {
            repo,
            name,
            path,
            reader,
            attrs: NodeAttrs::default(),
            diagnostics: Mutex::new(Vec::new()),
        })
    }

    /// A fresh node for the same directory, with nothing parsed yet
    pub fn reload(&self) -> Result<Self> {
        Self::new(self.repo.clone(), self.name.clone(), self.reader.clone())
    }

    /// Relative path of the profile below `profiles/`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repo(&self) -> &RepoConfig {
        &self.repo
    }

    /// Lines that were skipped while parsing so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().clone()
    }

    fn report(&self, line: &DeclarationLine, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            path: line.path.clone(),
            lineno: line.lineno,
            line: line.content.clone(),
            message: message.into(),
        };
        error!("{}", diagnostic);
        self.diagnostics.lock().push(diagnostic);
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Lines of a property file; absent files and closed EAPI gates yield nothing
    fn read_property(&self, name: &str, gate: Gate) -> Result<Vec<DeclarationLine>> {
        if gate != Gate::Always && !gate.is_open(&self.eapi()?.options) {
            return Ok(Vec::new());
        }
        Ok(self.reader.read_lines(&self.file(name))?.unwrap_or_default())
    }

    /// The profile's EAPI, `0` without an `eapi` file
    pub fn eapi(&self) -> Result<&'static Eapi> {
        self.attrs
            .eapi
            .get_or_try_init(|| {
                let path = self.file("eapi");
                let lines = match self.reader.read(&path)? {
                    Some(lines) => lines,
                    None => return Ok(Eapi::default_eapi()),
                };
                let mut tokens = lines.iter().map(|l| l.content.trim()).filter(|s| !s.is_empty());
                let id = tokens.next().unwrap_or("");
                if tokens.next().is_some() || id.contains(char::is_whitespace) {
                    return Err(ConfigError::parse_file(&path, "expected a single EAPI token"));
                }
                Eapi::get(id).ok_or_else(|| ConfigError::UnsupportedEapi {
                    path: path.clone(),
                    eapi: id.to_string(),
                })
            })
            .copied()
    }

    /// Parent references, in file order
    pub fn parent_paths(&self) -> Result<&[ParentLine]> {
        self.attrs
            .parent_paths
            .get_or_try_init(|| {
                let path = self.file("parent");
                let repo_refs = self.repo.has_profile_format(FORMAT_PORTAGE_2);
                let mut parents = Vec::new();

                for line in self.read_property("parent", Gate::Always)? {
                    let content = line.content.as_str();
                    let target = match content.split_once(':') {
                        Some((repo_id, rel)) if repo_refs => {
                            if rel.contains("..") {
                                return Err(ConfigError::parse_line(
                                    &path,
                                    line.lineno,
                                    content,
                                    "invalid line format: '..' in repository parent",
                                ));
                            }
                            ParentRef::Repo {
                                repo_id: repo_id.to_string(),
                                path: rel.trim_matches('/').to_string(),
                            }
                        }
                        _ => ParentRef::Local(normalize(&self.path.join(content))),
                    };
                    parents.push(ParentLine {
                        target,
                        line: line.content,
                        lineno: line.lineno,
                    });
                }

                Ok(parents)
            })
            .map(Vec::as_slice)
    }

    /// System set and profile set entries from `packages`
    pub fn packages(&self) -> Result<&ProfilePackages> {
        self.attrs.packages.get_or_try_init(|| {
            let path = self.file("packages");
            let profile_set = self.repo.has_profile_format(FORMAT_PROFILE_SET);
            let mut packages = ProfilePackages::default();

            for line in self.read_property("packages", Gate::Always)? {
                let content = line.content.as_str();
                if content == "-*" {
                    packages.system.reset = true;
                    packages.profile.reset = true;
                    continue;
                }

                let (negated, rest) = match content.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, content),
                };
                let (set, atom) = match rest.strip_prefix('*') {
                    Some(atom) => (&mut packages.system, atom),
                    None if profile_set => (&mut packages.profile, rest),
                    None => {
                        return Err(ConfigError::parse_line(
                            &path,
                            line.lineno,
                            content,
                            "invalid line format",
                        ))
                    }
                };
                let atom: Atom = atom.parse().map_err(|e| {
                    let reason = format!("parsing error: {}", e);
                    ConfigError::parse_line(&path, line.lineno, content, reason)
                })?;
                if negated {
                    set.negated.push(atom);
                } else {
                    set.positive.push(atom);
                }
            }

            Ok(packages)
        })
    }

    fn parse_atom_negations(&self, lines: Vec<DeclarationLine>) -> Negations<Atom> {
        let mut out = Negations::default();
        for line in lines {
            let (negated, text) = match line.content.strip_prefix('-') {
                Some("") => {
                    self.report(&line, "'-' negation without an atom");
                    continue;
                }
                Some(rest) => (true, rest),
                None => (false, line.content.as_str()),
            };
            match text.parse::<Atom>() {
                Ok(atom) if negated => out.negated.push(atom),
                Ok(atom) => out.positive.push(atom),
                Err(e) => self.report(&line, format!("parsing error: {}", e)),
            }
        }
        out
    }

    fn parse_keywords(&self, lines: Vec<DeclarationLine>) -> Negations<KeywordEntry> {
        let mut out = Negations::default();
        for line in lines {
            let mut tokens = line.content.split_whitespace();
            let first = tokens.next().unwrap_or("");
            let (negated, text) = match first.strip_prefix('-') {
                Some("") => {
                    self.report(&line, "'-' negation without an atom");
                    continue;
                }
                Some(rest) => (true, rest),
                None => (false, first),
            };
            let atom = match text.parse::<Atom>() {
                Ok(atom) => atom,
                Err(e) => {
                    self.report(&line, format!("parsing error: {}", e));
                    continue;
                }
            };
            let keywords: IndexSet<String> = tokens.map(str::to_string).collect();
            let entry = KeywordEntry {
                atom,
                keywords: keywords.into_iter().collect(),
            };
            if negated {
                out.negated.push(entry);
            } else {
                out.positive.push(entry);
            }
        }
        out
    }

    fn parse_package_use(&self, lines: Vec<DeclarationLine>) -> PackageUseMap {
        let mut map = PackageUseMap::new();
        for line in lines {
            let mut tokens = line.content.split_whitespace();
            let atom = match tokens.next().map(str::parse::<Atom>) {
                Some(Ok(atom)) => atom,
                Some(Err(e)) => {
                    self.report(&line, format!("parsing error: {}", e));
                    continue;
                }
                None => continue,
            };
            let flags: Vec<&str> = tokens.collect();
            if flags.is_empty() {
                self.report(&line, "missing USE flag(s)");
                continue;
            }
            match UseAdjustment::parse(flags) {
                Ok(adjustment) => map
                    .entry(atom.key().clone())
                    .or_default()
                    .push(PackageUseEntry { atom, adjustment }),
                Err(e) => self.report(&line, format!("parsing error: {}", e)),
            }
        }
        map
    }

    fn parse_use(&self, lines: Vec<DeclarationLine>) -> UseAdjustment {
        let mut out = UseAdjustment::default();
        for line in lines {
            match UseAdjustment::parse(line.content.split_whitespace()) {
                Ok(adjustment) => {
                    out.disabled.extend(adjustment.disabled);
                    out.enabled.extend(adjustment.enabled);
                }
                Err(e) => self.report(&line, format!("parsing error: {}", e)),
            }
        }
        out
    }

    pub fn masks(&self) -> Result<&Negations<Atom>> {
        self.attrs.masks.get_or_try_init(|| {
            Ok(self.parse_atom_negations(self.read_property("package.mask", Gate::Always)?))
        })
    }

    pub fn unmasks(&self) -> Result<&Negations<Atom>> {
        self.attrs.unmasks.get_or_try_init(|| {
            Ok(self.parse_atom_negations(self.read_property("package.unmask", Gate::Always)?))
        })
    }

    pub fn pkg_deprecated(&self) -> Result<&Negations<Atom>> {
        self.attrs.pkg_deprecated.get_or_try_init(|| {
            Ok(self.parse_atom_negations(self.read_property("package.deprecated", Gate::Always)?))
        })
    }

    pub fn keywords(&self) -> Result<&Negations<KeywordEntry>> {
        self.attrs.keywords.get_or_try_init(|| {
            Ok(self.parse_keywords(self.read_property("package.keywords", Gate::Always)?))
        })
    }

    pub fn accept_keywords(&self) -> Result<&Negations<KeywordEntry>> {
        self.attrs.accept_keywords.get_or_try_init(|| {
            Ok(self.parse_keywords(self.read_property("package.accept_keywords", Gate::Always)?))
        })
    }

    /// Packages declared as provided outside the package manager
    pub fn pkg_provided(&self) -> Result<&[CPV]> {
        self.attrs
            .pkg_provided
            .get_or_try_init(|| {
                let path = self.file("package.provided");
                self.read_property("package.provided", Gate::PkgProvided)?
                    .into_iter()
                    .map(|line| {
                        CPV::parse(&line.content).map_err(|_| {
                            ConfigError::parse_line(
                                &path,
                                line.lineno,
                                line.content.as_str(),
                                "invalid package.provided entry",
                            )
                        })
                    })
                    .collect()
            })
            .map(Vec::as_slice)
    }

    pub fn pkg_use(&self) -> Result<&PackageUseMap> {
        self.attrs.pkg_use.get_or_try_init(|| {
            Ok(self.parse_package_use(self.read_property("package.use", Gate::Always)?))
        })
    }

    pub fn pkg_use_force(&self) -> Result<&PackageUseMap> {
        self.attrs.pkg_use_force.get_or_try_init(|| {
            Ok(self.parse_package_use(self.read_property("package.use.force", Gate::Always)?))
        })
    }

    pub fn pkg_use_mask(&self) -> Result<&PackageUseMap> {
        self.attrs.pkg_use_mask.get_or_try_init(|| {
            Ok(self.parse_package_use(self.read_property("package.use.mask", Gate::Always)?))
        })
    }

    pub fn pkg_use_stable_force(&self) -> Result<&PackageUseMap> {
        self.attrs.pkg_use_stable_force.get_or_try_init(|| {
            let lines =
                self.read_property("package.use.stable.force", Gate::StableUse)?;
            Ok(self.parse_package_use(lines))
        })
    }

    pub fn pkg_use_stable_mask(&self) -> Result<&PackageUseMap> {
        self.attrs.pkg_use_stable_mask.get_or_try_init(|| {
            let lines =
                self.read_property("package.use.stable.mask", Gate::StableUse)?;
            Ok(self.parse_package_use(lines))
        })
    }

    pub fn use_force(&self) -> Result<&UseAdjustment> {
        self.attrs
            .use_force
            .get_or_try_init(|| Ok(self.parse_use(self.read_property("use.force", Gate::Always)?)))
    }

    pub fn use_mask(&self) -> Result<&UseAdjustment> {
        self.attrs
            .use_mask
            .get_or_try_init(|| Ok(self.parse_use(self.read_property("use.mask", Gate::Always)?)))
    }

    pub fn use_stable_force(&self) -> Result<&UseAdjustment> {
        self.attrs.use_stable_force.get_or_try_init(|| {
            Ok(self.parse_use(self.read_property("use.stable.force", Gate::StableUse)?))
        })
    }

    pub fn use_stable_mask(&self) -> Result<&UseAdjustment> {
        self.attrs.use_stable_mask.get_or_try_init(|| {
            Ok(self.parse_use(self.read_property("use.stable.mask", Gate::StableUse)?))
        })
    }

    /// `use.force` followed by `package.use.force`
    pub fn forced_use(&self) -> Result<&UseDict> {
        self.attrs.forced_use.get_or_try_init(|| {
            let mut dict = UseDict::new();
            dict.add_global(self.use_force()?.clone());
            add_package_entries(&mut dict, self.pkg_use_force()?);
            Ok(dict)
        })
    }

    /// `use.mask` followed by `package.use.mask`
    pub fn masked_use(&self) -> Result<&UseDict> {
        self.attrs.masked_use.get_or_try_init(|| {
            let mut dict = UseDict::new();
            dict.add_global(self.use_mask()?.clone());
            add_package_entries(&mut dict, self.pkg_use_mask()?);
            Ok(dict)
        })
    }

    /// Forced flags for stable keywords, including the `.stable.` files
    pub fn stable_forced_use(&self) -> Result<&UseDict> {
        self.attrs.stable_forced_use.get_or_try_init(|| {
            let mut dict = UseDict::new();
            dict.add_global(self.use_force()?.clone());
            dict.add_global(self.use_stable_force()?.clone());
            add_package_entries(&mut dict, self.pkg_use_force()?);
            add_package_entries(&mut dict, self.pkg_use_stable_force()?);
            Ok(dict)
        })
    }

    /// Masked flags for stable keywords, including the `.stable.` files
    pub fn stable_masked_use(&self) -> Result<&UseDict> {
        self.attrs.stable_masked_use.get_or_try_init(|| {
            let mut dict = UseDict::new();
            dict.add_global(self.use_mask()?.clone());
            dict.add_global(self.use_stable_mask()?.clone());
            add_package_entries(&mut dict, self.pkg_use_mask()?);
            add_package_entries(&mut dict, self.pkg_use_stable_mask()?);
            Ok(dict)
        })
    }

    /// Variables of this profile's `make.defaults`, expanded on their own
    pub fn make_defaults(&self) -> Result<&IndexMap<String, String>> {
        self.attrs
            .make_defaults
            .get_or_try_init(|| self.render_make_defaults(&IndexMap::new()))
    }

    /// Raw environment of this profile alone, see [`ProfileNode::make_defaults`]
    pub fn default_env(&self) -> Result<&IndexMap<String, String>> {
        self.make_defaults()
    }

    /// Parse `make.defaults` with `seed` providing values for references
    /// to variables set by ancestor profiles.
    ///
    /// The file is read once; later calls only re-run the expansion.
    pub fn render_make_defaults(
        &self,
        seed: &IndexMap<String, String>,
    ) -> Result<IndexMap<String, String>> {
        let path = self.file("make.defaults");
        let text = self
            .attrs
            .make_defaults_text
            .get_or_try_init(|| self.reader.read_text(&path))?;
        let text = match text {
            Some(text) => text,
            None => return Ok(IndexMap::new()),
        };
        parse_bash_assignments(text, seed).map_err(|e| match e {
            ConfigError::ShellSyntax { lineno, reason } => ConfigError::ProfileParse {
                path: path.clone(),
                lineno: Some(lineno),
                line: None,
                reason,
            },
            other => other,
        })
    }

    /// Deprecation notice from the `deprecated` file
    pub fn deprecated(&self) -> Result<Option<&Deprecation>> {
        self.attrs
            .deprecated
            .get_or_try_init(|| {
                let path = self.file("deprecated");
                let lines = match self.reader.read(&path)? {
                    Some(lines) => lines,
                    None => return Ok(None),
                };
                let mut lines = lines.into_iter();

                let replacement = lines
                    .next()
                    .map(|l| l.content.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ConfigError::parse_file(&path, "missing replacement profile"))?;
                match lines.next() {
                    Some(l) if l.content.trim().is_empty() => {}
                    Some(l) => {
                        return Err(ConfigError::parse_line(
                            &path,
                            l.lineno,
                            l.content,
                            "expected a blank line after the replacement",
                        ))
                    }
                    None => return Err(ConfigError::parse_file(&path, "missing message")),
                }
                let message = lines
                    .map(|l| l.content)
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string();
                if message.is_empty() {
                    return Err(ConfigError::parse_file(&path, "missing message"));
                }

                Ok(Some(Deprecation {
                    replacement,
                    message,
                }))
            })
            .map(Option::as_ref)
    }

    /// Path of `profile.bashrc`, if present
    pub fn bashrc(&self) -> Option<&Path> {
        self.attrs
            .bashrc
            .get_or_init(|| {
                let path = self.file("profile.bashrc");
                self.reader.exists(&path).then_some(path)
            })
            .as_deref()
    }
}

fn add_package_entries(dict: &mut UseDict, map: &PackageUseMap) {
    for entry in map.values().flatten() {
        dict.add_package(entry.clone());
    }
}

/// Lexically resolve `.` and `..` components
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}
