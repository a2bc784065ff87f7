//! Folding a profile stack into its effective configuration
//!
//! Every property is computed once, left (most distant ancestor) to right
//! (requested profile), and cached until [`ProfileStack::invalidate`].

use super::node::{Deprecation, KeywordEntry, Negations, PackageSet, ProfileNode};
use super::stack::ProfileStack;
use crate::atom::Atom;
use crate::env::IncrementalEnv;
use crate::use_flags::UseDict;
use crate::Result;
use indexmap::{IndexMap, IndexSet};
use model::CPV;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A keyword line of some node in the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordRule {
    pub atom: Atom,
    pub keywords: Vec<String>,
    /// The line started with `-`
    pub negated: bool,
}

#[derive(Default)]
pub(super) struct Collapsed {
    system_set: OnceCell<IndexSet<Atom>>,
    profile_set: OnceCell<IndexSet<Atom>>,
    masks: OnceCell<IndexSet<Atom>>,
    unmasks: OnceCell<IndexSet<Atom>>,
    deprecated_packages: OnceCell<IndexSet<Atom>>,
    keywords: OnceCell<Vec<KeywordRule>>,
    accept_keywords: OnceCell<Vec<KeywordRule>>,
    pkg_provided: OnceCell<Vec<CPV>>,
    forced_use: OnceCell<UseDict>,
    masked_use: OnceCell<UseDict>,
    stable_forced_use: OnceCell<UseDict>,
    stable_masked_use: OnceCell<UseDict>,
    pkg_use: OnceCell<UseDict>,
    default_env: OnceCell<IndexMap<String, String>>,
    iuse_effective: OnceCell<IndexSet<String>>,
    effective: OnceCell<EffectiveConfig>,
}

/// Reset, then remove the negated atoms, then add the positive ones
fn collapse_sets<'a, I>(sets: I) -> IndexSet<Atom>
where
    I: IntoIterator<Item = &'a PackageSet>,
{
    let mut out = IndexSet::new();
    for set in sets {
        if set.reset {
            out.clear();
        }
        for atom in &set.negated {
            out.shift_remove(atom);
        }
        out.extend(set.positive.iter().cloned());
    }
    out
}

fn collapse_negations<'a, I>(lists: I) -> IndexSet<Atom>
where
    I: IntoIterator<Item = &'a Negations<Atom>>,
{
    let mut out = IndexSet::new();
    for list in lists {
        for atom in &list.negated {
            out.shift_remove(atom);
        }
        out.extend(list.positive.iter().cloned());
    }
    out
}

fn keyword_rules<'a, I>(lists: I) -> Vec<KeywordRule>
where
    I: IntoIterator<Item = &'a Negations<KeywordEntry>>,
{
    let rule = |entry: &KeywordEntry, negated| KeywordRule {
        atom: entry.atom.clone(),
        keywords: entry.keywords.clone(),
        negated,
    };
    let mut out = Vec::new();
    for list in lists {
        out.extend(list.negated.iter().map(|e| rule(e, true)));
        out.extend(list.positive.iter().map(|e| rule(e, false)));
    }
    out
}

fn split_tokens(value: Option<&String>) -> IndexSet<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

impl ProfileStack {
    fn collect<'a, T: 'a>(
        &'a self,
        f: impl Fn(&'a ProfileNode) -> Result<&'a T>,
    ) -> Result<Vec<&'a T>> {
        self.nodes().iter().map(|n| f(n.as_ref())).collect()
    }

    fn merge_use(&self, f: impl Fn(&ProfileNode) -> Result<&UseDict>) -> Result<UseDict> {
        let mut dict = UseDict::new();
        for node in self.nodes() {
            dict.merge(f(node)?);
        }
        Ok(dict)
    }

    /// `*` entries of every `packages` file
    pub fn system_set(&self) -> Result<&IndexSet<Atom>> {
        self.collapsed.system_set.get_or_try_init(|| {
            let packages = self.collect(|n| n.packages())?;
            Ok(collapse_sets(packages.iter().map(|p| &p.system)))
        })
    }

    /// Bare entries of every `packages` file
    pub fn profile_set(&self) -> Result<&IndexSet<Atom>> {
        self.collapsed.profile_set.get_or_try_init(|| {
            let packages = self.collect(|n| n.packages())?;
            Ok(collapse_sets(packages.iter().map(|p| &p.profile)))
        })
    }

    pub fn masks(&self) -> Result<&IndexSet<Atom>> {
        self.collapsed
            .masks
            .get_or_try_init(|| Ok(collapse_negations(self.collect(|n| n.masks())?)))
    }

    pub fn unmasks(&self) -> Result<&IndexSet<Atom>> {
        self.collapsed
            .unmasks
            .get_or_try_init(|| Ok(collapse_negations(self.collect(|n| n.unmasks())?)))
    }

    /// Atoms from `package.deprecated`
    pub fn deprecated_packages(&self) -> Result<&IndexSet<Atom>> {
        self.collapsed
            .deprecated_packages
            .get_or_try_init(|| Ok(collapse_negations(self.collect(|n| n.pkg_deprecated())?)))
    }

    /// `package.keywords` lines of the whole stack, in order
    pub fn keywords(&self) -> Result<&[KeywordRule]> {
        self.collapsed
            .keywords
            .get_or_try_init(|| Ok(keyword_rules(self.collect(|n| n.keywords())?)))
            .map(Vec::as_slice)
    }

    /// `package.accept_keywords` lines of the whole stack, in order
    pub fn accept_keywords(&self) -> Result<&[KeywordRule]> {
        self.collapsed
            .accept_keywords
            .get_or_try_init(|| Ok(keyword_rules(self.collect(|n| n.accept_keywords())?)))
            .map(Vec::as_slice)
    }

    pub fn pkg_provided(&self) -> Result<&[CPV]> {
        self.collapsed
            .pkg_provided
            .get_or_try_init(|| {
                let mut out = Vec::new();
                for node in self.nodes() {
                    out.extend(node.pkg_provided()?.iter().cloned());
                }
                Ok(out)
            })
            .map(Vec::as_slice)
    }

    pub fn forced_use(&self) -> Result<&UseDict> {
        self.collapsed
            .forced_use
            .get_or_try_init(|| self.merge_use(|n| n.forced_use()))
    }

    pub fn masked_use(&self) -> Result<&UseDict> {
        self.collapsed
            .masked_use
            .get_or_try_init(|| self.merge_use(|n| n.masked_use()))
    }

    pub fn stable_forced_use(&self) -> Result<&UseDict> {
        self.collapsed
            .stable_forced_use
            .get_or_try_init(|| self.merge_use(|n| n.stable_forced_use()))
    }

    pub fn stable_masked_use(&self) -> Result<&UseDict> {
        self.collapsed
            .stable_masked_use
            .get_or_try_init(|| self.merge_use(|n| n.stable_masked_use()))
    }

    /// `package.use` of the whole stack
    pub fn pkg_use(&self) -> Result<&UseDict> {
        self.collapsed.pkg_use.get_or_try_init(|| {
            let mut dict = UseDict::new();
            for node in self.nodes() {
                for entry in node.pkg_use()?.values().flatten() {
                    dict.add_package(entry.clone());
                }
            }
            Ok(dict)
        })
    }

    /// The `make.defaults` environment.
    ///
    /// Each node's file is expanded against what its ancestors set.
    /// Incremental variables accumulate, everything else is overridden by
    /// the most specific profile.
    pub fn default_env(&self) -> Result<&IndexMap<String, String>> {
        self.collapsed.default_env.get_or_try_init(|| {
            let mut env = IncrementalEnv::new();
            for node in self.nodes() {
                let vars = node.render_make_defaults(env.rendered())?;
                env.update(vars);
            }
            Ok(env.finalize())
        })
    }

    fn env_tokens(&self, name: &str) -> Result<IndexSet<String>> {
        Ok(split_tokens(self.default_env()?.get(name)))
    }

    pub fn use_expand(&self) -> Result<IndexSet<String>> {
        self.env_tokens("USE_EXPAND")
    }

    pub fn use_expand_hidden(&self) -> Result<IndexSet<String>> {
        self.env_tokens("USE_EXPAND_HIDDEN")
    }

    pub fn use_expand_implicit(&self) -> Result<IndexSet<String>> {
        self.env_tokens("USE_EXPAND_IMPLICIT")
    }

    pub fn use_expand_unprefixed(&self) -> Result<IndexSet<String>> {
        self.env_tokens("USE_EXPAND_UNPREFIXED")
    }

    pub fn iuse_implicit(&self) -> Result<IndexSet<String>> {
        self.env_tokens("IUSE_IMPLICIT")
    }

    pub fn profile_only_variables(&self) -> Result<IndexSet<String>> {
        self.env_tokens("PROFILE_ONLY_VARIABLES")
    }

    /// USE flags synthesized from USE_EXPAND variables set in `env`
    /// (the default environment when `None`), e.g. `VIDEO_CARDS="intel"`
    /// gives `video_cards_intel`
    pub fn expand_use(&self, env: Option<&IndexMap<String, String>>) -> Result<Vec<String>> {
        let env = match env {
            Some(env) => env,
            None => self.default_env()?,
        };
        let mut out = Vec::new();
        for var in self.use_expand()? {
            if let Some(value) = env.get(&var) {
                let prefix = var.to_lowercase();
                out.extend(value.split_whitespace().map(|v| format!("{}_{}", prefix, v)));
            }
        }
        Ok(out)
    }

    /// `USE` tokens followed by the USE_EXPAND derived flags
    pub fn use_flags(&self) -> Result<Vec<String>> {
        let mut out: Vec<String> = split_tokens(self.default_env()?.get("USE"))
            .into_iter()
            .collect();
        out.extend(self.expand_use(None)?);
        Ok(out)
    }

    /// Flags every package implicitly has in IUSE
    pub fn iuse_effective(&self) -> Result<&IndexSet<String>> {
        self.collapsed.iuse_effective.get_or_try_init(|| {
            let env = self.default_env()?;
            let values = |var: &str| split_tokens(env.get(&format!("USE_EXPAND_VALUES_{}", var)));
            let mut out = IndexSet::new();

            if self.eapi()?.options.profile_iuse_injection {
                let implicit = self.use_expand_implicit()?;
                out.extend(self.iuse_implicit()?);
                let unprefixed = self.use_expand_unprefixed()?;
                for var in implicit.intersection(&unprefixed) {
                    out.extend(values(var));
                }
                for var in self.use_expand()?.intersection(&implicit) {
                    let prefix = var.to_lowercase();
                    out.extend(values(var).into_iter().map(|v| format!("{}_{}", prefix, v)));
                }
            } else {
                out.extend(self.node().repo().known_arches.iter().cloned());
                for var in self.use_expand()? {
                    let prefix = var.to_lowercase();
                    out.extend(values(&var).into_iter().map(|v| format!("{}_{}", prefix, v)));
                }
            }

            Ok(out)
        })
    }

    /// `profile.bashrc` of every node, ancestors first
    pub fn bashrcs(&self) -> Vec<&Path> {
        self.nodes().iter().filter_map(|n| n.bashrc()).collect()
    }

    /// Deprecation notice of the requested profile
    pub fn deprecation(&self) -> Result<Option<&Deprecation>> {
        self.node().deprecated()
    }

    pub fn is_deprecated(&self) -> Result<bool> {
        Ok(self.deprecation()?.is_some())
    }

    /// Snapshot of every collapsed property
    pub fn effective_config(&self) -> Result<&EffectiveConfig> {
        self.collapsed.effective.get_or_try_init(|| {
            Ok(EffectiveConfig {
                profile: self.name().to_string(),
                system_set: self.system_set()?.clone(),
                profile_set: self.profile_set()?.clone(),
                masks: self.masks()?.clone(),
                unmasks: self.unmasks()?.clone(),
                deprecated_packages: self.deprecated_packages()?.clone(),
                keywords: self.keywords()?.to_vec(),
                accept_keywords: self.accept_keywords()?.to_vec(),
                pkg_provided: self.pkg_provided()?.to_vec(),
                forced_use: self.forced_use()?.clone(),
                masked_use: self.masked_use()?.clone(),
                stable_forced_use: self.stable_forced_use()?.clone(),
                stable_masked_use: self.stable_masked_use()?.clone(),
                per_package_use: self.pkg_use()?.clone(),
                default_env: self.default_env()?.clone(),
                iuse_effective: self.iuse_effective()?.clone(),
                use_expand: self.use_expand()?,
                bashrcs: self.bashrcs().into_iter().map(Path::to_path_buf).collect(),
                deprecated: self.deprecation()?.cloned(),
            })
        })
    }
}

/// Frozen configuration derived from a profile stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    /// Name of the requested profile
    pub profile: String,
    pub system_set: IndexSet<Atom>,
    pub profile_set: IndexSet<Atom>,
    pub masks: IndexSet<Atom>,
    pub unmasks: IndexSet<Atom>,
    pub deprecated_packages: IndexSet<Atom>,
    pub keywords: Vec<KeywordRule>,
    pub accept_keywords: Vec<KeywordRule>,
    pub pkg_provided: Vec<CPV>,
    pub forced_use: UseDict,
    pub masked_use: UseDict,
    pub stable_forced_use: UseDict,
    pub stable_masked_use: UseDict,
    pub per_package_use: UseDict,
    pub default_env: IndexMap<String, String>,
    pub iuse_effective: IndexSet<String>,
    pub use_expand: IndexSet<String>,
    pub bashrcs: Vec<PathBuf>,
    /// Set when the requested profile itself is deprecated
    pub deprecated: Option<Deprecation>,
}

impl EffectiveConfig {
    /// Masked by some mask atom and not unmasked by any unmask atom
    pub fn is_masked(&self, cpv: &CPV) -> bool {
        self.masks.iter().any(|a| a.matches(cpv)) && !self.unmasks.iter().any(|a| a.matches(cpv))
    }

    pub fn is_deprecated_package(&self, cpv: &CPV) -> bool {
        self.deprecated_packages.iter().any(|a| a.matches(cpv))
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated.is_some()
    }

    /// Effective forced flags for `cpv`
    pub fn forced_flags(&self, cpv: &CPV) -> IndexSet<String> {
        self.forced_use.pull_data(cpv)
    }

    /// Effective masked flags for `cpv`
    pub fn masked_flags(&self, cpv: &CPV) -> IndexSet<String> {
        self.masked_use.pull_data(cpv)
    }

    /// Look up a variable of the default environment
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.default_env.get(name).map(|s| s.as_str())
    }
}
