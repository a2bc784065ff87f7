//! USE flag adjustments
//!
//! Profiles adjust USE flags through global files (`use.force`,
//! `use.mask`, ...) and per-package files (`package.use.force`, ...).
//! Every adjustment is kept as a chunk in a [`UseDict`]; the effective set
//! for a package is obtained by replaying the chunks that apply to it.

use crate::atom::Atom;
use crate::{ConfigError, Result};
use indexmap::IndexSet;
use model::{CP, CPV};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static USE_FLAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9+_@-]*$").expect("USE flag regex is valid")
});

/// Check whether `flag` is a valid USE flag name
pub fn is_valid_use_flag(flag: &str) -> bool {
    USE_FLAG_RE.is_match(flag)
}

/// Split USE tokens into (disabled, enabled) by their leading `-`.
///
/// `-*` is kept in the disabled list and means "reset".
pub fn split_negations<'a, I>(tokens: I) -> Result<(Vec<String>, Vec<String>)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut neg = Vec::new();
    let mut pos = Vec::new();
    for token in tokens {
        match token.strip_prefix('-') {
            Some("*") => neg.push("*".to_string()),
            Some(flag) if is_valid_use_flag(flag) => neg.push(flag.to_string()),
            None if is_valid_use_flag(token) => pos.push(token.to_string()),
            _ => return Err(ConfigError::InvalidUseFlag(token.to_string())),
        }
    }
    Ok((neg, pos))
}

/// One set of flag changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseAdjustment {
    /// Flags turned off; `*` clears everything accumulated so far
    pub disabled: IndexSet<String>,
    /// Flags turned on
    pub enabled: IndexSet<String>,
}

impl UseAdjustment {
    /// Parse whitespace separated USE tokens
    pub fn parse<'a, I>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let (neg, pos) = split_negations(tokens)?;
        Ok(Self {
            disabled: neg.into_iter().collect(),
            enabled: pos.into_iter().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.disabled.is_empty() && self.enabled.is_empty()
    }

    /// Apply this adjustment to an accumulated flag set
    pub fn apply(&self, flags: &mut IndexSet<String>) {
        if self.disabled.contains("*") {
            flags.clear();
        }
        for flag in &self.disabled {
            flags.shift_remove(flag);
        }
        for flag in &self.enabled {
            flags.insert(flag.clone());
        }
    }
}

/// A `package.use*` line: an atom and its flag changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageUseEntry {
    pub atom: Atom,
    pub adjustment: UseAdjustment,
}

/// A chunk of a [`UseDict`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseChunk {
    /// `None` applies to every package
    pub restriction: Option<Atom>,
    pub adjustment: UseAdjustment,
}

impl UseChunk {
    /// Category/package this chunk is scoped to
    pub fn key(&self) -> Option<&CP> {
        self.restriction.as_ref().map(Atom::key)
    }

    fn applies_to(&self, cpv: &CPV) -> bool {
        match &self.restriction {
            None => true,
            Some(atom) => atom.matches(cpv),
        }
    }
}

/// Ordered USE adjustments, global or scoped to a package key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseDict {
    chunks: Vec<UseChunk>,
}

impl UseDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unscoped adjustment
    pub fn add_global(&mut self, adjustment: UseAdjustment) {
        if !adjustment.is_empty() {
            self.chunks.push(UseChunk {
                restriction: None,
                adjustment,
            });
        }
    }

    /// Add an adjustment scoped to the packages matching `entry.atom`
    pub fn add_package(&mut self, entry: PackageUseEntry) {
        self.chunks.push(UseChunk {
            restriction: Some(entry.atom),
            adjustment: entry.adjustment,
        });
    }

    /// Append every chunk of `other` after the chunks already present
    pub fn merge(&mut self, other: &UseDict) {
        self.chunks.extend(other.chunks.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// All chunks in application order
    pub fn chunks(&self) -> &[UseChunk] {
        &self.chunks
    }

    /// Unscoped chunks in application order
    pub fn global(&self) -> impl Iterator<Item = &UseAdjustment> {
        self.chunks
            .iter()
            .filter(|c| c.restriction.is_none())
            .map(|c| &c.adjustment)
    }

    /// Chunks scoped to `cp` in application order
    pub fn for_key<'a>(&'a self, cp: &'a CP) -> impl Iterator<Item = &'a UseChunk> {
        self.chunks.iter().filter(move |c| c.key() == Some(cp))
    }

    /// Package keys that carry scoped chunks
    pub fn keys(&self) -> IndexSet<&CP> {
        self.chunks.iter().filter_map(UseChunk::key).collect()
    }

    /// Effective flag set for `cpv`
    pub fn pull_data(&self, cpv: &CPV) -> IndexSet<String> {
        let mut flags = IndexSet::new();
        for chunk in self.chunks.iter().filter(|c| c.applies_to(cpv)) {
            chunk.adjustment.apply(&mut flags);
        }
        flags
    }

    /// Effective flag set ignoring package scoped chunks
    pub fn pull_global(&self) -> IndexSet<String> {
        let mut flags = IndexSet::new();
        for adjustment in self.global() {
            adjustment.apply(&mut flags);
        }
        flags
    }
}
