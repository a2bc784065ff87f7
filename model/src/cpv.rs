//! Package identifiers
//!
//! - [`CP`]: `category/package`, e.g. `sys-apps/portage`
//! - [`CPV`]: `category/package-version[-rN]`, e.g. `sys-apps/portage-3.0.30-r1`
//!
//! Both are validated once at construction and immutable afterwards.

use crate::error::{Error, Result};
use crate::version::{compare_versions, is_valid_revision, is_valid_version, revision_number};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

static CATEGORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][-A-Za-z0-9+._]*(?:/[A-Za-z0-9][-A-Za-z0-9+._]*)*$")
        .expect("category regex is valid")
});

static PACKAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+_]+$").expect("package regex is valid"));

/// Check a category name (e.g. `dev-lang`)
pub fn is_valid_category(s: &str) -> bool {
    CATEGORY_RE.is_match(s)
}

/// Check a package name (e.g. `rust`)
pub fn is_valid_package_name(s: &str) -> bool {
    PACKAGE_RE.is_match(s)
}

fn check_cp(category: &str, package: &str) -> Result<()> {
    if !is_valid_category(category) {
        return Err(Error::malformed(category, "invalid category component"));
    }
    if !is_valid_package_name(package) {
        return Err(Error::malformed(package, "invalid package component"));
    }
    Ok(())
}

/// A category/package pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CP {
    category: String,
    package: String,
}

impl CP {
    /// Create from explicit category and package components
    pub fn new(category: impl Into<String>, package: impl Into<String>) -> Result<Self> {
        let category = category.into();
        let package = package.into();
        check_cp(&category, &package)?;
        Ok(Self { category, package })
    }

    /// Parse a `category/package` string
    pub fn parse(s: &str) -> Result<Self> {
        if s.matches('/').count() != 1 {
            return Err(Error::malformed(s, "expected exactly one '/' separator"));
        }
        let (category, package) = s
            .split_once('/')
            .ok_or_else(|| Error::malformed(s, "no category component"))?;
        Self::new(category, package)
    }

    /// Category component
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Package component
    pub fn package(&self) -> &str {
        &self.package
    }
}

impl fmt::Display for CP {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.package)
    }
}

impl FromStr for CP {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CP {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<CP> for String {
    fn from(cp: CP) -> Self {
        cp.to_string()
    }
}

/// One version of a package: category/package-version[-revision]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CPV {
    cp: CP,
    version: String,
    revision: Option<String>,
}

impl CPV {
    /// Create from explicit components
    pub fn new(
        category: impl Into<String>,
        package: impl Into<String>,
        version: impl Into<String>,
        revision: Option<&str>,
    ) -> Result<Self> {
        let cp = CP::new(category, package)?;
        let version = version.into();
        if !is_valid_version(&version) {
            return Err(Error::malformed(&version, "invalid version component"));
        }
        if let Some(rev) = revision {
            if !is_valid_revision(rev) {
                return Err(Error::malformed(rev, "invalid revision component"));
            }
        }
        Ok(Self {
            cp,
            version,
            revision: revision.map(str::to_string),
        })
    }

    /// Parse a `category/package-version[-rN]` string
    pub fn parse(s: &str) -> Result<Self> {
        let (category, pkg_ver) = s
            .rsplit_once('/')
            .ok_or_else(|| Error::malformed(s, "no category component"))?;

        let chunks: Vec<&str> = pkg_ver.split('-').collect();
        if chunks.len() < 2 {
            return Err(Error::malformed(s, "missing package name or version"));
        }

        let package = chunks[0];
        let last = chunks[chunks.len() - 1];
        let (version, revision) = if chunks.len() > 2 && is_valid_revision(last) {
            (chunks[1..chunks.len() - 1].join("-"), Some(last))
        } else {
            (chunks[1..].join("-"), None)
        };

        Self::new(category, package, version, revision)
    }

    /// The category/package key
    pub fn cp(&self) -> &CP {
        &self.cp
    }

    /// `category/package` as a string
    pub fn key(&self) -> String {
        self.cp.to_string()
    }

    pub fn category(&self) -> &str {
        self.cp.category()
    }

    pub fn package(&self) -> &str {
        self.cp.package()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Revision string (`rN`), if any
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Revision as a number; no revision is 0
    pub fn revision_number(&self) -> u64 {
        revision_number(self.revision())
    }

    /// `version[-rN]`
    pub fn full_version(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}-{}", self.version, rev),
            None => self.version.clone(),
        }
    }

    /// Order two versions of the same package.
    ///
    /// Versions of different packages have no order and yield
    /// [`Error::IncomparableKeys`].
    pub fn compare(&self, other: &CPV) -> Result<Ordering> {
        if self.cp != other.cp {
            return Err(Error::IncomparableKeys {
                left: self.to_string(),
                right: other.to_string(),
            });
        }
        Ok(compare_versions(
            &self.version,
            self.revision(),
            &other.version,
            other.revision(),
        ))
    }
}

impl PartialOrd for CPV {
    /// `None` for different packages. Versions that order equal but are
    /// spelled differently (`0.060` vs `0.0600`) fall back to string order
    /// so that `<` stays consistent with `==`.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let ord = self.compare(other).ok()?;
        Some(
            ord.then_with(|| self.version.cmp(&other.version))
                .then_with(|| self.revision.cmp(&other.revision)),
        )
    }
}

impl fmt::Display for CPV {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cp, self.version)?;
        if let Some(rev) = &self.revision {
            write!(f, "-{}", rev)?;
        }
        Ok(())
    }
}

impl FromStr for CPV {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CPV {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<CPV> for String {
    fn from(cpv: CPV) -> Self {
        cpv.to_string()
    }
}
