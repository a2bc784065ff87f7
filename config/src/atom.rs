//! Package atom parsing and matching
//!
//! Profiles refer to packages through atoms like:
//! - `category/package`
//! - `>=category/package-1.0`
//! - `=category/package-1.2*`
//! - `category/package:slot`
//! - `category/package[use_flag]`
//!
//! The profile engine only relies on [`Atom::key`] and [`Atom::matches`].

use crate::{ConfigError, Result};
use model::{compare_versions, CP, CPV};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VersionOp {
    /// No version constraint
    #[default]
    Any,
    /// Exact version match (=)
    Equal,
    /// Greater than (>)
    Greater,
    /// Greater than or equal (>=)
    GreaterEqual,
    /// Less than (<)
    Less,
    /// Less than or equal (<=)
    LessEqual,
    /// Version prefix match (=*), e.g. `=category/package-1.0*`
    GlobEqual,
    /// Any revision of the version (~)
    RevisionBump,
}

/// A package atom
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Atom {
    operator: VersionOp,
    cp: CP,
    version: Option<String>,
    revision: Option<String>,
    slot: Option<String>,
    subslot: Option<String>,
    repository: Option<String>,
    use_deps: Vec<UseDep>,
}

impl Atom {
    /// An unversioned atom matching every version of `cp`
    pub fn new(cp: CP) -> Self {
        Self {
            operator: VersionOp::Any,
            cp,
            version: None,
            revision: None,
            slot: None,
            subslot: None,
            repository: None,
            use_deps: Vec::new(),
        }
    }

    /// A versioned atom; `VersionOp::Any` drops the version
    pub fn versioned(operator: VersionOp, cpv: &CPV) -> Self {
        let mut atom = Self::new(cpv.cp().clone());
        if operator != VersionOp::Any {
            atom.operator = operator;
            atom.version = Some(cpv.version().to_string());
            atom.revision = cpv.revision().map(str::to_string);
        }
        atom
    }

    /// Set the slot
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    /// The category/package this atom restricts
    pub fn key(&self) -> &CP {
        &self.cp
    }

    pub fn operator(&self) -> VersionOp {
        self.operator
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn slot(&self) -> Option<&str> {
        self.slot.as_deref()
    }

    pub fn subslot(&self) -> Option<&str> {
        self.subslot.as_deref()
    }

    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    pub fn use_deps(&self) -> &[UseDep] {
        &self.use_deps
    }

    /// Check whether a package version satisfies this atom.
    ///
    /// Slot, repository and USE restrictions are not considered; a bare
    /// CPV carries none of that state.
    pub fn matches(&self, cpv: &CPV) -> bool {
        if cpv.cp() != &self.cp {
            return false;
        }

        let version = match &self.version {
            Some(v) => v.as_str(),
            None => return true,
        };

        let ord = || compare_versions(cpv.version(), cpv.revision(), version, self.revision());

        match self.operator {
            VersionOp::Any => true,
            VersionOp::Equal => ord() == Ordering::Equal,
            VersionOp::Greater => ord() == Ordering::Greater,
            VersionOp::GreaterEqual => ord() != Ordering::Less,
            VersionOp::Less => ord() == Ordering::Less,
            VersionOp::LessEqual => ord() != Ordering::Greater,
            VersionOp::GlobEqual => cpv.full_version().starts_with(&self.full_version()),
            VersionOp::RevisionBump => {
                compare_versions(cpv.version(), None, version, None) == Ordering::Equal
            }
        }
    }

    fn full_version(&self) -> String {
        match (&self.version, &self.revision) {
            (Some(v), Some(r)) => format!("{}-{}", v, r),
            (Some(v), None) => v.clone(),
            _ => String::new(),
        }
    }
}

impl FromStr for Atom {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidAtom("empty atom".to_string()));
        }
        if s.starts_with('!') {
            return Err(ConfigError::InvalidAtom(format!(
                "blockers are not valid here: {}",
                s
            )));
        }

        let mut remaining = s;

        // Parse operator
        let operator = if let Some(rest) = remaining.strip_prefix(">=") {
            remaining = rest;
            VersionOp::GreaterEqual
        } else if let Some(rest) = remaining.strip_prefix("<=") {
            remaining = rest;
            VersionOp::LessEqual
        } else if let Some(rest) = remaining.strip_prefix('>') {
            remaining = rest;
            VersionOp::Greater
        } else if let Some(rest) = remaining.strip_prefix('<') {
            remaining = rest;
            VersionOp::Less
        } else if let Some(rest) = remaining.strip_prefix('~') {
            remaining = rest;
            VersionOp::RevisionBump
        } else if let Some(rest) = remaining.strip_prefix('=') {
            remaining = rest;
            VersionOp::Equal
        } else {
            VersionOp::Any
        };

        // Extract USE deps [flag1,flag2]
        let mut use_deps = Vec::new();
        if let Some(start) = remaining.find('[') {
            let use_str = remaining[start + 1..]
                .strip_suffix(']')
                .ok_or_else(|| ConfigError::InvalidAtom(format!("unclosed USE deps: {}", s)))?;
            for dep in use_str.split(',') {
                use_deps.push(dep.parse()?);
            }
            remaining = &remaining[..start];
        }

        // Extract repository ::repo
        let mut repository = None;
        if let Some(idx) = remaining.find("::") {
            let repo = &remaining[idx + 2..];
            if repo.is_empty() {
                return Err(ConfigError::InvalidAtom(format!("empty repository: {}", s)));
            }
            repository = Some(repo.to_string());
            remaining = &remaining[..idx];
        }

        // Extract slot :slot/subslot
        let mut slot = None;
        let mut subslot = None;
        if let Some(idx) = remaining.find(':') {
            let slot_str = &remaining[idx + 1..];
            match slot_str.split_once('/') {
                Some((s, sub)) => {
                    slot = Some(s.to_string());
                    subslot = Some(sub.to_string());
                }
                None => slot = Some(slot_str.to_string()),
            }
            if slot.as_deref() == Some("") {
                return Err(ConfigError::InvalidAtom(format!("empty slot: {}", s)));
            }
            remaining = &remaining[..idx];
        }

        // =cat/pkg-1.0* is a glob
        let operator = match remaining.strip_suffix('*') {
            Some(rest) if operator == VersionOp::Equal => {
                remaining = rest;
                VersionOp::GlobEqual
            }
            Some(_) => {
                return Err(ConfigError::InvalidAtom(format!(
                    "'*' suffix requires the '=' operator: {}",
                    s
                )))
            }
            None => operator,
        };

        let mut atom = if operator == VersionOp::Any {
            let cp = CP::parse(remaining).map_err(|e| ConfigError::InvalidAtom(e.to_string()))?;
            Atom::new(cp)
        } else {
            let cpv = CPV::parse(remaining).map_err(|e| ConfigError::InvalidAtom(e.to_string()))?;
            if operator == VersionOp::RevisionBump && cpv.revision().is_some() {
                return Err(ConfigError::InvalidAtom(format!(
                    "'~' operator does not take a revision: {}",
                    s
                )));
            }
            Atom::versioned(operator, &cpv)
        };

        atom.slot = slot;
        atom.subslot = subslot;
        atom.repository = repository;
        atom.use_deps = use_deps;
        Ok(atom)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Write operator
        match self.operator {
            VersionOp::Any => {}
            VersionOp::Equal | VersionOp::GlobEqual => write!(f, "=")?,
            VersionOp::Greater => write!(f, ">")?,
            VersionOp::GreaterEqual => write!(f, ">=")?,
            VersionOp::Less => write!(f, "<")?,
            VersionOp::LessEqual => write!(f, "<=")?,
            VersionOp::RevisionBump => write!(f, "~")?,
        }

        write!(f, "{}", self.cp)?;

        if self.version.is_some() {
            write!(f, "-{}", self.full_version())?;
        }

        if self.operator == VersionOp::GlobEqual {
            write!(f, "*")?;
        }

        if let Some(ref slot) = self.slot {
            write!(f, ":{}", slot)?;
            if let Some(ref subslot) = self.subslot {
                write!(f, "/{}", subslot)?;
            }
        }

        if let Some(ref repo) = self.repository {
            write!(f, "::{}", repo)?;
        }

        if !self.use_deps.is_empty() {
            write!(f, "[")?;
            for (i, dep) in self.use_deps.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", dep)?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

/// USE flag dependency in an atom
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UseDep {
    /// The USE flag name
    pub flag: String,
    /// Whether the flag must be enabled (true) or disabled (false)
    pub enabled: bool,
    /// Default value if flag is not set
    pub default: Option<bool>,
    /// Whether this is a conditional dependency (use?)
    pub conditional: bool,
}

impl FromStr for UseDep {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidUseFlag("empty USE dep".to_string()));
        }

        let conditional = s.ends_with('?');
        let mut flag = s.strip_suffix('?').unwrap_or(s);

        let mut default = None;
        if let Some(rest) = flag.strip_suffix("(+)") {
            default = Some(true);
            flag = rest;
        } else if let Some(rest) = flag.strip_suffix("(-)") {
            default = Some(false);
            flag = rest;
        }

        let (flag, enabled) = match flag.strip_prefix('-').or_else(|| flag.strip_prefix('!')) {
            Some(rest) => (rest, false),
            None => (flag, true),
        };

        if flag.is_empty() {
            return Err(ConfigError::InvalidUseFlag(format!("missing flag name: {}", s)));
        }

        Ok(UseDep {
            flag: flag.to_string(),
            enabled,
            default,
            conditional,
        })
    }
}

impl fmt::Display for UseDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            write!(f, "-")?;
        }
        write!(f, "{}", self.flag)?;
        if let Some(def) = self.default {
            write!(f, "({})", if def { "+" } else { "-" })?;
        }
        if self.conditional {
            write!(f, "?")?;
        }
        Ok(())
    }
}
