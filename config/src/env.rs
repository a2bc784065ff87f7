//! Profile environment handling
//!
//! Most `make.defaults` variables are overridden by the most specific
//! profile that sets them. Incremental variables instead accumulate
//! tokens across the whole profile stack.

use indexmap::{IndexMap, IndexSet};
use tracing::warn;

/// Variables whose values accumulate across the profile stack
pub const INCREMENTALS: &[&str] = &[
    "ACCEPT_KEYWORDS",
    "ACCEPT_LICENSE",
    "CONFIG_PROTECT",
    "CONFIG_PROTECT_MASK",
    "ENV_UNSET",
    "FEATURES",
    "IUSE_IMPLICIT",
    "PROFILE_ONLY_VARIABLES",
    "USE",
    "USE_EXPAND",
    "USE_EXPAND_HIDDEN",
    "USE_EXPAND_IMPLICIT",
    "USE_EXPAND_UNPREFIXED",
];

/// Incrementals that are accumulated but left unexpanded
pub const INCREMENTALS_UNFINALIZED: &[&str] = &["USE"];

pub fn is_incremental(name: &str) -> bool {
    INCREMENTALS.contains(&name)
}

/// Collapse an incremental token stream.
///
/// `-*` drops everything seen so far, `-tok` drops `tok`, and a bare
/// token is appended unless already present.
pub fn incremental_expansion<'a, I>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: IndexSet<String> = IndexSet::new();
    for token in tokens {
        match token.strip_prefix('-') {
            Some("*") => out.clear(),
            Some("") => warn!("ignoring bare '-' in incremental value"),
            Some(tok) => {
                out.shift_remove(tok);
            }
            None => {
                out.insert(token.to_string());
            }
        }
    }
    out.into_iter().collect()
}

/// Accumulates `make.defaults` values from ancestor to descendant
#[derive(Debug, Clone, Default)]
pub struct IncrementalEnv {
    vars: IndexMap<String, String>,
}

impl IncrementalEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw accumulated values, used to seed the next `make.defaults`
    pub fn rendered(&self) -> &IndexMap<String, String> {
        &self.vars
    }

    /// Fold one profile's variables in
    pub fn update(&mut self, vars: IndexMap<String, String>) {
        for (key, value) in vars {
            if is_incremental(&key) {
                let slot = self.vars.entry(key).or_default();
                if !value.trim().is_empty() {
                    if !slot.is_empty() {
                        slot.push(' ');
                    }
                    slot.push_str(value.trim());
                }
            } else {
                self.vars.insert(key, value);
            }
        }
    }

    /// Final environment.
    ///
    /// Incrementals are reduced to single-space separated tokens, run
    /// through [`incremental_expansion`] unless listed in
    /// [`INCREMENTALS_UNFINALIZED`]. Incrementals left empty are dropped.
    pub fn finalize(mut self) -> IndexMap<String, String> {
        for name in INCREMENTALS {
            let raw = match self.vars.shift_remove(*name) {
                Some(raw) => raw,
                None => continue,
            };
            let tokens: Vec<String> = if INCREMENTALS_UNFINALIZED.contains(name) {
                raw.split_whitespace().map(str::to_string).collect()
            } else {
                incremental_expansion(raw.split_whitespace())
            };
            if !tokens.is_empty() {
                self.vars.insert(name.to_string(), tokens.join(" "));
            }
        }
        self.vars
    }
}
