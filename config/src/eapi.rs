//! EAPI feature table
//!
//! Profiles declare an EAPI in their `eapi` file. The EAPI decides which
//! optional declaration files a profile may carry.

use serde::Serialize;
use std::fmt;

/// Profile-relevant capabilities of an EAPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EapiOptions {
    /// `use.stable.*` and `package.use.stable.*` are honored
    pub profile_stable_use: bool,
    /// IUSE_EFFECTIVE is synthesized from IUSE_IMPLICIT and USE_EXPAND_IMPLICIT
    pub profile_iuse_injection: bool,
    /// `package.provided` is honored
    pub profile_pkg_provided: bool,
}

/// A known EAPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eapi {
    pub id: &'static str,
    pub options: EapiOptions,
}

const fn eapi(id: &'static str, modern: bool, provided: bool) -> Eapi {
    Eapi {
        id,
        options: EapiOptions {
            profile_stable_use: modern,
            profile_iuse_injection: modern,
            profile_pkg_provided: provided,
        },
    }
}

static KNOWN_EAPIS: [Eapi; 9] = [
    eapi("0", false, true),
    eapi("1", false, true),
    eapi("2", false, true),
    eapi("3", false, true),
    eapi("4", false, true),
    eapi("5", true, true),
    eapi("6", true, true),
    eapi("7", true, false),
    eapi("8", true, false),
];

impl Eapi {
    /// Look up an EAPI by id
    pub fn get(id: &str) -> Option<&'static Eapi> {
        KNOWN_EAPIS.iter().find(|e| e.id == id)
    }

    /// EAPI 0, assumed when a profile has no `eapi` file
    pub fn default_eapi() -> &'static Eapi {
        &KNOWN_EAPIS[0]
    }

    /// All known EAPIs, oldest first
    pub fn known() -> &'static [Eapi] {
        &KNOWN_EAPIS
    }
}

impl fmt::Display for Eapi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
