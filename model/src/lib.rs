//! Gentoo package identity
//!
//! Value types for `category/package` ([`CP`]) and
//! `category/package-version[-revision]` ([`CPV`]), plus the version
//! ordering used to sort versions of one package.
//!
//! ```rust
//! use glep_model::CPV;
//!
//! let old = CPV::parse("dev-lang/rust-1.74.1").unwrap();
//! let new = CPV::parse("dev-lang/rust-1.75.0_rc1").unwrap();
//! assert!(old < new);
//! ```

pub mod cpv;
pub mod error;
pub mod version;

pub use cpv::{is_valid_category, is_valid_package_name, CP, CPV};
pub use error::{Error, Result};
pub use version::{compare_versions, is_valid_revision, is_valid_version, revision_number};
