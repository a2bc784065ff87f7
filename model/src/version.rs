//! Gentoo version ordering
//!
//! Versions look like `1.2.3b_beta4_p1` with an optional `-rN` revision kept
//! separately. Dotted components are compared numerically, except that a
//! component with a leading zero is compared as a decimal fraction (so
//! `1.1 > 1.02`). A single trailing letter on the last component breaks
//! ties, then the `_suffix` chain, then the revision.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+(?:\.\d+)*[A-Za-z]?(?:_(?:alpha|beta|pre|rc|p)\d*)*$")
        .expect("version regex is valid")
});

static SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(alpha|beta|rc|pre|p)(\d*)$").expect("suffix regex is valid"));

/// Check a version string against the version grammar (no revision)
pub fn is_valid_version(s: &str) -> bool {
    VERSION_RE.is_match(s)
}

/// Check a revision string: `r` followed by an integer >= 1
pub fn is_valid_revision(s: &str) -> bool {
    match s.strip_prefix('r') {
        Some(digits) => {
            !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && digits.bytes().any(|b| b != b'0')
        }
        None => false,
    }
}

/// Numeric value of a revision; absent (or unparsable) revisions count as 0
pub fn revision_number(rev: Option<&str>) -> u64 {
    rev.and_then(|r| r.strip_prefix('r'))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// Compare two `(version, revision)` pairs.
///
/// Both versions are expected to satisfy [`is_valid_version`]; malformed
/// input still yields an ordering but it carries no meaning.
pub fn compare_versions(
    ver1: &str,
    rev1: Option<&str>,
    ver2: &str,
    rev2: Option<&str>,
) -> Ordering {
    if ver1 == ver2 {
        return compare_revisions(rev1, rev2);
    }

    let mut parts1 = ver1.split('_');
    let mut parts2 = ver2.split('_');
    let head1 = parts1.next().unwrap_or_default();
    let head2 = parts2.next().unwrap_or_default();

    if head1 != head2 {
        let ord = compare_dotted(head1, head2);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    let suffixes1: Vec<&str> = parts1.collect();
    let suffixes2: Vec<&str> = parts2.collect();

    for i in 0..suffixes1.len().max(suffixes2.len()) {
        // Running out of suffixes ranks between the negative ones and `_p`.
        if i == suffixes1.len() {
            let (rank, num) = suffix_value(suffixes2[i]);
            if rank != 0 {
                return 0.cmp(&rank);
            }
            return compare_numeric("0", num);
        }
        if i == suffixes2.len() {
            let (rank, num) = suffix_value(suffixes1[i]);
            if rank != 0 {
                return rank.cmp(&0);
            }
            return compare_numeric(num, "0");
        }

        if suffixes1[i] == suffixes2[i] {
            continue;
        }

        let (rank1, num1) = suffix_value(suffixes1[i]);
        let (rank2, num2) = suffix_value(suffixes2[i]);
        let ord = rank1.cmp(&rank2).then_with(|| compare_numeric(num1, num2));
        if ord != Ordering::Equal {
            return ord;
        }
    }

    compare_revisions(rev1, rev2)
}

fn compare_revisions(rev1: Option<&str>, rev2: Option<&str>) -> Ordering {
    fn digits(rev: Option<&str>) -> &str {
        rev.and_then(|r| r.strip_prefix('r')).unwrap_or("0")
    }
    compare_numeric(digits(rev1), digits(rev2))
}

fn compare_dotted(head1: &str, head2: &str) -> Ordering {
    let (components1, letter1) = split_letter(head1);
    let (components2, letter2) = split_letter(head2);

    for (c1, c2) in components1.iter().zip(components2.iter()) {
        if c1 == c2 {
            continue;
        }
        let ord = if !c1.starts_with('0') && !c2.starts_with('0') {
            compare_numeric(c1, c2)
        } else {
            // 0.060 == 0.0600
            c1.trim_end_matches('0').cmp(c2.trim_end_matches('0'))
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    components1
        .len()
        .cmp(&components2.len())
        .then(letter1.cmp(&letter2))
}

/// Split a dotted head into components, pulling off a trailing letter.
fn split_letter(head: &str) -> (Vec<&str>, Option<char>) {
    let mut components: Vec<&str> = head.split('.').collect();
    let mut letter = None;
    if let Some(last) = components.pop() {
        match last.chars().last().filter(|c| c.is_ascii_alphabetic()) {
            Some(c) => {
                letter = Some(c);
                components.push(&last[..last.len() - 1]);
            }
            None => components.push(last),
        }
    }
    (components, letter)
}

fn suffix_value(suffix: &str) -> (i8, &str) {
    match SUFFIX_RE.captures(suffix) {
        Some(caps) => {
            let rank = match caps.get(1).map(|m| m.as_str()) {
                Some("alpha") => -4,
                Some("beta") => -3,
                Some("pre") => -2,
                Some("rc") => -1,
                Some("p") => 1,
                _ => 0,
            };
            let num = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            (rank, num)
        }
        None => (0, ""),
    }
}

/// Compare two strings of decimal digits by value, without overflow.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(a: &str, b: &str) -> Ordering {
        compare_versions(a, None, b, None)
    }

    #[test]
    fn test_valid_versions() {
        for v in ["1", "1.0", "1.2.3b", "2_alpha", "1.0_rc1_p2", "0.060"] {
            assert!(is_valid_version(v), "{}", v);
        }
        for v in ["", "a", "1.", ".1", "1.0-r1", "1_gamma", "1.0ab"] {
            assert!(!is_valid_version(v), "{}", v);
        }
    }

    #[test]
    fn test_valid_revisions() {
        assert!(is_valid_revision("r1"));
        assert!(is_valid_revision("r10"));
        assert!(!is_valid_revision("r0"));
        assert!(!is_valid_revision("r"));
        assert!(!is_valid_revision("1"));
        assert!(!is_valid_revision("rx"));
    }

    #[test]
    fn test_dotted_components() {
        assert_eq!(cmp("1.1", "1.02"), Ordering::Greater);
        assert_eq!(cmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(cmp("0.060", "0.0600"), Ordering::Equal);
        assert_eq!(cmp("1.0.1", "1.0"), Ordering::Greater);
        assert_eq!(cmp("2", "10"), Ordering::Less);
    }

    #[test]
    fn test_letters() {
        assert_eq!(cmp("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(cmp("1.0b", "1.0a"), Ordering::Greater);
        assert_eq!(cmp("1.0.1", "1.0z"), Ordering::Greater);
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(cmp("1.0_alpha1", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0_p1", "1.0"), Ordering::Greater);
        assert_eq!(cmp("1.0_alpha", "1.0_beta"), Ordering::Less);
        assert_eq!(cmp("1.0_pre2", "1.0_rc1"), Ordering::Less);
        assert_eq!(cmp("1.0_rc10", "1.0_rc9"), Ordering::Greater);
        assert_eq!(cmp("1.0_p", "1.0_p0"), Ordering::Equal);
        assert_eq!(cmp("1.0_rc1_p1", "1.0_rc1"), Ordering::Greater);
        assert_eq!(cmp("1.0_beta_alpha", "1.0_beta"), Ordering::Less);
    }

    #[test]
    fn test_revisions() {
        assert_eq!(
            compare_versions("1.0", Some("r2"), "1.0", Some("r10")),
            Ordering::Less
        );
        assert_eq!(compare_versions("1.0", Some("r1"), "1.0", None), Ordering::Greater);
        assert_eq!(
            compare_versions("0.060", Some("r1"), "0.0600", Some("r2")),
            Ordering::Less
        );
    }

    #[test]
    fn test_huge_numbers_do_not_overflow() {
        assert_eq!(
            cmp("123456789012345678901234567890", "123456789012345678901234567891"),
            Ordering::Less
        );
    }
}
