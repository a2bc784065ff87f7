//! End-to-end tests for profile resolution and collapsing

use assert_matches::assert_matches;
use glep_config::*;
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A throwaway repository with a `profiles/` tree
struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("profiles")).unwrap();
        Self { dir }
    }

    fn profile(&self, name: &str, file: &str, content: &str) -> &Self {
        write(self.dir.path(), &format!("profiles/{}/{}", name, file), content);
        self
    }

    fn config(&self) -> RepoConfig {
        RepoConfig::new("test", self.dir.path())
    }

    fn manager(&self) -> ProfileManager {
        ProfileManager::new(self.config())
    }

    fn resolve(&self, name: &str) -> ProfileStack {
        self.manager().resolve(name).unwrap()
    }
}

fn cpv(s: &str) -> CPV {
    CPV::parse(s).unwrap()
}

fn atoms(set: &indexmap::IndexSet<Atom>) -> Vec<String> {
    set.iter().map(|a| a.to_string()).collect()
}

fn sorted(set: &indexmap::IndexSet<String>) -> Vec<&str> {
    let mut v: Vec<&str> = set.iter().map(String::as_str).collect();
    v.sort_unstable();
    v
}

mod linearization {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chain_orders_ancestors_first() {
        let repo = TestRepo::new();
        repo.profile("a", "eapi", "5\n")
            .profile("a/b", "parent", "..\n")
            .profile("a/b/c", "parent", "..\n");

        let stack = repo.resolve("a/b/c");
        let names: Vec<&str> = stack.nodes().iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["a", "a/b", "a/b/c"]);
        assert_eq!(stack.name(), "a/b/c");
    }

    #[test]
    fn test_cycle_is_fatal() {
        let repo = TestRepo::new();
        repo.profile("a", "parent", "../b\n")
            .profile("b", "parent", "../a\n");

        let err = repo.manager().resolve("a").unwrap_err();
        assert_matches!(
            err,
            ConfigError::ProfileResolution {
                reason: ResolutionFailure::Cycle(ref chain),
                ..
            } if chain.len() == 3
        );
    }

    #[test]
    fn test_cross_repository_parent() {
        let root = TempDir::new().unwrap();
        let gentoo = root.path().join("gentoo");
        let overlay = root.path().join("overlay");
        write(&gentoo, "profiles/base/make.defaults", "ARCH=\"amd64\"\n");
        write(&overlay, "profiles/mine/parent", "gentoo:base\n");

        let repos = RepoSet::new()
            .with_repo(RepoConfig::new("gentoo", &gentoo))
            .with_repo(RepoConfig::new("overlay", &overlay).with_profile_formats(["portage-2"]));
        let manager = ProfileManager::from_repo_set(repos, "overlay").unwrap();
        let stack = manager.resolve("mine").unwrap();

        let ids: Vec<(&str, &str)> = stack
            .nodes()
            .iter()
            .map(|n| (n.repo().repo_id.as_str(), n.name()))
            .collect();
        assert_eq!(ids, vec![("gentoo", "base"), ("overlay", "mine")]);
        assert_eq!(stack.default_env().unwrap()["ARCH"], "amd64");
    }

    #[test]
    fn test_deprecated_parent_is_fatal() {
        let repo = TestRepo::new();
        repo.profile("old", "deprecated", "new\n\nUse new instead.\n")
            .profile("child", "parent", "../old\n");

        assert_matches!(
            repo.manager().resolve("child"),
            Err(ConfigError::ProfileResolution {
                reason: ResolutionFailure::DeprecatedParent { .. },
                ..
            })
        );
    }

    #[test]
    fn test_deprecated_terminal_is_flagged() {
        let repo = TestRepo::new();
        repo.profile("old", "deprecated", "new\n\nUse new instead.\n");

        let stack = repo.resolve("old");
        assert!(stack.is_deprecated().unwrap());
        let deprecation = stack.deprecation().unwrap().unwrap();
        assert_eq!(deprecation.replacement, "new");
        assert!(stack.effective_config().unwrap().is_deprecated());
    }

    #[test]
    fn test_malformed_parent_file_aborts() {
        let repo = TestRepo::new();
        let config = repo.config().with_profile_formats(["portage-2"]);
        repo.profile("a", "parent", "gentoo:../escape\n");

        let err = ProfileManager::new(config).resolve("a").unwrap_err();
        let inner = match err {
            ConfigError::ProfileResolution {
                reason: ResolutionFailure::Parent(inner),
                ..
            } => *inner,
            other => panic!("unexpected error: {}", other),
        };
        assert_matches!(
            inner,
            ConfigError::ProfileParse { ref path, lineno: Some(1), line: Some(ref line), .. }
                if path.ends_with("a/parent") && line == "gentoo:../escape"
        );
    }
}

mod collapsing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_child_negation_removes_mask() {
        let repo = TestRepo::new();
        repo.profile("a", "package.mask", "sys-apps/foo\n>=dev-lang/rust-2\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "package.mask", "-sys-apps/foo\n");

        let stack = repo.resolve("b");
        assert_eq!(atoms(stack.masks().unwrap()), vec![">=dev-lang/rust-2"]);
    }

    #[test]
    fn test_unmask_wins_for_matching() {
        let repo = TestRepo::new();
        repo.profile("a", "package.mask", "sys-apps/foo\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "package.unmask", "=sys-apps/foo-2\n");

        let config = repo.resolve("b").effective_config().unwrap().clone();
        assert!(config.is_masked(&cpv("sys-apps/foo-1")));
        assert!(!config.is_masked(&cpv("sys-apps/foo-2")));
        assert!(!config.is_masked(&cpv("sys-apps/bar-1")));
    }

    #[test]
    fn test_packages_reset() {
        let repo = TestRepo::new();
        repo.profile("a", "packages", "*sys-apps/baselayout\n*sys-apps/coreutils\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "packages", "-*\n*sys-apps/busybox\n");

        assert_eq!(atoms(repo.resolve("b").system_set().unwrap()), vec!["sys-apps/busybox"]);
        assert_eq!(
            atoms(repo.resolve("a").system_set().unwrap()),
            vec!["sys-apps/baselayout", "sys-apps/coreutils"]
        );
    }

    #[test]
    fn test_packages_negation() {
        let repo = TestRepo::new();
        repo.profile("a", "packages", "*sys-apps/baselayout\n*sys-apps/coreutils\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "packages", "-*sys-apps/coreutils\n");

        assert_eq!(atoms(repo.resolve("b").system_set().unwrap()), vec!["sys-apps/baselayout"]);
    }

    #[test]
    fn test_incremental_features() {
        let repo = TestRepo::new();
        repo.profile("a", "make.defaults", "FEATURES=\"a b\"\nARCH=\"x86\"\nCFLAGS=\"-O2\"\n")
            .profile("b", "parent", "../a\n")
            .profile(
                "b",
                "make.defaults",
                concat!(
                    "FEATURES=\"-a c\"\nARCH=\"amd64\"\n",
                    "CFLAGS=\"${CFLAGS} -pipe\"\nCHOST=\"${ARCH}-pc-linux-gnu\"\n",
                ),
            );

        let stack = repo.resolve("b");
        let env = stack.default_env().unwrap();
        assert_eq!(env["FEATURES"], "b c");
        assert_eq!(env["ARCH"], "amd64");
        assert_eq!(env["CFLAGS"], "-O2 -pipe");
        assert_eq!(env["CHOST"], "amd64-pc-linux-gnu");
    }

    #[test]
    fn test_keywords_concatenate() {
        let repo = TestRepo::new();
        repo.profile("a", "package.accept_keywords", "sys-apps/foo ~amd64\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "package.accept_keywords", "sys-apps/foo **\n-dev-lang/bar\n");

        let stack = repo.resolve("b");
        let rules = stack.accept_keywords().unwrap();
        let got: Vec<(String, Vec<String>, bool)> = rules
            .iter()
            .map(|r| (r.atom.to_string(), r.keywords.clone(), r.negated))
            .collect();
        assert_eq!(
            got,
            vec![
                ("sys-apps/foo".to_string(), vec!["~amd64".to_string()], false),
                ("dev-lang/bar".to_string(), vec![], true),
                ("sys-apps/foo".to_string(), vec!["**".to_string()], false),
            ]
        );
    }

    #[test]
    fn test_package_use_merges_in_order() {
        let repo = TestRepo::new();
        repo.profile("a", "package.use", "sys-apps/foo a\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "package.use", "sys-apps/foo -a b\n");

        let stack = repo.resolve("b");
        let flags: Vec<String> = stack
            .pkg_use()
            .unwrap()
            .pull_data(&cpv("sys-apps/foo-1"))
            .into_iter()
            .collect();
        assert_eq!(flags, vec!["b"]);
    }

    #[test]
    fn test_stable_use_is_eapi_gated() {
        let repo = TestRepo::new();
        repo.profile("a", "use.stable.force", "old\n")
            .profile("a", "use.force", "forced\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "eapi", "5\n")
            .profile("b", "use.stable.force", "new\n");

        let stack = repo.resolve("b");
        let stable = stack.stable_forced_use().unwrap().pull_global();
        assert_eq!(sorted(&stable), vec!["forced", "new"]);
        let plain = stack.forced_use().unwrap().pull_global();
        assert_eq!(sorted(&plain), vec!["forced"]);
    }

    #[test]
    fn test_masked_use_per_package() {
        let repo = TestRepo::new();
        repo.profile("a", "use.mask", "systemd\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "package.use.mask", "sys-apps/foo -systemd\n");

        let config = repo.resolve("b").effective_config().unwrap().clone();
        assert!(config.masked_flags(&cpv("sys-apps/foo-1")).is_empty());
        assert!(config.masked_flags(&cpv("sys-apps/bar-1")).contains("systemd"));
    }

    #[test]
    fn test_iuse_effective_with_injection() {
        let repo = TestRepo::new();
        repo.profile(
            "a",
            "make.defaults",
            concat!(
                "IUSE_IMPLICIT=\"prefix test\"\n",
                "USE_EXPAND=\"ABI_X86 ELIBC\"\n",
                "USE_EXPAND_IMPLICIT=\"ARCH ELIBC\"\n",
                "USE_EXPAND_UNPREFIXED=\"ARCH\"\n",
                "USE_EXPAND_VALUES_ARCH=\"amd64 arm64\"\n",
                "USE_EXPAND_VALUES_ELIBC=\"glibc musl\"\n",
            ),
        )
        .profile("b", "parent", "../a\n")
        .profile("b", "eapi", "5\n");

        let stack = repo.resolve("b");
        assert_eq!(
            sorted(stack.iuse_effective().unwrap()),
            vec!["amd64", "arm64", "elibc_glibc", "elibc_musl", "prefix", "test"]
        );
    }

    #[test]
    fn test_iuse_effective_without_injection() {
        let repo = TestRepo::new();
        repo.profile(
            "a",
            "make.defaults",
            "USE_EXPAND=\"ELIBC\"\nUSE_EXPAND_VALUES_ELIBC=\"glibc\"\nIUSE_IMPLICIT=\"prefix\"\n",
        );

        let config = repo.config().with_arches(["amd64", "x86"]);
        let stack = ProfileManager::new(config).resolve("a").unwrap();
        assert_eq!(
            sorted(stack.iuse_effective().unwrap()),
            vec!["amd64", "elibc_glibc", "x86"]
        );
    }

    #[test]
    fn test_use_flags_include_use_expand() {
        let repo = TestRepo::new();
        repo.profile("a", "make.defaults", "USE=\"a b\"\nUSE_EXPAND=\"VIDEO_CARDS\"\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "make.defaults", "USE=\"-a c\"\nVIDEO_CARDS=\"intel amdgpu\"\n");

        let stack = repo.resolve("b");
        assert_eq!(
            stack.use_flags().unwrap(),
            vec!["a", "b", "-a", "c", "video_cards_intel", "video_cards_amdgpu"]
        );
        assert_eq!(stack.use_expand().unwrap().len(), 1);
    }

    #[test]
    fn test_bashrcs_and_pkg_provided() {
        let repo = TestRepo::new();
        repo.profile("a", "profile.bashrc", "true\n")
            .profile("a", "package.provided", "sys-kernel/linux_headers-6.6\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "profile.bashrc", "true\n");

        let stack = repo.resolve("b");
        let bashrcs = stack.bashrcs();
        assert_eq!(bashrcs.len(), 2);
        assert!(bashrcs[0].ends_with("a/profile.bashrc"));
        assert_eq!(stack.pkg_provided().unwrap(), &[cpv("sys-kernel/linux_headers-6.6")]);
    }

    #[test]
    fn test_skipped_lines_surface_as_diagnostics() {
        let repo = TestRepo::new();
        repo.profile("a", "package.mask", "sys-apps/foo\nnot/valid/atom!\n")
            .profile("b", "parent", "../a\n")
            .profile("b", "package.use", "sys-apps/foo\n");

        let stack = repo.resolve("b");
        stack.masks().unwrap();
        stack.pkg_use().unwrap();
        let diagnostics = stack.diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].lineno, 2);
        assert_eq!(diagnostics[1].message, "missing USE flag(s)");
    }

    #[test]
    fn test_invalidate_rereads_every_file() {
        let repo = TestRepo::new();
        repo.profile("a", "make.defaults", "ARCH=\"x86\"\n")
            .profile("a", "package.mask", "dev-lang/old\n")
            .profile("b", "parent", "../a\n");

        let mut stack = repo.resolve("b");
        let snapshot = |stack: &ProfileStack| {
            (
                stack.default_env().unwrap()["ARCH"].clone(),
                stack.nodes()[0].make_defaults().unwrap()["ARCH"].clone(),
                atoms(stack.masks().unwrap()),
            )
        };
        let old = ("x86".to_string(), "x86".to_string(), vec!["dev-lang/old".to_string()]);
        assert_eq!(snapshot(&stack), old);

        repo.profile("a", "make.defaults", "ARCH=\"amd64\"\n")
            .profile("a", "package.mask", "dev-lang/new\n");
        // Parsed nodes keep what they read
        assert_eq!(snapshot(&stack), old);

        stack.invalidate().unwrap();
        let new = ("amd64".to_string(), "amd64".to_string(), vec!["dev-lang/new".to_string()]);
        assert_eq!(snapshot(&stack), new);
        assert_eq!(stack.effective_config().unwrap().get_var("ARCH"), Some("amd64"));
    }

    #[test]
    fn test_node_reads_make_defaults_once() {
        let repo = TestRepo::new();
        repo.profile("a", "make.defaults", "ARCH=\"x86\"\n");

        let manager = repo.manager();
        let first = manager.resolve("a").unwrap();
        assert_eq!(first.default_env().unwrap()["ARCH"], "x86");

        repo.profile("a", "make.defaults", "ARCH=\"amd64\"\n");
        let second = manager.resolve("a").unwrap();
        assert_eq!(second.default_env().unwrap()["ARCH"], "x86");

        manager.clear_cache();
        let third = manager.resolve("a").unwrap();
        assert_eq!(third.default_env().unwrap()["ARCH"], "amd64");
    }

    #[test]
    fn test_effective_config_serializes() {
        let repo = TestRepo::new();
        repo.profile("a", "make.defaults", "FEATURES=\"sandbox\"\n")
            .profile("a", "package.deprecated", "dev-lang/python2\n");

        let stack = repo.resolve("a");
        let config = stack.effective_config().unwrap();
        assert!(config.is_deprecated_package(&cpv("dev-lang/python2-2.7")));

        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["profile"], "a");
        assert_eq!(json["default_env"]["FEATURES"], "sandbox");
        assert!(json["deprecated"].is_null());
    }
}
