//! Jail soundness: every accepted path resolves under the workspace root
//! with no traversal, symlink, or restricted-prefix component, and hostile
//! URLs are always refused.

use containerization_assist::common::Jail;
use proptest::prelude::*;
use tempfile::TempDir;

fn jail() -> (TempDir, Jail) {
    let dir = TempDir::new().unwrap();
    let jail = Jail::new(dir.path()).unwrap();
    (dir, jail)
}

proptest! {
    /// Any accepted path lies under the workspace root.
    #[test]
    fn accepted_paths_stay_under_root(segments in proptest::collection::vec("[a-zA-Z0-9._-]{1,12}", 1..5)) {
        let (dir, jail) = jail();
        let candidate = segments.join("/");
        if let Ok(resolved) = jail.secure_target(&candidate) {
            prop_assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
        }
    }

    /// A path containing a parent-dir component is never accepted.
    #[test]
    fn parent_components_always_rejected(
        prefix in "[a-z]{0,8}",
        suffix in "[a-z]{0,8}",
    ) {
        let (_dir, jail) = jail();
        let candidate = if prefix.is_empty() {
            format!("../{}", suffix)
        } else {
            format!("{}/../{}", prefix, suffix)
        };
        prop_assert!(jail.secure_target(&candidate).is_err());
    }

    /// URLs with any forbidden metacharacter are always refused.
    #[test]
    fn hostile_urls_always_rejected(
        host in "[a-z]{3,10}",
        bad in prop::sample::select(vec!["..", "~", "$(", "`", "|", ";", "&", "<", ">", "${"]),
    ) {
        let (_dir, jail) = jail();
        let url = format!("https://{}.example.com/path{}more", host, bad);
        prop_assert!(jail.validate_url(&url).is_err());
    }
}

#[test]
fn absolute_escapes_rejected() {
    let (_dir, jail) = jail();
    for path in ["/etc/passwd", "/root/.ssh/id_rsa", "/proc/self/environ", "/var/log/syslog"] {
        let err = jail.secure_target(path).unwrap_err();
        assert!(
            err.message.contains("outside workspace root"),
            "{} should be outside: {}",
            path,
            err.message
        );
    }
}

#[test]
fn scenario_read_etc_passwd() {
    // tools/call read_file {path:"../etc/passwd"} must fail with a message
    // naming the workspace boundary
    let (_dir, jail) = jail();
    let err = jail.secure_target("../etc/passwd").unwrap_err();
    assert_eq!(err.kind, containerization_assist::ErrorKind::InvalidArgument);
    assert!(err.message.contains("outside workspace root"));
}

#[test]
fn file_scheme_rejected_case_insensitively() {
    let (_dir, jail) = jail();
    assert!(jail.validate_url("file:///x").is_err());
    assert!(jail.validate_url("FILE:///x").is_err());
    assert!(jail.validate_url("File://host/share").is_err());
    assert!(jail.validate_url("https://registry.example.com/v2/image").is_ok());
}

#[cfg(unix)]
#[test]
fn symlink_components_rejected_even_when_target_is_inside() {
    let (dir, jail) = jail();
    std::fs::create_dir(dir.path().join("real")).unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
    // even an inside-pointing symlink is refused by default
    assert!(jail.secure_target("alias/file.txt").is_err());
    assert!(jail.secure_target("real/file.txt").is_ok());
}

#[test]
fn git_wrapping_neutralises_hooks_and_screens_args() {
    let (_dir, jail) = jail();
    let wrapped = jail
        .wrap_git_args(["clone", "--depth", "1", "https://github.com/org/repo.git"])
        .unwrap();
    assert_eq!(wrapped[1].split('=').next(), Some("core.hooksPath"));
    assert!(wrapped.contains(&"protocol.file.allow=never".to_string()));
    assert!(jail.wrap_git_args(["clone", "../up"]).is_err());
}
