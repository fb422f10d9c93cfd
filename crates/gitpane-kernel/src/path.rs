//! Path normalization for `/`-separated storage paths.
//!
//! Every backend addresses entries by slash-separated strings relative to
//! its root. `.`, `''`, `/` and `./` all name the root; `..` never climbs
//! above it.

/// Split a path into its normalized segments. The root has none.
pub fn segments(path: &str) -> Vec<&str> {
    let path = path.strip_prefix("./").unwrap_or(path);
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            part => out.push(part),
        }
    }
    out
}

/// Normalize to a relative path without leading or trailing separators.
pub fn normalize(path: &str) -> String {
    segments(path).join("/")
}

/// Normalize `path` relative to a root it may not climb out of.
///
/// `None` when a `..` would step above the root.
pub fn confine(path: &str) -> Option<String> {
    let path = path.strip_prefix("./").unwrap_or(path);
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop()?;
            }
            part => out.push(part),
        }
    }
    Some(out.join("/"))
}

pub fn is_root(path: &str) -> bool {
    segments(path).is_empty()
}

/// Join path fragments with single separators.
///
/// A leading `/` on the first non-root fragment is kept so absolute store
/// paths (`/repo/file`) stay absolute; `.` fragments are dropped.
pub fn join<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut absolute = false;
    let mut pieces: Vec<String> = Vec::new();
    for part in parts {
        let part = part.as_ref();
        if pieces.is_empty() && part.starts_with('/') {
            absolute = true;
        }
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            continue;
        }
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        pieces.push(trimmed.to_string());
    }
    let joined = pieces.join("/");
    let joined = collapse_separators(&joined);
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Split off the final segment: `a/b/c` → (`a/b`, `c`). `None` for the root.
pub fn split_parent(path: &str) -> Option<(String, String)> {
    let mut segs = segments(path);
    let name = segs.pop()?;
    Some((segs.join("/"), name.to_string()))
}

/// Final segment of a path, or `""` for the root.
pub fn file_name(path: &str) -> &str {
    segments(path).last().copied().unwrap_or("")
}

fn collapse_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_slash {
                out.push(c);
            }
            last_slash = true;
        } else {
            out.push(c);
            last_slash = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case::dot(".", "")]
    #[case::empty("", "")]
    #[case::slash("/", "")]
    #[case::dot_slash("./", "")]
    #[case::leading_dot_slash("./src/main.rs", "src/main.rs")]
    #[case::absolute("/repo/a.txt", "repo/a.txt")]
    #[case::doubled("a//b///c", "a/b/c")]
    #[case::inner_dot("a/./b", "a/b")]
    #[case::parent("a/b/../c", "a/c")]
    #[case::parent_at_root("../../etc", "etc")]
    fn normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input), expected);
    }

    #[rstest]
    #[case::repo_relative(&["/demo", "src/lib.rs"], "/demo/src/lib.rs")]
    #[case::dot_base(&[".", "src/lib.rs"], "src/lib.rs")]
    #[case::dot_git(&[".", ".git"], ".git")]
    #[case::slashes(&["a/", "/b/", "c"], "a/b/c")]
    #[case::all_root(&[".", ""], ".")]
    fn joins(#[case] parts: &[&str], #[case] expected: &str) {
        assert_eq!(join(parts.iter().copied()), expected);
    }

    #[test]
    fn split_parent_of_nested_and_root() {
        assert_eq!(
            split_parent("a/b/c.txt"),
            Some(("a/b".to_string(), "c.txt".to_string()))
        );
        assert_eq!(split_parent("top"), Some((String::new(), "top".to_string())));
        assert_eq!(split_parent("./"), None);
    }

    #[rstest]
    #[case::plain("docs/a.md", Some("docs/a.md"))]
    #[case::inner_parent("docs/../a.md", Some("a.md"))]
    #[case::absolute("/a.md", Some("a.md"))]
    #[case::escapes("../other/secret.txt", None)]
    #[case::escapes_late("docs/../../other", None)]
    fn confines(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(confine(input).as_deref(), expected);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(path in "[a-z./]{0,24}") {
            let once = normalize(&path);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert!(!once.starts_with('/'));
            prop_assert!(!once.contains("//"));
        }
    }
}
