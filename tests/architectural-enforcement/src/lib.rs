//! Architectural Enforcement
//!
//! Source scans that enforce workspace-wide rules on production code:
//! - No sleep calls (hung backends are bounded by timeouts, never waited out)
//! - No panicking shortcuts (errors are propagated as typed results)
//!
//! Test modules (`#[cfg(test)]` to end of file) and integration test
//! directories are not production code and are not scanned.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["switchyard/core/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file under the production roots
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files: Vec<PathBuf> = PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| walkdir::WalkDir::new(dir).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Code portion of a line (everything before a `//` comment)
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// `(line number, line)` pairs up to the first `#[cfg(test)]`
pub fn production_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line))
}

/// Scan every production file, reporting lines whose code part matches
#[must_use]
pub fn find_violations(matches: impl Fn(&str) -> bool) -> Vec<String> {
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line_number, line) in production_lines(&content) {
            if matches(code_part(line)) {
                violations.push(format!("{}:{} - {}", path.display(), line_number, line.trim()));
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
        assert_eq!(code_part("/// docs"), "");
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
        let lines: Vec<_> = production_lines(source).collect();
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_production_sources_found() {
        let files = production_files();
        assert!(
            files.iter().any(|f| f.ends_with("routing/dispatcher.rs")),
            "expected to find the dispatcher under {:?}",
            PRODUCTION_DIRS
        );
    }
}
