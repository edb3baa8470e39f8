//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors with `Result` and `?`. No
//! `unwrap()`, `expect()`, `panic!`, `todo!` or `unimplemented!`.
//! **Exceptions**: test code.

use architectural_enforcement::find_violations;

fn is_panicking_shortcut(code: &str) -> bool {
    [".unwrap()", ".expect(", "panic!(", "todo!(", "unimplemented!("]
        .iter()
        .any(|needle| code.contains(needle))
}

#[test]
fn test_no_panicking_shortcuts_in_production_code() {
    let violations = find_violations(is_panicking_shortcut);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Panicking shortcuts found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        panic!(
            "\nFound {} panic violation(s) in production code.\nPropagate the error instead!",
            violations.len()
        );
    }
}

#[test]
fn test_panic_detection() {
    assert!(is_panicking_shortcut("let v = map.get(k).unwrap();"));
    assert!(is_panicking_shortcut("x.expect(\"present\")"));
    assert!(!is_panicking_shortcut("let v = x.unwrap_or(0);"));
    assert!(!is_panicking_shortcut("let v = x.unwrap_or_else(Vec::new);"));
}
