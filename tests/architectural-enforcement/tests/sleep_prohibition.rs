//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep. A hung backend is cut off
//! by `tokio::time::timeout`, and cool-downs are measured lazily from
//! timestamps; nothing in the dispatch path ever waits on a timer.
//! **Exceptions**: test code.

use architectural_enforcement::find_violations;

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_violations(is_sleep_call);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - tokio::time::timeout() to bound a backend call");
        eprintln!("  - Instant comparisons for windows and cool-downs");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("std::thread::sleep(d);"));
    assert!(!is_sleep_call("tokio::time::timeout(budget, call).await"));
}
