//! Input validation tests
//!
//! Run with: cargo test --test validator_test

use lanchat::net::validate::{Command, InputValidator, contains_injection, sanitize};

fn validator() -> InputValidator {
    InputValidator::new(50, 1000, false)
}

// =============================================================================
// USERNAME TESTS
// =============================================================================

#[test]
fn test_username_accepts_allowed_charset() {
    for name in ["alice", "Bob42", "under_score", "dot.ted", "dash-ed"] {
        let result = validator().validate_username(name);
        assert!(result.is_valid, "{name}: {:?}", result.errors);
        assert_eq!(result.sanitized_value.as_deref(), Some(name));
    }
}

#[test]
fn test_username_rejects_bad_charset() {
    for name in ["al ice", "héllo", "semi;colon", "quote'name", "tab\tname"] {
        assert!(!validator().validate_username(name).is_valid, "{name}");
    }
}

#[test]
fn test_username_reserved_names_case_insensitive() {
    for name in ["admin", "Admin", "SERVER", "System", "BOT", "Null", "UNDEFINED"] {
        let result = validator().validate_username(name);
        assert!(!result.is_valid, "{name} must be reserved");
    }
}

#[test]
fn test_username_degenerate_patterns() {
    // Purely numeric and punctuation-only names are not identities
    for name in ["0", "007", "123456789", "_", "__", "..", "--", "._-"] {
        assert!(!validator().validate_username(name).is_valid, "{name}");
    }
}

#[test]
fn test_username_exact_boundary_lengths() {
    let v = validator();
    let at_max = "x".repeat(50);
    let over_max = "x".repeat(51);

    assert!(v.validate_username(&at_max).is_valid);
    assert!(!v.validate_username(&over_max).is_valid);
    assert!(!v.validate_username("").is_valid);
    assert!(!v.validate_username("x").is_valid);
    assert!(v.validate_username("xy").is_valid);
}

#[test]
fn test_username_whitespace_rejected_but_warned_and_trimmed() {
    // Padding fails the character class; the warning and the trimmed
    // sanitized value are still reported for the caller's logs
    let result = validator().validate_username(" alice ");
    assert!(!result.is_valid);
    assert!(!result.warnings.is_empty());
    assert_eq!(result.sanitized_value.as_deref(), Some("alice"));
}

// =============================================================================
// MESSAGE TESTS
// =============================================================================

#[test]
fn test_message_exact_boundary_lengths() {
    let v = validator();
    assert!(v.validate_message(&"m".repeat(1000)).is_valid);
    assert!(!v.validate_message(&"m".repeat(1001)).is_valid);
    assert!(!v.validate_message("").is_valid);
}

#[test]
fn test_message_injection_set() {
    for msg in [
        "<script>alert('x')</script>",
        "<ScRiPt type=text/javascript>",
        "click javascript:alert(1)",
        "x onload = evil()",
        "escaped \\x3c char",
        "escaped \\u003c char",
    ] {
        assert!(contains_injection(msg), "{msg}");
        assert!(!validator().validate_message(msg).is_valid, "{msg}");
    }
}

#[test]
fn test_message_plain_text_untouched() {
    let result = validator().validate_message("just a normal sentence.");
    assert!(result.is_valid);
    assert!(result.warnings.is_empty());
    assert_eq!(
        result.sanitized_value.as_deref(),
        Some("just a normal sentence.")
    );
}

#[test]
fn test_message_html_escape_order() {
    // Ampersand first, so the escapes themselves are not re-escaped
    let result = validator().validate_message("a & b < c > d");
    assert_eq!(
        result.sanitized_value.as_deref(),
        Some("a &amp; b &lt; c &gt; d")
    );
}

#[test]
fn test_message_control_chars_stripped() {
    let result = validator().validate_message("a\u{200B}b\u{FEFF}c");
    assert!(result.is_valid);
    assert_eq!(result.sanitized_value.as_deref(), Some("abc"));
}

#[test]
fn test_message_whitespace_collapse() {
    let result = validator().validate_message("  spaced \t out   text \r ");
    assert_eq!(result.sanitized_value.as_deref(), Some("spaced out text"));
}

// =============================================================================
// SANITIZE IDEMPOTENCE
// =============================================================================

#[test]
fn test_sanitize_is_idempotent() {
    let inputs = [
        "plain",
        "a < b",
        "x & y",
        "already &amp; escaped",
        "mixed &lt; and < raw",
        "zero\u{200B}width",
        "trailing &",
        "&",
        "&&&",
    ];
    for input in inputs {
        let once = sanitize(input);
        let twice = sanitize(&once);
        assert_eq!(once, twice, "sanitize not idempotent for {input:?}");
    }
}

// =============================================================================
// COMMAND TESTS
// =============================================================================

#[test]
fn test_command_verbs() {
    let v = validator();
    assert_eq!(v.parse_command("/quit"), Some(Command::Quit));
    assert_eq!(v.parse_command("/QUIT"), Some(Command::Quit));
    assert_eq!(v.parse_command("/help"), Some(Command::Help));
    assert_eq!(
        v.parse_command("/nick neo"),
        Some(Command::Nick("neo".into()))
    );
}

#[test]
fn test_command_requires_slash() {
    let result = validator().validate_command("quit");
    assert!(!result.is_valid);
}

#[test]
fn test_command_unknown_verb() {
    assert!(!validator().validate_command("/teleport home").is_valid);
}

#[test]
fn test_nick_argument_validated_as_username() {
    let v = validator();
    assert!(!v.validate_command("/nick admin").is_valid);
    assert!(!v.validate_command("/nick 12345").is_valid);
    assert!(!v.validate_command("/nick").is_valid);
    assert!(v.validate_command("/nick morpheus").is_valid);
}

#[test]
fn test_quit_and_help_ignore_arguments_with_warning() {
    for cmd in ["/quit later", "/help me please"] {
        let result = validator().validate_command(cmd);
        assert!(result.is_valid, "{cmd}");
        assert!(!result.warnings.is_empty(), "{cmd}");
    }
}
