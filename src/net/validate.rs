//! Input validation and sanitization
//!
//! Usernames, chat messages and slash commands all pass through here
//! before touching the registry or the broker. Rejection (injection
//! patterns, reserved names, length) is distinct from sanitization
//! (HTML escaping, control-character stripping, whitespace collapse):
//! dangerous input is refused, merely messy input is cleaned.

use regex::Regex;
use std::sync::LazyLock;

static USERNAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());

static RESERVED_NAMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:admin|server|system|bot|null|undefined)$").unwrap());

static ALL_NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

static ONLY_PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[_.\-]+$").unwrap());

/// Patterns that indicate injection attempts. Matching input is
/// rejected outright, never sanitized into acceptability.
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<script[^>]*>",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"\\x[0-9a-fA-F]{2}",
        r"\\u[0-9a-fA-F]{4}",
        r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Outcome of validating one input. `sanitized_value` is present even
/// for invalid input so callers can log what was attempted.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub sanitized_value: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Nick(String),
}

pub struct InputValidator {
    max_username_length: usize,
    max_message_length: usize,
    strict_mode: bool,
}

impl InputValidator {
    pub fn new(max_username_length: usize, max_message_length: usize, strict_mode: bool) -> Self {
        Self {
            max_username_length,
            max_message_length,
            strict_mode,
        }
    }

    /// In strict mode a failed validation is terminal for the session
    /// instead of a dropped frame.
    pub fn strict(&self) -> bool {
        self.strict_mode
    }

    pub fn validate_username(&self, username: &str) -> ValidationResult {
        let mut result = ValidationResult::ok();

        if username.is_empty() || username.trim().is_empty() {
            result.add_error("username cannot be empty");
            return result;
        }

        let length = username.chars().count();
        if length > self.max_username_length {
            result.add_error(format!(
                "username too long (max {} characters)",
                self.max_username_length
            ));
        }
        if length < 2 {
            result.add_error("username must be at least 2 characters");
        }

        let mut sanitized = sanitize(username);

        // The character class runs before any trimming, so padded
        // names are rejected rather than silently cleaned up
        if !USERNAME_CHARS.is_match(&sanitized) {
            result.add_error(
                "username may only contain letters, digits, underscores, hyphens and dots",
            );
        } else {
            if RESERVED_NAMES.is_match(&sanitized) {
                result.add_error("username is reserved");
            }
            if ALL_NUMERIC.is_match(&sanitized) || ONLY_PUNCTUATION.is_match(&sanitized) {
                result.add_error("username uses an invalid pattern");
            }
        }

        // Injection check runs on the raw input, before escaping can
        // mask a pattern
        if contains_injection(username) {
            result.add_error("username contains potentially dangerous content");
        }

        if sanitized != sanitized.trim() {
            result.add_warning("username has leading or trailing whitespace");
            sanitized = sanitized.trim().to_string();
        }
        if sanitized.starts_with('.') {
            result.add_warning("username should not start with a dot");
        }
        if sanitized.ends_with('.') {
            result.add_warning("username should not end with a dot");
        }

        result.sanitized_value = Some(sanitized);
        result
    }

    pub fn validate_message(&self, message: &str) -> ValidationResult {
        let mut result = ValidationResult::ok();

        if message.is_empty() {
            result.add_error("message cannot be empty");
            return result;
        }

        if message.chars().count() > self.max_message_length {
            result.add_error(format!(
                "message too long (max {} characters)",
                self.max_message_length
            ));
        }

        if contains_injection(message) {
            result.add_error("message contains potentially dangerous content");
        }

        let sanitized = sanitize(message);
        if sanitized.trim().is_empty() {
            result.add_error("message cannot be only whitespace");
        }

        // Collapse whitespace runs and trim the ends
        let sanitized: String = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");

        if sanitized.contains(super::types::PROTOCOL_SEPARATOR) {
            result.add_warning("message contains the protocol separator character");
        }

        result.sanitized_value = Some(sanitized);
        result
    }

    /// Validate a slash command. Recognized verbs: `quit`, `help`,
    /// `nick <username>`. `quit` and `help` ignore arguments.
    pub fn validate_command(&self, command: &str) -> ValidationResult {
        let mut result = ValidationResult::ok();

        if command.is_empty() {
            result.add_error("command cannot be empty");
            return result;
        }
        let Some(stripped) = command.strip_prefix('/') else {
            result.add_error("commands must start with '/'");
            return result;
        };

        let (verb, args) = match stripped.split_once(' ') {
            Some((v, a)) => (v.to_ascii_lowercase(), a.trim()),
            None => (stripped.to_ascii_lowercase(), ""),
        };

        match verb.as_str() {
            "nick" => {
                if args.is_empty() {
                    result.add_error("nick requires a username argument");
                } else {
                    let username = self.validate_username(args);
                    if username.is_valid {
                        result.sanitized_value = Some(format!(
                            "nick {}",
                            username.sanitized_value.unwrap_or_else(|| args.to_string())
                        ));
                    } else {
                        for err in username.errors {
                            result.add_error(format!("invalid username: {err}"));
                        }
                    }
                }
            }
            "quit" | "help" => {
                if !args.is_empty() {
                    result.add_warning(format!("{verb} ignores arguments"));
                }
                result.sanitized_value = Some(verb);
            }
            other => {
                result.add_error(format!("unknown command: /{other}"));
            }
        }

        if result.sanitized_value.is_none() {
            result.sanitized_value = Some(command.to_string());
        }
        result
    }

    /// Parse a validated command into its variant. Returns `None` for
    /// anything `validate_command` would reject.
    pub fn parse_command(&self, command: &str) -> Option<Command> {
        let result = self.validate_command(command);
        if !result.is_valid {
            return None;
        }
        let sanitized = result.sanitized_value?;
        match sanitized.split_once(' ') {
            Some(("nick", name)) => Some(Command::Nick(name.to_string())),
            None if sanitized == "quit" => Some(Command::Quit),
            None if sanitized == "help" => Some(Command::Help),
            _ => None,
        }
    }
}

/// Sanitize text: escape HTML metacharacters, strip ASCII control
/// characters and zero-width characters. Idempotent — already-escaped
/// entities are left alone.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text
        .chars()
        .filter(|&c| !is_stripped_char(c))
        .collect();

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '&' => {
                // The ampersand comes first so later escapes are not
                // re-escaped; an existing entity passes through intact
                if is_entity_at(&chars, i) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
        i += 1;
    }
    out
}

fn is_entity_at(chars: &[char], i: usize) -> bool {
    for entity in ["amp;", "lt;", "gt;"] {
        if chars[i + 1..]
            .iter()
            .zip(entity.chars())
            .filter(|(a, b)| **a == *b)
            .count()
            == entity.len()
        {
            return true;
        }
    }
    false
}

/// Control characters (minus tab/newline/CR, which framing handles)
/// and zero-width characters used for obfuscation.
fn is_stripped_char(c: char) -> bool {
    matches!(c,
        '\u{0000}'..='\u{0008}'
        | '\u{000B}'
        | '\u{000C}'
        | '\u{000E}'..='\u{001F}'
        | '\u{007F}'
        | '\u{200B}'..='\u{200D}'
        | '\u{FEFF}')
}

pub fn contains_injection(text: &str) -> bool {
    INJECTION_PATTERNS.iter().any(|p| p.is_match(text))
}
