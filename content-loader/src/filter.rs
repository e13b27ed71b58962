use regex::{Regex, RegexBuilder};
use tracing::error;

/// Tests a source filter against an item's title and content.
///
/// An empty pattern disables filtering. A pattern that does not compile keeps
/// the item and logs the problem, so a typo never silently hides items.
pub fn matches(pattern: &str, title: &str, content: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return true;
    }

    match compile(pattern) {
        Ok(regex) => regex.is_match(title) || regex.is_match(content),
        Err(reason) => {
            error!("filter error: {} ({})", pattern, reason);
            true
        }
    }
}

/// Accepts both bare expressions and delimited ones such as `/breaking/i`.
pub fn compile(pattern: &str) -> Result<Regex, String> {
    let (body, flags) = split_delimited(pattern).unwrap_or((pattern, ""));

    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'U' => builder.swap_greed(true),
            'u' => &mut builder,
            other => return Err(format!("unknown modifier '{}'", other)),
        };
    }

    builder.build().map_err(|e| e.to_string())
}

fn split_delimited(pattern: &str) -> Option<(&str, &str)> {
    let delimiter = pattern.chars().next()?;
    if delimiter.is_alphanumeric() || delimiter.is_whitespace() || delimiter == '\\' {
        return None;
    }

    let closing = match delimiter {
        '(' => ')',
        '{' => '}',
        '[' => ']',
        '<' => '>',
        other => other,
    };

    let rest = &pattern[delimiter.len_utf8()..];
    let end = rest.rfind(closing)?;
    let flags = &rest[end + closing.len_utf8()..];
    if !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    Some((&rest[..end], flags))
}
