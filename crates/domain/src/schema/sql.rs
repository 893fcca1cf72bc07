//! Small SQL-text helpers shared by the catalog and the gateway.

/// Escape single quotes by doubling them, for use inside `'…'` literals.
pub fn escape(s: &str) -> String {
    s.replace('\'', "''")
}

/// Render a string as a quoted SQL literal.
pub fn quote(s: &str) -> String {
    format!("'{}'", escape(s))
}

/// Wrap an identifier in backticks.
pub fn ident(name: &str) -> String {
    format!("`{name}`")
}

/// Sanitize a name for use in bare engine identifiers: spaces and hyphens
/// become underscores. UUIDs keep their hyphens everywhere else (API ids,
/// SQL string literals).
pub fn sanitize_name(name: &str) -> String {
    name.replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_quotes() {
        assert_eq!(escape("it's"), "it''s");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn quote_wraps_and_escapes() {
        assert_eq!(quote("a'b"), "'a''b'");
    }

    #[test]
    fn sanitize_replaces_hyphens_and_spaces() {
        assert_eq!(
            sanitize_name("f47ac10b-58cc-4372-a567-0e02b2c3d479"),
            "f47ac10b_58cc_4372_a567_0e02b2c3d479"
        );
        assert_eq!(sanitize_name("my rule"), "my_rule");
    }
}
