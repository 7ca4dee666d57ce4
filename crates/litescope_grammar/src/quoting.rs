//! Identifier quoting and SQL value formatting.

/// Words that need quoting when used in a name context, e.g. a table name.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS",
    "ASC", "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY",
    "CASE", "CAST", "CHECK", "COLLATE", "COMMIT", "CONSTRAINT", "CREATE",
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO",
    "DROP", "EACH", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "EXPLAIN",
    "FOR", "FOREIGN", "FROM", "GENERATED", "GROUP", "HAVING", "IF",
    "IMMEDIATE", "IN", "INDEX", "INITIALLY", "INSERT", "INSTEAD", "INTERSECT",
    "INTO", "IS", "ISNULL", "JOIN", "KEY", "LIKE", "LIMIT", "MATCH", "NO",
    "NOT", "NOTHING", "NOTNULL", "NULL", "OF", "ON", "OR", "ORDER", "OVER",
    "PRAGMA", "PRECEDING", "PRIMARY", "RAISE", "RECURSIVE", "REFERENCES",
    "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT",
    "ROLLBACK", "SAVEPOINT", "SELECT", "SET", "TABLE", "TEMPORARY", "THEN",
    "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED", "UNION", "UNIQUE",
    "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "WHEN", "WHERE", "WITHOUT",
];

pub fn is_reserved(word: &str) -> bool {
    RESERVED_KEYWORDS
        .iter()
        .any(|kw| kw.eq_ignore_ascii_case(word))
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Returns the identifier double-quoted and escaped if it needs quoting:
/// a reserved keyword, starts with a digit, or contains characters outside
/// word characters and the `allow` set. `force` always quotes.
pub fn quote_with(name: &str, force: bool, allow: &str) -> String {
    let needs = force
        || name.is_empty()
        || is_reserved(name)
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
        || name
            .chars()
            .any(|c| !is_word_char(c) && !allow.contains(c));
    if needs {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// Quotes the identifier if needed (reserved word, leading digit,
/// non-word characters).
pub fn quote(name: &str) -> String {
    quote_with(name, false, "")
}

/// Strips one level of `"` `'` `` ` `` `[]` quoting, undoubling the
/// delimiter for the first three forms. Unquoted input is returned as-is.
pub fn unquote(name: &str) -> String {
    let bytes = name.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        let sep = match (first, last) {
            (b'"', b'"') => Some('"'),
            (b'\'', b'\'') => Some('\''),
            (b'`', b'`') => Some('`'),
            (b'[', b']') => None,
            _ => return name.to_string(),
        };
        let inner = &name[1..name.len() - 1];
        return match sep {
            Some(c) => inner.replace(&format!("{c}{c}"), &c.to_string()),
            None => inner.to_string(),
        };
    }
    name.to_string()
}

/// Whether the string contains bytes unfit for an SQL text literal
/// (code points 0x00-0x1F or 0x7F-0xA0).
fn has_unprintable(value: &str) -> bool {
    value
        .chars()
        .any(|c| matches!(c as u32, 0x00..=0x1F | 0x7F..=0xA0))
}

/// Formats a text value for use in a generated statement like INSERT.
///
/// JSON-declared columns are normalized through a parse/serialize round
/// trip; values with unprintable characters render as X'..' hex blobs;
/// everything else is single-quoted with `''` doubling.
pub fn format_text(value: &str, declared_type: Option<&str>) -> String {
    if declared_type.is_some_and(|t| t.eq_ignore_ascii_case("JSON"))
        && let Ok(parsed) = serde_json::from_str::<serde_json::Value>(value)
        && let Ok(normalized) = serde_json::to_string(&parsed)
    {
        return format!("'{}'", normalized.replace('\'', "''"));
    }
    if has_unprintable(value) {
        return format!("X'{}'", hex::encode_upper(value.as_bytes()));
    }
    format!("'{}'", value.replace('\'', "''"))
}

/// Formats a BLOB for use in a generated statement.
pub fn format_blob(value: &[u8]) -> String {
    format!("X'{}'", hex::encode_upper(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_passes_plain_names() {
        assert_eq!(quote("customer"), "customer");
        assert_eq!(quote("customer_id2"), "customer_id2");
    }

    #[test]
    fn quote_wraps_reserved_and_odd_names() {
        assert_eq!(quote("table"), "\"table\"");
        assert_eq!(quote("ORDER"), "\"ORDER\"");
        assert_eq!(quote("2fast"), "\"2fast\"");
        assert_eq!(quote("my table"), "\"my table\"");
        assert_eq!(quote("has\"quote"), "\"has\"\"quote\"");
    }

    #[test]
    fn quote_force_always_quotes() {
        assert_eq!(quote_with("plain", true, ""), "\"plain\"");
    }

    #[test]
    fn quote_allow_set_is_honored() {
        assert_eq!(quote_with("a.b", false, "."), "a.b");
        assert_eq!(quote_with("a.b", false, ""), "\"a.b\"");
    }

    #[test]
    fn unquote_reverses_every_form() {
        assert_eq!(unquote("\"my \"\"table\"\"\""), "my \"table\"");
        assert_eq!(unquote("'it''s'"), "it's");
        assert_eq!(unquote("`back`"), "back");
        assert_eq!(unquote("[brackets]"), "brackets");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn unquote_quote_round_trips() {
        for name in ["customer", "my table", "ORDER", "2x", "has\"q"] {
            assert_eq!(unquote(&quote(name)), name);
        }
    }

    #[test]
    fn format_text_quotes_and_doubles() {
        assert_eq!(format_text("it's", None), "'it''s'");
    }

    #[test]
    fn format_text_hexes_unprintables() {
        assert_eq!(format_text("a\x01b", None), "X'610162'");
    }

    #[test]
    fn format_text_normalizes_json_columns() {
        assert_eq!(
            format_text("{\"a\": 1 }", Some("JSON")),
            "'{\"a\":1}'"
        );
        // Invalid JSON falls through to plain quoting.
        assert_eq!(format_text("not json", Some("JSON")), "'not json'");
    }
}
