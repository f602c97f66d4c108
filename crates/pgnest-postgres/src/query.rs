//! Query model shared by every client variant.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{PgError, PgResult};

/// Maximum number of characters of the query text used as a log label.
const LABEL_MAX_CHARS: usize = 100;

/// A decoded result row, keyed by column name in select-list order.
pub type Row = IndexMap<String, JsonValue>;

/// A statement together with its bound values and execution options.
///
/// Placeholders in `text` are positional (`$1`, `$2`, ...) and map to
/// `values` in order.
///
/// # Example
///
/// ```rust
/// use pgnest_postgres::Query;
///
/// let query = Query::new("select * from users where id = $1 and active = $2")
///     .bind(7)
///     .bind(true)
///     .with_name("find-user");
///
/// assert_eq!(query.values.len(), 2);
/// assert_eq!(query.label(), "find-user");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Statement text.
    pub text: String,
    /// Bound values, one per placeholder.
    #[serde(default)]
    pub values: Vec<JsonValue>,
    /// Optional label used in logs instead of the text.
    #[serde(default)]
    pub name: Option<String>,
    /// SQLSTATE codes that turn a failure into an empty result.
    #[serde(default)]
    pub ignore_error_codes: Vec<String>,
    /// Whether the text may hold several `;`-separated commands.
    ///
    /// Batch queries are sent with the simple query protocol and cannot
    /// carry bound values.
    #[serde(default)]
    pub batch: bool,
}

impl Query {
    /// Creates a query without bound values.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            values: Vec::new(),
            name: None,
            ignore_error_codes: Vec::new(),
            batch: false,
        }
    }

    /// Creates a batch query, executed with the simple query protocol.
    pub fn batch(text: impl Into<String>) -> Self {
        Self {
            batch: true,
            ..Self::new(text)
        }
    }

    /// Appends a bound value for the next placeholder.
    pub fn bind(mut self, value: impl Into<JsonValue>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Sets the label used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds SQLSTATE codes whose failures yield an empty result.
    pub fn ignore_error_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_error_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Returns whether a failure with the given SQLSTATE code is tolerated.
    pub fn ignores(&self, code: Option<&str>) -> bool {
        code.is_some_and(|code| self.ignore_error_codes.iter().any(|c| c == code))
    }

    /// Returns the label used in logs and error messages.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }

        match self.text.char_indices().nth(LABEL_MAX_CHARS) {
            Some((end, _)) => format!("{}...", &self.text[..end]),
            None => self.text.clone(),
        }
    }

    /// Returns the leading keyword of the statement, upper-cased.
    pub(crate) fn command(&self) -> String {
        self.text
            .split_whitespace()
            .next()
            .map(|word| word.trim_end_matches(';').to_ascii_uppercase())
            .unwrap_or_default()
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&Query> for Query {
    fn from(query: &Query) -> Self {
        query.clone()
    }
}

/// Quotes a name so it can be used as a SQL identifier.
///
/// Embedded double quotes are doubled. Empty names and names containing NUL
/// are rejected.
pub fn escape_identifier(name: &str) -> PgResult<String> {
    if name.is_empty() {
        return Err(PgError::Config("identifier cannot be empty".into()));
    }

    if name.contains('\0') {
        return Err(PgError::Config(format!(
            "identifier {name:?} contains a NUL character"
        )));
    }

    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_truncates_long_text() {
        let text = "x".repeat(150);
        let query = Query::new(text);
        let label = query.label();

        assert_eq!(label.len(), 103);
        assert!(label.ends_with("..."));
        assert_eq!(Query::new("select 1").label(), "select 1");
    }

    #[test]
    fn test_label_prefers_name() {
        let query = Query::new("select 1").with_name("ping");
        assert_eq!(query.label(), "ping");
    }

    #[test]
    fn test_ignores_only_declared_codes() {
        let query = Query::new("create table t ()").ignore_error_codes(["42P07"]);

        assert!(query.ignores(Some("42P07")));
        assert!(!query.ignores(Some("42601")));
        assert!(!query.ignores(None));
    }

    #[test]
    fn test_command_keyword() {
        assert_eq!(Query::new("  select 1").command(), "SELECT");
        assert_eq!(Query::batch("commit;").command(), "COMMIT");
        assert_eq!(Query::new("").command(), "");
    }

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("test").unwrap(), "\"test\"");
        assert_eq!(escape_identifier("we\"ird").unwrap(), "\"we\"\"ird\"");
        assert!(escape_identifier("").is_err());
        assert!(escape_identifier("a\0b").is_err());
    }
}
