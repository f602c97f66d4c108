//! Splitting SQL files into independently executable statements.
//!
//! Statement boundaries are driven by comments, not by SQL syntax:
//!
//! - a comment starting at column 0 (`-- ...`) ends the current statement;
//!   the next code line starts a new one,
//! - code lines that follow each other (blank lines in between are allowed)
//!   belong to the same statement,
//! - indented comments are dropped without ending the statement,
//! - `-- ignore-error: CODE[, CODE...]` attaches SQLSTATE codes to the next
//!   statement.
//!
//! Semicolons, string literals and dollar quoting are not interpreted.

use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};

use crate::{PgError, PgResult, Query};

const IGNORE_ERROR_DIRECTIVE: &str = "-- ignore-error:";

/// One statement of a SQL file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlStatement {
    /// Statement text, comment lines removed.
    pub text: String,
    /// 1-based line on which the statement starts.
    pub line_no: usize,
    /// SQLSTATE codes tolerated for this statement.
    pub ignore_error_codes: Vec<String>,
}

impl SqlStatement {
    /// Converts the statement into a batch [`Query`].
    pub fn to_query(&self) -> Query {
        Query::batch(self.text.clone()).ignore_error_codes(self.ignore_error_codes.iter().cloned())
    }
}

impl From<SqlStatement> for Query {
    fn from(statement: SqlStatement) -> Self {
        Query::batch(statement.text).ignore_error_codes(statement.ignore_error_codes)
    }
}

/// Splits the content of a SQL file into statements.
pub fn split_sql_text(text: &str) -> Vec<SqlStatement> {
    let mut statements: Vec<SqlStatement> = Vec::new();
    let mut pending_codes: Vec<String> = Vec::new();
    let mut after_boundary = true;

    for (i, line) in text.lines().enumerate() {
        if let Some(codes) = line.strip_prefix(IGNORE_ERROR_DIRECTIVE) {
            pending_codes.extend(
                codes
                    .split(',')
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(str::to_owned),
            );
        }

        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with("--") {
            after_boundary = true;
            continue;
        }

        let is_comment = line.trim_start().starts_with("--");
        if !is_comment {
            match statements.last_mut() {
                Some(current) if !after_boundary => {
                    current.text.push('\n');
                    current.text.push_str(line);
                }
                _ => statements.push(SqlStatement {
                    text: line.to_owned(),
                    line_no: i + 1,
                    ignore_error_codes: std::mem::take(&mut pending_codes),
                }),
            }
        }

        after_boundary = false;
    }

    statements.retain(|statement| !statement.text.trim().is_empty());
    statements
}

/// Reads a SQL file and splits it into batch queries.
pub fn read_sql_file(path: impl AsRef<Path>) -> PgResult<Vec<Query>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| PgError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(split_sql_text(&content)
        .into_iter()
        .map(Query::from)
        .collect())
}

/// Reads every `.sql` file of a directory, in file name order.
pub fn read_sql_files_in_dir(dir: impl AsRef<Path>) -> PgResult<Vec<Query>> {
    let dir = dir.as_ref();
    let files = sql_files_in_dir(dir).map_err(|source| PgError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut queries = Vec::new();
    for path in files {
        queries.extend(read_sql_file(&path)?);
    }

    Ok(queries)
}

/// Lists the `.sql` files of a directory sorted by file name.
pub(crate) fn sql_files_in_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI_QUERY_SAMPLE: &str = "
-- Query 1:
create table one (id int);

--
-- Query 2, multi line:
--

create table two (
  id int
);

-- Ignore error codes:
-- ignore-error: 1, 2, 3

select 'ok'

-- Comment inside query:

create table three (
  -- this is id:
  int id
)

";

    #[test]
    fn test_splits_and_removes_comments() {
        let result = split_sql_text(MULTI_QUERY_SAMPLE);

        assert_eq!(result.len(), 4);
        assert_eq!(
            result[0],
            SqlStatement {
                text: "create table one (id int);".into(),
                line_no: 3,
                ignore_error_codes: vec![],
            }
        );
        assert_eq!(
            result[1],
            SqlStatement {
                text: "create table two (\n  id int\n);".into(),
                line_no: 9,
                ignore_error_codes: vec![],
            }
        );
        assert_eq!(
            result[2],
            SqlStatement {
                text: "select 'ok'".into(),
                line_no: 16,
                ignore_error_codes: vec!["1".into(), "2".into(), "3".into()],
            }
        );
        assert_eq!(
            result[3],
            SqlStatement {
                text: "create table three (\n  int id\n)".into(),
                line_no: 20,
                ignore_error_codes: vec![],
            }
        );
    }

    #[test]
    fn test_blank_lines_do_not_split() {
        let result = split_sql_text("select 1,\n\n  2");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "select 1,\n  2");
        assert_eq!(result[0].line_no, 1);
    }

    #[test]
    fn test_leading_indented_comment() {
        let result = split_sql_text("  -- note\nselect 1");

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].text, "select 1");
        assert_eq!(result[0].line_no, 2);
    }

    #[test]
    fn test_crlf_line_endings() {
        let result = split_sql_text("-- a\r\nselect 1\r\n-- b\r\nselect 2\r\n");

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].text, "select 1");
        assert_eq!(result[1].text, "select 2");
        assert_eq!(result[1].line_no, 4);
    }

    #[test]
    fn test_empty_directive_adds_no_codes() {
        let result = split_sql_text("-- ignore-error:\nselect 1");

        assert_eq!(result.len(), 1);
        assert!(result[0].ignore_error_codes.is_empty());
    }

    #[test]
    fn test_comment_only_input() {
        assert!(split_sql_text("-- nothing here\n\n--").is_empty());
        assert!(split_sql_text("").is_empty());
    }

    #[test]
    fn test_statement_converts_to_batch_query() {
        let statement = SqlStatement {
            text: "create table t ()".into(),
            line_no: 1,
            ignore_error_codes: vec!["42P07".into()],
        };

        let query = statement.to_query();
        assert!(query.batch);
        assert!(query.ignores(Some("42P07")));
    }

    #[test]
    fn test_read_sql_files_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.sql"), "select 2").unwrap();
        fs::write(dir.path().join("a.sql"), "select 1\n-- next\nselect 11").unwrap();
        fs::write(dir.path().join("notes.txt"), "select 3").unwrap();

        let queries = read_sql_files_in_dir(dir.path()).unwrap();
        let texts: Vec<_> = queries.iter().map(|q| q.text.as_str()).collect();

        assert_eq!(texts, ["select 1", "select 11", "select 2"]);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_sql_file("/definitely/not/here.sql").unwrap_err();
        assert!(matches!(err, PgError::Io { .. }));
    }
}
