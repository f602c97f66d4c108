//! Migration files on disk and their content fingerprint.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};

use super::{MigrationError, MigrationRecord};
use crate::sql_files::sql_files_in_dir;
use crate::{SqlStatement, split_sql_text};

/// Fingerprint of a migration's content.
///
/// Lines are trimmed, empty lines dropped and the rest joined with `,`
/// before hashing with MD5. The digest is encoded as standard base64.
/// Whitespace-only edits keep the fingerprint unchanged.
pub fn content_hash(content: &str) -> String {
    let normalized = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(",");

    STANDARD.encode(Md5::digest(normalized.as_bytes()))
}

/// A migration file read from the migrations folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskMigration {
    /// File name, such as `001_create_users.sql`.
    pub name: String,
    /// Path the migration was read from.
    pub path: PathBuf,
    content: String,
    statements: Vec<SqlStatement>,
}

impl DiskMigration {
    /// Creates a migration from its name and content.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let statements = split_sql_text(&content);

        Self {
            name: name.into(),
            path: path.into(),
            content,
            statements,
        }
    }

    /// Reads one migration file.
    ///
    /// Files without a UTF-8 file name are rejected, since the name is what
    /// the history records.
    pub fn read(path: &Path) -> Result<Self, MigrationError> {
        let read_error = |source: io::Error| MigrationError::Read {
            path: path.to_path_buf(),
            source,
        };

        let name = match path.file_name().map(|name| name.to_str()) {
            Some(Some(name)) => name.to_owned(),
            Some(None) => {
                let message = "migration file name is not valid UTF-8";
                return Err(read_error(io::Error::new(io::ErrorKind::InvalidData, message)));
            }
            None => {
                let message = "migration path has no file name";
                return Err(read_error(io::Error::new(io::ErrorKind::InvalidInput, message)));
            }
        };

        let content = fs::read_to_string(path).map_err(read_error)?;
        Ok(Self::new(name, path, content))
    }

    /// Reads every `.sql` file of a folder in file name order.
    pub fn read_from_folder(folder: &Path) -> Result<Vec<Self>, MigrationError> {
        let files = sql_files_in_dir(folder).map_err(|source| MigrationError::Read {
            path: folder.to_path_buf(),
            source,
        })?;

        files.iter().map(|path| Self::read(path)).collect()
    }

    /// Returns the fingerprint of the file content.
    pub fn hash(&self) -> String {
        content_hash(&self.content)
    }

    /// Returns the raw file content.
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the statements of the file in order.
    #[inline]
    pub fn statements(&self) -> &[SqlStatement] {
        &self.statements
    }

    /// Returns the history record this migration produces once applied.
    pub fn record(&self) -> MigrationRecord {
        MigrationRecord::new(&self.name, self.hash())
    }
}
