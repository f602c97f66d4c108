//! Consistency checks between migrations on disk and the history table.
//!
//! Disk and history are matched by name. A disk migration whose sequence
//! slot is taken in the history by a differently named migration is drift.

use std::collections::HashMap;

use super::MigrationRecord;

/// Width of the zero-padded sequence prefix.
const PREFIX_DIGITS: usize = 3;

/// Inconsistency between migrations on disk and applied migrations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The file does not start with its 1-based sequence number.
    #[error("migration {name}: prefix should match sequence number of migration ({expected})")]
    SequencePrefix { name: String, expected: String },

    /// Another migration was applied in this sequence slot.
    #[error("migration {name}: name did not matched previously logged migration ({logged})")]
    NameMismatch { name: String, logged: String },

    /// The file changed after it was applied.
    #[error("migration {name}: content of migration did not match previously logged migration")]
    HashMismatch { name: String },

    /// An applied migration no longer exists on disk.
    #[error("migration {name}: previously logged migration is missing on disk")]
    MissingOnDisk { name: String },
}

fn sequence_prefix(position: usize) -> String {
    format!("{:0width$}_", position, width = PREFIX_DIGITS)
}

fn sequence_slot(name: &str) -> Option<&str> {
    name.get(..=PREFIX_DIGITS)
}

/// Checks disk migrations against the history, both in name order.
///
/// Returns the first violation found.
pub fn validate_state(
    disk: &[MigrationRecord],
    history: &[MigrationRecord],
) -> Result<(), ValidationError> {
    let logged: HashMap<&str, &MigrationRecord> =
        history.iter().map(|record| (record.name.as_str(), record)).collect();

    for (i, migration) in disk.iter().enumerate() {
        let expected = sequence_prefix(i + 1);
        if !migration.name.starts_with(&expected) {
            return Err(ValidationError::SequencePrefix {
                name: migration.name.clone(),
                expected,
            });
        }

        match logged.get(migration.name.as_str()) {
            Some(record) if record.hash != migration.hash => {
                return Err(ValidationError::HashMismatch {
                    name: migration.name.clone(),
                });
            }
            Some(_) => {}
            None => {
                let conflict = history
                    .iter()
                    .find(|record| sequence_slot(&record.name) == Some(expected.as_str()));
                if let Some(record) = conflict {
                    return Err(ValidationError::NameMismatch {
                        name: migration.name.clone(),
                        logged: record.name.clone(),
                    });
                }
            }
        }
    }

    let on_disk: Vec<&str> = disk.iter().map(|m| m.name.as_str()).collect();
    if let Some(orphan) = history.iter().find(|record| !on_disk.contains(&record.name.as_str())) {
        return Err(ValidationError::MissingOnDisk {
            name: orphan.name.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, hash: &str) -> MigrationRecord {
        MigrationRecord::new(name, hash)
    }

    #[test]
    fn test_valid_state() {
        let disk = [record("001_one.sql", "a"), record("002_two.sql", "b")];
        let history = [record("001_one.sql", "a")];

        assert_eq!(validate_state(&disk, &history), Ok(()));
        assert_eq!(validate_state(&disk, &[]), Ok(()));
        assert_eq!(validate_state(&[], &[]), Ok(()));
    }

    #[test]
    fn test_gap_in_sequence() {
        let disk = [record("001_one.sql", "a"), record("003_two.sql", "b")];
        let err = validate_state(&disk, &[]).unwrap_err();

        assert_eq!(
            err,
            ValidationError::SequencePrefix {
                name: "003_two.sql".into(),
                expected: "002_".into(),
            }
        );
        assert_eq!(
            err.to_string(),
            "migration 003_two.sql: prefix should match sequence number of migration (002_)"
        );
    }

    #[test]
    fn test_orphaned_history_record() {
        let err = validate_state(&[], &[record("001_one.sql", "a")]).unwrap_err();

        assert_eq!(
            err.to_string(),
            "migration 001_one.sql: previously logged migration is missing on disk"
        );
    }

    #[test]
    fn test_changed_content() {
        let disk = [record("001_one.sql", "new")];
        let history = [record("001_one.sql", "old")];

        assert_eq!(
            validate_state(&disk, &history),
            Err(ValidationError::HashMismatch {
                name: "001_one.sql".into()
            })
        );
    }

    #[test]
    fn test_renamed_migration() {
        let disk = [record("001_renamed.sql", "a")];
        let history = [record("001_one.sql", "a")];
        let err = validate_state(&disk, &history).unwrap_err();

        assert_eq!(
            err.to_string(),
            "migration 001_renamed.sql: name did not matched previously logged migration (001_one.sql)"
        );
    }
}
