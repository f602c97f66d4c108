//! Type definitions for database migration operations.
//!
//! This module contains data structures used to represent the state and
//! results of database migration operations, providing detailed information
//! for monitoring and debugging migration processes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Migration status information.
///
/// Lists which migrations found on disk are recorded in the history table
/// and which are still pending.
///
/// # Example
///
/// ```rust
/// use pgnest_postgres::MigrationStatus;
///
/// fn print_status(status: &MigrationStatus) {
///     println!("Database migrations: {}/{} applied",
///              status.applied_migrations(), status.total_migrations());
///
///     if status.is_up_to_date() {
///         println!("Database is up to date");
///     } else {
///         println!("{} migrations pending", status.pending_migrations());
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Applied migration names in name order
    pub applied: Vec<String>,
    /// Pending migration names in the order they will be applied
    pub pending: Vec<String>,
}

impl MigrationStatus {
    /// Creates a new migration status.
    pub fn new(applied: impl Into<Vec<String>>, pending: impl Into<Vec<String>>) -> Self {
        Self {
            applied: applied.into(),
            pending: pending.into(),
        }
    }

    /// Returns the progress ratio (0.0 to 1.0) of applied migrations.
    pub fn progress_ratio(&self) -> f64 {
        let total_migrations = self.total_migrations();
        if total_migrations == 0 {
            1.0
        } else {
            self.applied_migrations() as f64 / total_migrations as f64
        }
    }

    /// Returns the last applied migration, if any.
    pub fn last_applied(&self) -> Option<&str> {
        self.applied.last().map(|s| s.as_str())
    }

    /// Returns the next pending migration, if any.
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.first().map(|s| s.as_str())
    }

    /// Returns the number of applied migrations.
    #[inline]
    pub fn applied_migrations(&self) -> usize {
        self.applied.len()
    }

    /// Returns the number of pending migrations.
    #[inline]
    pub fn pending_migrations(&self) -> usize {
        self.pending.len()
    }

    /// Returns the total number of migrations.
    #[inline]
    pub fn total_migrations(&self) -> usize {
        self.applied_migrations() + self.pending_migrations()
    }

    /// Returns true if all migrations have been applied.
    #[inline]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Outcome of a successful migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Total duration of the migration run
    pub duration: Duration,
    /// Migrations applied by this run, in order
    pub applied: Vec<String>,
    /// Migrations found already applied
    pub skipped: Vec<String>,
}

impl MigrationResult {
    /// Creates a migration result.
    pub fn new(duration: Duration, applied: Vec<String>, skipped: Vec<String>) -> Self {
        Self {
            duration,
            applied,
            skipped,
        }
    }

    /// Returns the average time per applied migration.
    pub fn average_time_per_migration(&self) -> Option<Duration> {
        let applied = u32::try_from(self.applied.len()).ok()?;
        if applied > 0 {
            Some(self.duration / applied)
        } else {
            None
        }
    }

    /// Returns whether the run applied nothing.
    pub fn is_no_op(&self) -> bool {
        self.applied.is_empty()
    }

    /// Returns the last applied migration, if any.
    pub fn last_applied(&self) -> Option<&str> {
        self.applied.last().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_migration_status_calculations() {
        let applied = vec!["001_a.sql".to_string(), "002_b.sql".to_string()];
        let pending = vec!["003_c.sql".to_string(), "004_d.sql".to_string()];
        let status = MigrationStatus::new(applied, pending);

        assert_eq!(status.progress_ratio(), 0.5);
        assert_eq!(status.last_applied(), Some("002_b.sql"));
        assert_eq!(status.next_pending(), Some("003_c.sql"));
    }

    #[test]
    fn test_migration_status_up_to_date() {
        let status = MigrationStatus::new(vec!["001_a.sql".to_string()], vec![]);

        assert_eq!(status.progress_ratio(), 1.0);
        assert_eq!(status.next_pending(), None);
        assert!(status.is_up_to_date());
    }

    #[test]
    fn test_migration_result_no_op() {
        let result = MigrationResult::new(
            Duration::from_millis(100),
            vec![],
            vec!["001_a.sql".to_string()],
        );

        assert!(result.is_no_op());
        assert_eq!(result.average_time_per_migration(), None);
        assert_eq!(result.last_applied(), None);
    }

    #[test]
    fn test_migration_result_average() {
        let result = MigrationResult::new(
            Duration::from_millis(100),
            vec!["001_a.sql".to_string(), "002_b.sql".to_string()],
            vec![],
        );

        assert_eq!(result.average_time_per_migration(), Some(Duration::from_millis(50)));
    }
}
