//! Extension trait for [`PgPoolClient`] providing migration functionality.
//!
//! Migrations never run on a pooled connection: the advisory lock lives as
//! long as the session, so each call opens a dedicated connection with the
//! configuration of the pool and closes it afterwards.

use std::future::Future;

use super::{MigrateOptions, MigrationResult, MigrationStatus, Migrator};
use crate::client::{DedicatedConnector, PgPoolClient};
use crate::PgResult;

/// Extension trait providing migration functionality for [`PgPoolClient`].
pub trait PoolClientMigrationExt {
    /// Runs all pending database migrations.
    ///
    /// This method will apply any unapplied migrations to bring the database
    /// schema up to date. It's safe to call this method multiple times, also
    /// from several processes at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the migrations are inconsistent with the history
    /// table, a migration fails to apply or there are connectivity issues.
    fn run_migrations(
        &self,
        options: MigrateOptions,
    ) -> impl Future<Output = PgResult<MigrationResult>> + Send;

    /// Gets the current migration status of the database.
    ///
    /// # Errors
    ///
    /// Returns an error if there are connectivity issues or if the history
    /// table disagrees with the migrations folder.
    fn migration_status(
        &self,
        options: MigrateOptions,
    ) -> impl Future<Output = PgResult<MigrationStatus>> + Send;
}

impl PoolClientMigrationExt for PgPoolClient {
    async fn run_migrations(&self, options: MigrateOptions) -> PgResult<MigrationResult> {
        let connector = DedicatedConnector::new(self.config().clone());
        Migrator::new(options).migrate(&connector).await
    }

    async fn migration_status(&self, options: MigrateOptions) -> PgResult<MigrationStatus> {
        let connector = DedicatedConnector::new(self.config().clone());
        Migrator::new(options).status(&connector).await
    }
}
