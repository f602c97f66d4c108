use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::history::MigrationsLog;
use super::{
    ADVISORY_LOCK_KEY, DiskMigration, MigrateOptions, MigrationError, MigrationResult,
    MigrationStatus, validate_state,
};
use crate::client::execute::execute;
use crate::client::{Connection, ConnectionProvider, DedicatedConnector, PgConfig};
use crate::{PgError, PgResult, Query, SqlStatement, TRACING_TARGET_MIGRATION};

/// Applies the migrations of a folder to a database.
///
/// Every run works on one connection taken from the provider and holds the
/// migration advisory lock on it until the run ends. The provider should
/// hand out dedicated connections: the lock is released explicitly when the
/// run ends, and implicitly when the connection closes.
#[derive(Debug, Clone, Default)]
pub struct Migrator {
    options: MigrateOptions,
}

impl Migrator {
    /// Creates a migrator.
    pub fn new(options: MigrateOptions) -> Self {
        Self { options }
    }

    /// Returns the migration options.
    #[inline]
    pub fn options(&self) -> &MigrateOptions {
        &self.options
    }

    /// Applies every migration that is not recorded in the history table.
    ///
    /// Concurrent runs against the same database serialize on the advisory
    /// lock. Validation failures abort the run before anything is applied.
    /// A failing statement stops the run; migrations applied before it stay
    /// recorded.
    #[instrument(
        skip_all,
        target = TRACING_TARGET_MIGRATION,
        fields(
            folder = %self.options.folder_location.display(),
            table = %self.options.table_name,
        )
    )]
    pub async fn migrate<P: ConnectionProvider>(&self, provider: &P) -> PgResult<MigrationResult> {
        info!(target: TRACING_TARGET_MIGRATION, "Starting database migration process");

        let started = Instant::now();
        let log = MigrationsLog::new(&self.options.table_name)?;

        let mut conn = provider.acquire().await?;
        let outcome = match lock(&mut conn).await {
            Ok(()) => {
                let outcome = self.apply_pending(&log, &mut conn).await;
                unlock(&mut conn).await;
                outcome
            }
            Err(err) => Err(err),
        };
        conn.close().await;

        let (applied, skipped) = outcome?;
        let result = MigrationResult::new(started.elapsed(), applied, skipped);

        info!(
            target: TRACING_TARGET_MIGRATION,
            applied = result.applied.len(),
            skipped = result.skipped.len(),
            duration_ms = result.duration.as_millis(),
            "Migrations completed"
        );

        Ok(result)
    }

    /// Compares the folder against the history table without changing the
    /// database.
    ///
    /// A missing history table counts as an empty history.
    #[instrument(
        skip_all,
        target = TRACING_TARGET_MIGRATION,
        fields(
            folder = %self.options.folder_location.display(),
            table = %self.options.table_name,
        )
    )]
    pub async fn status<P: ConnectionProvider>(&self, provider: &P) -> PgResult<MigrationStatus> {
        let log = MigrationsLog::new(&self.options.table_name)?;
        let disk = DiskMigration::read_from_folder(&self.options.folder_location)?;

        let mut conn = provider.acquire().await?;
        let history = log.past_migrations_if_exists(&mut conn).await;
        conn.close().await;
        let history = history?;

        let records: Vec<_> = disk.iter().map(DiskMigration::record).collect();
        validate_state(&records, &history).map_err(MigrationError::from)?;

        let logged: HashSet<&str> = history.iter().map(|record| record.name.as_str()).collect();
        let applied = history.iter().map(|record| record.name.clone()).collect::<Vec<_>>();
        let pending = disk
            .iter()
            .filter(|migration| !logged.contains(migration.name.as_str()))
            .map(|migration| migration.name.clone())
            .collect::<Vec<_>>();

        let status = MigrationStatus::new(applied, pending);
        debug!(
            target: TRACING_TARGET_MIGRATION,
            applied_count = status.applied_migrations(),
            pending_count = status.pending_migrations(),
            is_up_to_date = status.is_up_to_date(),
            "Migration status retrieved"
        );

        Ok(status)
    }

    async fn apply_pending<C: Connection>(
        &self,
        log: &MigrationsLog,
        conn: &mut C,
    ) -> PgResult<(Vec<String>, Vec<String>)> {
        log.init_schema(conn).await?;
        let history = log.past_migrations(conn).await?;
        let disk = DiskMigration::read_from_folder(&self.options.folder_location)?;

        debug!(
            target: TRACING_TARGET_MIGRATION,
            on_disk = disk.len(),
            logged = history.len(),
            "Validating migrations"
        );

        let records: Vec<_> = disk.iter().map(DiskMigration::record).collect();
        if let Err(err) = validate_state(&records, &history) {
            warn!(target: TRACING_TARGET_MIGRATION, error = %err, "Migration validation failed");
            return Err(MigrationError::from(err).into());
        }

        let logged: HashSet<&str> = history.iter().map(|record| record.name.as_str()).collect();
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for migration in &disk {
            if logged.contains(migration.name.as_str()) {
                debug!(
                    target: TRACING_TARGET_MIGRATION,
                    migration = %migration.name,
                    "Already applied"
                );
                skipped.push(migration.name.clone());
                continue;
            }

            let started = Instant::now();
            info!(
                target: TRACING_TARGET_MIGRATION,
                migration = %migration.name,
                statements = migration.statements().len(),
                "Applying migration"
            );

            for statement in migration.statements() {
                execute(conn, &statement.to_query())
                    .await
                    .map_err(|err| statement_error(migration, statement, err))?;
            }
            log.insert(conn, &migration.record()).await?;

            info!(
                target: TRACING_TARGET_MIGRATION,
                migration = %migration.name,
                duration_ms = started.elapsed().as_millis(),
                "Migration applied"
            );
            applied.push(migration.name.clone());
        }

        Ok((applied, skipped))
    }
}

async fn lock<C: Connection>(conn: &mut C) -> PgResult<()> {
    debug!(target: TRACING_TARGET_MIGRATION, key = ADVISORY_LOCK_KEY, "Waiting for migration lock");
    let query = Query::batch(format!("select pg_advisory_lock({ADVISORY_LOCK_KEY})"))
        .with_name("migration-lock");
    execute(conn, &query).await?;

    debug!(target: TRACING_TARGET_MIGRATION, key = ADVISORY_LOCK_KEY, "Migration lock acquired");
    Ok(())
}

async fn unlock<C: Connection>(conn: &mut C) {
    let query = Query::batch(format!("select pg_advisory_unlock({ADVISORY_LOCK_KEY})"))
        .with_name("migration-unlock");

    // Closing the connection releases the lock as well.
    if let Err(err) = execute(conn, &query).await {
        warn!(target: TRACING_TARGET_MIGRATION, error = %err, "Failed to release migration lock");
    }
}

fn statement_error(migration: &DiskMigration, statement: &SqlStatement, err: PgError) -> PgError {
    let source = match err {
        PgError::Sql(source) => source,
        other => return other,
    };

    tracing::error!(
        target: TRACING_TARGET_MIGRATION,
        migration = %migration.name,
        line = statement.line_no,
        code = ?source.code(),
        "Migration statement failed"
    );

    MigrationError::Statement {
        path: migration.path.clone(),
        line: statement.line_no,
        code: source.code().map(str::to_owned),
        message: source.message().to_owned(),
        source,
    }
    .into()
}

/// Applies pending migrations over a dedicated connection.
///
/// # Errors
///
/// Returns an error if the connection cannot be opened, the migrations are
/// inconsistent with the history table or a statement fails.
pub async fn migrate(config: &PgConfig, options: MigrateOptions) -> PgResult<MigrationResult> {
    let connector = DedicatedConnector::new(config.clone());
    Migrator::new(options).migrate(&connector).await
}

/// Reports applied and pending migrations over a dedicated connection.
pub async fn migration_status(
    config: &PgConfig,
    options: MigrateOptions,
) -> PgResult<MigrationStatus> {
    let connector = DedicatedConnector::new(config.clone());
    Migrator::new(options).status(&connector).await
}
