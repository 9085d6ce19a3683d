//! Embedded `PostgreSQL` helpers shared by the integration suites.
//!
//! A template database carries the migrated schema; each test clones it into
//! a database of its own, which is dropped again when the test ends.
//!
//! Uses `pg-embed-setup-unpriv` for embedded `PostgreSQL` lifecycle management.

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use pg_embedded_setup_unpriv::TestCluster;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taskrelay::task::adapters::postgres::{TaskPgPool, connect_pool};

/// SQL creating the keyspace tables.
pub const CREATE_SCHEMA_SQL: &str =
    include_str!("../../migrations/2026-10-01-000000_create_task_store/up.sql");

/// Template database name for the pre-migrated schema.
pub const TEMPLATE_DB: &str = "taskrelay_test_template";

static NEXT_DATABASE: AtomicUsize = AtomicUsize::new(0);

/// Ensures the template database exists with the schema applied.
pub fn ensure_template(cluster: &TestCluster) -> eyre::Result<()> {
    cluster
        .ensure_template_exists(TEMPLATE_DB, |db_name| {
            let url = cluster.connection().database_url(db_name);
            let mut conn = PgConnection::establish(&url).map_err(|e| eyre::eyre!("{e}"))?;
            conn.batch_execute(CREATE_SCHEMA_SQL)
                .map_err(|e| eyre::eyre!("schema: {e}"))?;
            Ok(())
        })
        .map_err(|e| eyre::eyre!("template setup failed: {e}"))
}

/// A database cloned from the template, dropped with the value.
pub struct TestDatabase {
    cluster: &'static TestCluster,
    name: String,
}

impl TestDatabase {
    /// Clones the template into a database named after `prefix`.
    pub fn create(cluster: &'static TestCluster, prefix: &str) -> eyre::Result<Self> {
        ensure_template(cluster)?;
        let name = format!(
            "{prefix}_{}_{}",
            std::process::id(),
            NEXT_DATABASE.fetch_add(1, Ordering::Relaxed)
        );
        cluster
            .create_database_from_template(name.as_str(), TEMPLATE_DB)
            .map_err(|e| eyre::eyre!("create {name}: {e}"))?;
        Ok(Self { cluster, name })
    }

    /// Connection URL of this database.
    pub fn url(&self) -> String {
        self.cluster.connection().database_url(&self.name)
    }

    /// Opens a pool whose calls are bounded by `store_timeout`.
    pub fn pool(&self, store_timeout: Duration) -> eyre::Result<TaskPgPool> {
        Ok(connect_pool(&self.url(), 4, store_timeout)?)
    }
}

impl Drop for TestDatabase {
    #[expect(
        clippy::print_stderr,
        reason = "Test cleanup warnings are informational"
    )]
    fn drop(&mut self) {
        if let Err(e) = self.cluster.drop_database(self.name.as_str()) {
            eprintln!("Warning: failed to drop test database {}: {e}", self.name);
        }
    }
}
