//! Postgres-backed repository implementations.

mod items;
mod maintenance;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{
    Postgres, QueryBuilder, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::application::repos::ItemFilter;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Build a pool whose connection attempts give up after
    /// `acquire_timeout`, so an unreachable database surfaces as
    /// `PoolTimedOut` instead of stalling callers.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn apply_item_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ItemFilter) {
        if let Some(source) = filter.source.as_ref() {
            qb.push(" AND source = ");
            qb.push_bind(source.clone());
        }

        if let Some(item_type) = filter.item_type.as_ref() {
            qb.push(" AND type = ");
            qb.push_bind(item_type.clone());
        }
    }
}
