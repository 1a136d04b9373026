// src/db/db.rs

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::db::ports::TransferStore;

/// Unidade de trabalho do backend Postgres: uma transação da pool.
pub type PgConn = Transaction<'static, Postgres>;

pub async fn connect_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

// Store Postgres: cada ação da máquina de estados roda numa única transação.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransferStore for PgStore {
    type Conn = PgConn;

    fn is_atomic(&self) -> bool {
        true
    }

    /// Abre a transação e define as variáveis RLS (a "chave") só para ela.
    async fn begin(&self, tenant_id: Uuid, actor_id: Option<Uuid>) -> Result<PgConn, AppError> {
        // O operador '?' converte automaticamente sqlx::Error -> AppError::DatabaseError
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await?;

        if let Some(actor_id) = actor_id {
            sqlx::query("SELECT set_config('app.user_id', $1, true)")
                .bind(actor_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        Ok(tx)
    }

    async fn commit(&self, conn: PgConn) -> Result<(), AppError> {
        conn.commit().await?;
        Ok(())
    }

    async fn rollback(&self, conn: PgConn) -> Result<(), AppError> {
        conn.rollback().await?;
        Ok(())
    }
}
