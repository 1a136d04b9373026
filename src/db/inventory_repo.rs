// src/db/inventory_repo.rs

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::db::PgConn,
    db::ports::{MovementLog, StockLedger},
    models::inventory::{BalanceKey, Movement, NewMovement, StockBalance},
};

const BALANCE_COLUMNS: &str = "tenant_id, branch_id, product_id, quantity, updated_at";

// ---
// Saldo (stock_balances)
// ---
#[derive(Clone, Default)]
pub struct PgStockLedger;

impl PgStockLedger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StockLedger<PgConn> for PgStockLedger {
    async fn apply_delta(&self, conn: &mut PgConn, key: BalanceKey, delta: Decimal) -> Result<Decimal, AppError> {
        if delta >= Decimal::ZERO {
            // "UPSERT": tenta INSERIR; se já existir (ON CONFLICT), soma na existente.
            // A linha fica travada até o fim da transação.
            let level = sqlx::query_as::<_, StockBalance>(&format!(
                r#"
                INSERT INTO stock_balances (tenant_id, branch_id, product_id, quantity, updated_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (tenant_id, branch_id, product_id)
                DO UPDATE SET
                    quantity = stock_balances.quantity + EXCLUDED.quantity,
                    updated_at = NOW()
                RETURNING {BALANCE_COLUMNS}
                "#
            ))
            .bind(key.tenant_id)
            .bind(key.branch_id)
            .bind(key.product_id)
            .bind(delta)
            .fetch_one(&mut **conn)
            .await?;

            return Ok(level.quantity);
        }

        // Saída: o UPDATE trava a linha e reavalia a condição depois de esperar
        // por outra transação na mesma chave, então dois débitos concorrentes
        // nunca leem o mesmo saldo.
        let updated = sqlx::query_as::<_, StockBalance>(&format!(
            r#"
            UPDATE stock_balances
            SET quantity = quantity + $4, updated_at = NOW()
            WHERE tenant_id = $1 AND branch_id = $2 AND product_id = $3
              AND quantity + $4 >= 0
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(key.tenant_id)
        .bind(key.branch_id)
        .bind(key.product_id)
        .bind(delta)
        .fetch_optional(&mut **conn)
        .await?;

        match updated {
            Some(level) => Ok(level.quantity),
            None => {
                let available = self.get_quantity(conn, key).await?;
                Err(AppError::InsufficientStock {
                    branch_id: key.branch_id,
                    product_id: key.product_id,
                    available,
                    requested: -delta,
                })
            }
        }
    }

    async fn get_balance(&self, conn: &mut PgConn, key: BalanceKey) -> Result<Option<StockBalance>, AppError> {
        let level = sqlx::query_as::<_, StockBalance>(&format!(
            "SELECT {BALANCE_COLUMNS} FROM stock_balances WHERE tenant_id = $1 AND branch_id = $2 AND product_id = $3"
        ))
        .bind(key.tenant_id)
        .bind(key.branch_id)
        .bind(key.product_id)
        .fetch_optional(&mut **conn)
        .await?;

        Ok(level)
    }
}

// ---
// Livro-razão (stock_movements)
// ---
#[derive(Clone, Default)]
pub struct PgMovementLog;

impl PgMovementLog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MovementLog<PgConn> for PgMovementLog {
    /// Registra uma movimentação no livro-razão (auditoria).
    async fn record(&self, conn: &mut PgConn, entry: NewMovement) -> Result<Movement, AppError> {
        entry.validate()?;

        let movement = sqlx::query_as::<_, Movement>(
            r#"
            INSERT INTO stock_movements
                (tenant_id, branch_id, product_id, movement_type, quantity,
                 reference_type, reference_id, notes, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(entry.tenant_id)
        .bind(entry.branch_id)
        .bind(entry.product_id)
        .bind(entry.movement_type)
        .bind(entry.quantity)
        .bind(&entry.reference_type)
        .bind(entry.reference_id)
        .bind(&entry.notes)
        .bind(entry.user_id)
        .fetch_one(&mut **conn)
        .await?;

        Ok(movement)
    }

    async fn list_by_reference(
        &self,
        conn: &mut PgConn,
        tenant_id: Uuid,
        reference_type: &str,
        reference_id: i64,
    ) -> Result<Vec<Movement>, AppError> {
        let movements = sqlx::query_as::<_, Movement>(
            r#"
            SELECT * FROM stock_movements
            WHERE tenant_id = $1 AND reference_type = $2 AND reference_id = $3
            ORDER BY id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&mut **conn)
        .await?;

        Ok(movements)
    }
}
