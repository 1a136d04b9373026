// src/db/transfer_repo.rs

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::db::PgConn,
    db::ports::TransferRepository,
    models::transfer::{
        NewTransfer, Transfer, TransferDetail, TransferItem, TransferStatus, TransferTransition,
    },
};

#[derive(Clone, Default)]
pub struct PgTransferRepository;

impl PgTransferRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransferRepository<PgConn> for PgTransferRepository {
    async fn create_draft(&self, conn: &mut PgConn, draft: NewTransfer) -> Result<TransferDetail, AppError> {
        draft.validate()?;

        let header = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO stock_transfers (tenant_id, from_branch_id, to_branch_id, status)
            VALUES ($1, $2, $3, 'draft')
            RETURNING *
            "#,
        )
        .bind(draft.tenant_id)
        .bind(draft.from_branch_id)
        .bind(draft.to_branch_id)
        .fetch_one(&mut **conn)
        .await?;

        let mut items = Vec::with_capacity(draft.items.len());
        for (position, item) in draft.items.iter().enumerate() {
            let row = sqlx::query_as::<_, TransferItem>(
                r#"
                INSERT INTO stock_transfer_items (transfer_id, tenant_id, position, product_id, quantity)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING transfer_id, position, product_id, quantity
                "#,
            )
            .bind(header.id)
            .bind(draft.tenant_id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(item.quantity)
            .fetch_one(&mut **conn)
            .await?;
            items.push(row);
        }

        Ok(TransferDetail { header, items })
    }

    async fn find_for_update(&self, conn: &mut PgConn, tenant_id: Uuid, id: i64) -> Result<Option<Transfer>, AppError> {
        // FOR UPDATE: dois `send` da mesma transferência se serializam aqui, e o
        // segundo já enxerga o status novo.
        let transfer = sqlx::query_as::<_, Transfer>(
            "SELECT * FROM stock_transfers WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut **conn)
        .await?;

        Ok(transfer)
    }

    async fn find(&self, conn: &mut PgConn, tenant_id: Uuid, id: i64) -> Result<Option<Transfer>, AppError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            "SELECT * FROM stock_transfers WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut **conn)
        .await?;

        Ok(transfer)
    }

    async fn list(
        &self,
        conn: &mut PgConn,
        tenant_id: Uuid,
        status: Option<TransferStatus>,
    ) -> Result<Vec<Transfer>, AppError> {
        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT * FROM stock_transfers
            WHERE tenant_id = $1 AND ($2::stock_transfer_status IS NULL OR status = $2)
            ORDER BY id DESC
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .fetch_all(&mut **conn)
        .await?;

        Ok(transfers)
    }

    async fn list_items(&self, conn: &mut PgConn, tenant_id: Uuid, id: i64) -> Result<Vec<TransferItem>, AppError> {
        let items = sqlx::query_as::<_, TransferItem>(
            r#"
            SELECT transfer_id, position, product_id, quantity
            FROM stock_transfer_items
            WHERE transfer_id = $1 AND tenant_id = $2
            ORDER BY position ASC
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_all(&mut **conn)
        .await?;

        Ok(items)
    }

    async fn persist_transition(
        &self,
        conn: &mut PgConn,
        tenant_id: Uuid,
        id: i64,
        expected: TransferStatus,
        transition: TransferTransition,
    ) -> Result<Transfer, AppError> {
        // Uma query por aresta: cada uma grava só os campos de auditoria dela.
        let query = match transition {
            TransferTransition::Sent { by, at } => sqlx::query_as::<_, Transfer>(
                r#"
                UPDATE stock_transfers
                SET status = 'sent', sent_at = $4, sent_by = $5, updated_at = $4
                WHERE id = $1 AND tenant_id = $2 AND status = $3
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(tenant_id)
            .bind(expected)
            .bind(at)
            .bind(by),
            TransferTransition::Received { by, at } => sqlx::query_as::<_, Transfer>(
                r#"
                UPDATE stock_transfers
                SET status = 'received', received_at = $4, received_by = $5, updated_at = $4
                WHERE id = $1 AND tenant_id = $2 AND status = $3
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(tenant_id)
            .bind(expected)
            .bind(at)
            .bind(by),
            TransferTransition::Cancelled { at } => sqlx::query_as::<_, Transfer>(
                r#"
                UPDATE stock_transfers
                SET status = 'cancelled', updated_at = $4
                WHERE id = $1 AND tenant_id = $2 AND status = $3
                RETURNING *
                "#,
            )
            .bind(id)
            .bind(tenant_id)
            .bind(expected)
            .bind(at),
        };

        match query.fetch_optional(&mut **conn).await? {
            Some(transfer) => Ok(transfer),
            None => {
                // Perdeu a corrida (ou o registro sumiu): reporta o status real.
                let current = self.find(conn, tenant_id, id).await?;
                match current {
                    Some(t) => Err(AppError::InvalidTransition { status: t.status, action: transition.action() }),
                    None => Err(AppError::TransferNotFound(id)),
                }
            }
        }
    }
}
