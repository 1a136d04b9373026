// src/db/ports.rs
//
// Portas do subsistema de transferências. A máquina de estados só enxerga estes
// traits; cada backend (Postgres, memória) fornece os adaptadores concretos.
//
// Todas as operações recebem a "conexão" `C` da unidade de trabalho aberta por
// `TransferStore::begin`, para que deltas, movimentações e status de uma ação
// caiam na mesma transação quando o backend suporta.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::models::inventory::{BalanceKey, Movement, NewMovement, StockBalance};
use crate::models::transfer::{
    NewTransfer, Transfer, TransferDetail, TransferItem, TransferStatus, TransferTransition,
};

/// Abre e fecha unidades de trabalho.
#[async_trait]
pub trait TransferStore: Send + Sync {
    type Conn: Send + 'static;

    /// `true` quando `rollback` desfaz tudo que foi escrito desde o `begin`.
    /// Stores sem transação exigem compensação explícita.
    fn is_atomic(&self) -> bool;

    async fn begin(&self, tenant_id: Uuid, actor_id: Option<Uuid>) -> Result<Self::Conn, AppError>;

    async fn commit(&self, conn: Self::Conn) -> Result<(), AppError>;

    async fn rollback(&self, conn: Self::Conn) -> Result<(), AppError>;
}

/// Dono exclusivo de `StockBalance.quantity`.
#[async_trait]
pub trait StockLedger<C: Send>: Send + Sync {
    /// Read-modify-write atômico por chave. Falha com `InsufficientStock` sem
    /// tocar na linha se o resultado ficaria negativo; cria a linha se não existir.
    async fn apply_delta(&self, conn: &mut C, key: BalanceKey, delta: Decimal) -> Result<Decimal, AppError>;

    async fn get_balance(&self, conn: &mut C, key: BalanceKey) -> Result<Option<StockBalance>, AppError>;

    /// Chave desconhecida é zero, nunca erro.
    async fn get_quantity(&self, conn: &mut C, key: BalanceKey) -> Result<Decimal, AppError> {
        Ok(self
            .get_balance(conn, key)
            .await?
            .map(|b| b.quantity)
            .unwrap_or(Decimal::ZERO))
    }
}

/// Livro-razão só de inserção.
#[async_trait]
pub trait MovementLog<C: Send>: Send + Sync {
    async fn record(&self, conn: &mut C, entry: NewMovement) -> Result<Movement, AppError>;

    /// Grava na ordem recebida.
    async fn record_batch(&self, conn: &mut C, entries: Vec<NewMovement>) -> Result<Vec<Movement>, AppError> {
        let mut recorded = Vec::with_capacity(entries.len());
        for entry in entries {
            recorded.push(self.record(conn, entry).await?);
        }
        Ok(recorded)
    }

    async fn list_by_reference(
        &self,
        conn: &mut C,
        tenant_id: Uuid,
        reference_type: &str,
        reference_id: i64,
    ) -> Result<Vec<Movement>, AppError>;
}

/// Consulta somente-leitura do catálogo de filiais.
#[async_trait]
pub trait BranchDirectory<C: Send>: Send + Sync {
    async fn get_name(&self, conn: &mut C, tenant_id: Uuid, branch_id: Uuid) -> Result<Option<String>, AppError>;
}

#[async_trait]
pub trait TransferRepository<C: Send>: Send + Sync {
    /// Valida e grava um rascunho com os itens na ordem dada.
    async fn create_draft(&self, conn: &mut C, draft: NewTransfer) -> Result<TransferDetail, AppError>;

    /// Carrega e trava o registro até o fim da unidade de trabalho.
    async fn find_for_update(&self, conn: &mut C, tenant_id: Uuid, id: i64) -> Result<Option<Transfer>, AppError>;

    async fn find(&self, conn: &mut C, tenant_id: Uuid, id: i64) -> Result<Option<Transfer>, AppError>;

    async fn list(
        &self,
        conn: &mut C,
        tenant_id: Uuid,
        status: Option<TransferStatus>,
    ) -> Result<Vec<Transfer>, AppError>;

    async fn list_items(&self, conn: &mut C, tenant_id: Uuid, id: i64) -> Result<Vec<TransferItem>, AppError>;

    /// Compare-and-set do status: só grava se o status atual for `expected`,
    /// senão falha com `InvalidTransition`.
    async fn persist_transition(
        &self,
        conn: &mut C,
        tenant_id: Uuid,
        id: i64,
        expected: TransferStatus,
        transition: TransferTransition,
    ) -> Result<Transfer, AppError>;
}
