// src/services/transfer_service.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{
        branch_repo::PgBranchDirectory,
        db::PgStore,
        inventory_repo::{PgMovementLog, PgStockLedger},
        memory_store::MemoryStore,
        ports::{BranchDirectory, MovementLog, StockLedger, TransferRepository, TransferStore},
        transfer_repo::PgTransferRepository,
    },
    models::inventory::{
        check_quantity, BalanceKey, Movement, MovementType, NewMovement, REFERENCE_STOCK_TRANSFER,
    },
    models::transfer::{
        NewTransfer, Transfer, TransferAction, TransferCommand, TransferDetail, TransferItem,
        TransferStatus, TransferTransition,
    },
};

/// Operações expostas aos handlers. Esconde o backend de armazenamento.
#[async_trait]
pub trait TransferService: Send + Sync {
    async fn create_draft(&self, draft: NewTransfer) -> Result<TransferDetail, AppError>;

    async fn apply(&self, transfer_id: i64, command: TransferCommand) -> Result<Transfer, AppError>;

    async fn get(&self, tenant_id: Uuid, transfer_id: i64) -> Result<TransferDetail, AppError>;

    async fn list(&self, tenant_id: Uuid, status: Option<TransferStatus>) -> Result<Vec<Transfer>, AppError>;

    async fn movements(&self, tenant_id: Uuid, transfer_id: i64) -> Result<Vec<Movement>, AppError>;

    async fn quantity(&self, tenant_id: Uuid, branch_id: Uuid, product_id: Uuid) -> Result<Decimal, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    fn delta(self, quantity: Decimal) -> Decimal {
        match self {
            Direction::Outbound => -quantity,
            Direction::Inbound => quantity,
        }
    }

    fn movement_type(self) -> MovementType {
        match self {
            Direction::Outbound => MovementType::Saida,
            Direction::Inbound => MovementType::Entrada,
        }
    }
}

/// Único orquestrador do ciclo de vida das transferências e único chamador
/// do ledger e do livro-razão neste subsistema.
pub struct TransferStateMachine<S: TransferStore> {
    store: S,
    ledger: Arc<dyn StockLedger<S::Conn>>,
    movements: Arc<dyn MovementLog<S::Conn>>,
    transfers: Arc<dyn TransferRepository<S::Conn>>,
    branches: Arc<dyn BranchDirectory<S::Conn>>,
}

impl TransferStateMachine<PgStore> {
    pub fn postgres(pool: PgPool) -> Self {
        Self::new(
            PgStore::new(pool),
            Arc::new(PgStockLedger::new()),
            Arc::new(PgMovementLog::new()),
            Arc::new(PgTransferRepository::new()),
            Arc::new(PgBranchDirectory::new()),
        )
    }
}

impl TransferStateMachine<MemoryStore> {
    pub fn in_memory(store: MemoryStore) -> Self {
        let shared = Arc::new(store.clone());
        Self::new(store, shared.clone(), shared.clone(), shared.clone(), shared)
    }
}

impl<S: TransferStore> TransferStateMachine<S> {
    pub fn new(
        store: S,
        ledger: Arc<dyn StockLedger<S::Conn>>,
        movements: Arc<dyn MovementLog<S::Conn>>,
        transfers: Arc<dyn TransferRepository<S::Conn>>,
        branches: Arc<dyn BranchDirectory<S::Conn>>,
    ) -> Self {
        Self { store, ledger, movements, transfers, branches }
    }

    // --- Unidade de trabalho ---

    async fn finish<T>(&self, conn: S::Conn, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.store.commit(conn).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(conn).await {
                    warn!(error = %rollback_err, "Falha no rollback");
                }
                Err(err)
            }
        }
    }

    // --- Ações ---

    pub async fn apply(&self, transfer_id: i64, command: TransferCommand) -> Result<Transfer, AppError> {
        match command {
            TransferCommand::Send(req) => self.send(req.tenant_id, transfer_id, req.actor_id).await,
            TransferCommand::Receive(req) => self.receive(req.tenant_id, transfer_id, req.actor_id).await,
            TransferCommand::Cancel(req) => self.cancel(req.tenant_id, transfer_id, req.actor_id).await,
        }
    }

    pub async fn send(&self, tenant_id: Uuid, transfer_id: i64, actor_id: Uuid) -> Result<Transfer, AppError> {
        let mut conn = self.store.begin(tenant_id, Some(actor_id)).await?;
        let result = self.send_in(&mut conn, tenant_id, transfer_id, actor_id).await;
        let result = self.finish(conn, result).await;
        self.log_outcome(tenant_id, transfer_id, TransferAction::Send, &result);
        result
    }

    pub async fn receive(&self, tenant_id: Uuid, transfer_id: i64, actor_id: Uuid) -> Result<Transfer, AppError> {
        let mut conn = self.store.begin(tenant_id, Some(actor_id)).await?;
        let result = self.receive_in(&mut conn, tenant_id, transfer_id, actor_id).await;
        let result = self.finish(conn, result).await;
        self.log_outcome(tenant_id, transfer_id, TransferAction::Receive, &result);
        result
    }

    pub async fn cancel(&self, tenant_id: Uuid, transfer_id: i64, actor_id: Uuid) -> Result<Transfer, AppError> {
        let mut conn = self.store.begin(tenant_id, Some(actor_id)).await?;
        let result = async {
            self.load_guarded(&mut conn, tenant_id, transfer_id, TransferAction::Cancel).await?;
            self.transfers
                .persist_transition(
                    &mut conn,
                    tenant_id,
                    transfer_id,
                    TransferStatus::Draft,
                    TransferTransition::Cancelled { at: Utc::now() },
                )
                .await
        }
        .await;
        let result = self.finish(conn, result).await;
        self.log_outcome(tenant_id, transfer_id, TransferAction::Cancel, &result);
        result
    }

    async fn send_in(
        &self,
        conn: &mut S::Conn,
        tenant_id: Uuid,
        transfer_id: i64,
        actor_id: Uuid,
    ) -> Result<Transfer, AppError> {
        // 1-2. Guarda de status antes de qualquer mutação.
        let transfer = self.load_guarded(conn, tenant_id, transfer_id, TransferAction::Send).await?;

        // 3. Itens (ordem gravada) e validação.
        let items = self.transfers.list_items(conn, tenant_id, transfer_id).await?;
        validate_items(&items)?;

        let notes = self.movement_notes(conn, &transfer, Direction::Outbound).await?;

        // 4. Baixa na origem, item a item.
        self.apply_items(conn, &transfer, &items, Direction::Outbound).await?;

        // 5. Uma saída por item.
        let entries = movement_entries(&transfer, &items, Direction::Outbound, &notes, actor_id);
        self.movements
            .record_batch(conn, entries)
            .await
            .map_err(|e| self.after_ledger(transfer_id, "movements", e))?;

        // 6. Status.
        self.transfers
            .persist_transition(
                conn,
                tenant_id,
                transfer_id,
                TransferStatus::Draft,
                TransferTransition::Sent { by: actor_id, at: Utc::now() },
            )
            .await
            .map_err(|e| self.after_ledger(transfer_id, "status", e))
    }

    async fn receive_in(
        &self,
        conn: &mut S::Conn,
        tenant_id: Uuid,
        transfer_id: i64,
        actor_id: Uuid,
    ) -> Result<Transfer, AppError> {
        let transfer = self.load_guarded(conn, tenant_id, transfer_id, TransferAction::Receive).await?;

        let items = self.transfers.list_items(conn, tenant_id, transfer_id).await?;
        validate_items(&items)?;

        let notes = self.movement_notes(conn, &transfer, Direction::Inbound).await?;

        self.apply_items(conn, &transfer, &items, Direction::Inbound).await?;

        let entries = movement_entries(&transfer, &items, Direction::Inbound, &notes, actor_id);
        self.movements
            .record_batch(conn, entries)
            .await
            .map_err(|e| self.after_ledger(transfer_id, "movements", e))?;

        self.transfers
            .persist_transition(
                conn,
                tenant_id,
                transfer_id,
                TransferStatus::Sent,
                TransferTransition::Received { by: actor_id, at: Utc::now() },
            )
            .await
            .map_err(|e| self.after_ledger(transfer_id, "status", e))
    }

    async fn load_guarded(
        &self,
        conn: &mut S::Conn,
        tenant_id: Uuid,
        transfer_id: i64,
        action: TransferAction,
    ) -> Result<Transfer, AppError> {
        let transfer = self
            .transfers
            .find_for_update(conn, tenant_id, transfer_id)
            .await?
            .ok_or(AppError::TransferNotFound(transfer_id))?;

        if transfer.status.next(action).is_none() {
            return Err(AppError::InvalidTransition { status: transfer.status, action });
        }
        Ok(transfer)
    }

    /// Aplica os deltas de todos os itens na filial da direção. Em store sem
    /// transação, uma falha no meio desfaz os itens já aplicados (ordem inversa).
    async fn apply_items(
        &self,
        conn: &mut S::Conn,
        transfer: &Transfer,
        items: &[TransferItem],
        direction: Direction,
    ) -> Result<(), AppError> {
        let branch_id = match direction {
            Direction::Outbound => transfer.from_branch_id,
            Direction::Inbound => transfer.to_branch_id,
        };

        let mut applied: Vec<&TransferItem> = Vec::with_capacity(items.len());
        for item in items {
            let key = BalanceKey::new(transfer.tenant_id, branch_id, item.product_id);
            match self.ledger.apply_delta(conn, key, direction.delta(item.quantity)).await {
                Ok(new_quantity) => {
                    debug!(
                        transfer_id = transfer.id,
                        branch_id = %branch_id,
                        product_id = %item.product_id,
                        new_quantity = %new_quantity,
                        "Delta aplicado"
                    );
                    applied.push(item);
                }
                Err(err) => {
                    if !self.store.is_atomic() && !applied.is_empty() {
                        self.compensate(conn, transfer, branch_id, &applied, direction).await?;
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn compensate(
        &self,
        conn: &mut S::Conn,
        transfer: &Transfer,
        branch_id: Uuid,
        applied: &[&TransferItem],
        direction: Direction,
    ) -> Result<(), AppError> {
        warn!(
            transfer_id = transfer.id,
            items = applied.len(),
            "Compensando deltas já aplicados"
        );
        for item in applied.iter().rev() {
            let key = BalanceKey::new(transfer.tenant_id, branch_id, item.product_id);
            self.ledger
                .apply_delta(conn, key, -direction.delta(item.quantity))
                .await
                .map_err(|e| {
                    error!(transfer_id = transfer.id, product_id = %item.product_id, error = %e, "🔥 Compensação falhou");
                    AppError::PartiallyApplied {
                        transfer_id: transfer.id,
                        stage: "compensation",
                        reason: e.to_string(),
                    }
                })?;
        }
        Ok(())
    }

    /// Erro depois que os deltas já foram aplicados. Em store atômico o rollback
    /// desfaz tudo; nos outros a transferência fica pela metade.
    fn after_ledger(&self, transfer_id: i64, stage: &'static str, err: AppError) -> AppError {
        if self.store.is_atomic() {
            return err;
        }
        AppError::PartiallyApplied { transfer_id, stage, reason: err.to_string() }
    }

    async fn branch_label(&self, conn: &mut S::Conn, tenant_id: Uuid, branch_id: Uuid) -> Result<String, AppError> {
        let name = self.branches.get_name(conn, tenant_id, branch_id).await?;
        Ok(name.unwrap_or_else(|| format!("Branch #{}", branch_id)))
    }

    async fn movement_notes(
        &self,
        conn: &mut S::Conn,
        transfer: &Transfer,
        direction: Direction,
    ) -> Result<String, AppError> {
        let from = self.branch_label(conn, transfer.tenant_id, transfer.from_branch_id).await?;
        let to = self.branch_label(conn, transfer.tenant_id, transfer.to_branch_id).await?;
        Ok(match direction {
            Direction::Outbound => format!("Transferência #{}: saída de {} para {}", transfer.id, from, to),
            Direction::Inbound => format!("Transferência #{}: entrada em {} vinda de {}", transfer.id, to, from),
        })
    }

    fn log_outcome(&self, tenant_id: Uuid, transfer_id: i64, action: TransferAction, result: &Result<Transfer, AppError>) {
        match result {
            Ok(t) => info!(
                tenant_id = %tenant_id,
                transfer_id,
                action = %action,
                status = %t.status,
                "✅ Transferência atualizada"
            ),
            Err(e @ AppError::PartiallyApplied { .. }) => error!(
                tenant_id = %tenant_id,
                transfer_id,
                action = %action,
                error = %e,
                "🔥 Transferência aplicada parcialmente"
            ),
            Err(e) => warn!(
                tenant_id = %tenant_id,
                transfer_id,
                action = %action,
                code = e.code(),
                "Ação rejeitada"
            ),
        }
    }

    // --- Leitura e criação ---

    pub async fn create_draft(&self, draft: NewTransfer) -> Result<TransferDetail, AppError> {
        draft.validate()?;
        let tenant_id = draft.tenant_id;
        let mut conn = self.store.begin(tenant_id, None).await?;
        let result = self.transfers.create_draft(&mut conn, draft).await;
        let detail = self.finish(conn, result).await?;
        info!(tenant_id = %tenant_id, transfer_id = detail.header.id, items = detail.items.len(), "Rascunho criado");
        Ok(detail)
    }

    pub async fn get(&self, tenant_id: Uuid, transfer_id: i64) -> Result<TransferDetail, AppError> {
        let mut conn = self.store.begin(tenant_id, None).await?;
        let result = async {
            let header = self
                .transfers
                .find(&mut conn, tenant_id, transfer_id)
                .await?
                .ok_or(AppError::TransferNotFound(transfer_id))?;
            let items = self.transfers.list_items(&mut conn, tenant_id, transfer_id).await?;
            Ok::<_, AppError>(TransferDetail { header, items })
        }
        .await;
        self.finish(conn, result).await
    }

    pub async fn list(&self, tenant_id: Uuid, status: Option<TransferStatus>) -> Result<Vec<Transfer>, AppError> {
        let mut conn = self.store.begin(tenant_id, None).await?;
        let result = self.transfers.list(&mut conn, tenant_id, status).await;
        self.finish(conn, result).await
    }

    pub async fn movements(&self, tenant_id: Uuid, transfer_id: i64) -> Result<Vec<Movement>, AppError> {
        let mut conn = self.store.begin(tenant_id, None).await?;
        let result = async {
            self.transfers
                .find(&mut conn, tenant_id, transfer_id)
                .await?
                .ok_or(AppError::TransferNotFound(transfer_id))?;
            self.movements
                .list_by_reference(&mut conn, tenant_id, REFERENCE_STOCK_TRANSFER, transfer_id)
                .await
        }
        .await;
        self.finish(conn, result).await
    }

    pub async fn quantity(&self, tenant_id: Uuid, branch_id: Uuid, product_id: Uuid) -> Result<Decimal, AppError> {
        let mut conn = self.store.begin(tenant_id, None).await?;
        let result = self
            .ledger
            .get_quantity(&mut conn, BalanceKey::new(tenant_id, branch_id, product_id))
            .await;
        self.finish(conn, result).await
    }
}

fn validate_items(items: &[TransferItem]) -> Result<(), AppError> {
    if items.is_empty() {
        return Err(AppError::EmptyTransfer);
    }
    // Quantidade inválida nunca chega ao ledger.
    items.iter().try_for_each(|i| check_quantity(i.quantity))
}

fn movement_entries(
    transfer: &Transfer,
    items: &[TransferItem],
    direction: Direction,
    notes: &str,
    actor_id: Uuid,
) -> Vec<NewMovement> {
    let branch_id = match direction {
        Direction::Outbound => transfer.from_branch_id,
        Direction::Inbound => transfer.to_branch_id,
    };
    items
        .iter()
        .map(|item| NewMovement {
            tenant_id: transfer.tenant_id,
            branch_id,
            product_id: item.product_id,
            movement_type: direction.movement_type(),
            quantity: item.quantity,
            reference_type: REFERENCE_STOCK_TRANSFER.to_string(),
            reference_id: transfer.id,
            notes: notes.to_string(),
            user_id: actor_id,
        })
        .collect()
}

#[async_trait]
impl<S: TransferStore> TransferService for TransferStateMachine<S> {
    async fn create_draft(&self, draft: NewTransfer) -> Result<TransferDetail, AppError> {
        TransferStateMachine::create_draft(self, draft).await
    }

    async fn apply(&self, transfer_id: i64, command: TransferCommand) -> Result<Transfer, AppError> {
        TransferStateMachine::apply(self, transfer_id, command).await
    }

    async fn get(&self, tenant_id: Uuid, transfer_id: i64) -> Result<TransferDetail, AppError> {
        TransferStateMachine::get(self, tenant_id, transfer_id).await
    }

    async fn list(&self, tenant_id: Uuid, status: Option<TransferStatus>) -> Result<Vec<Transfer>, AppError> {
        TransferStateMachine::list(self, tenant_id, status).await
    }

    async fn movements(&self, tenant_id: Uuid, transfer_id: i64) -> Result<Vec<Movement>, AppError> {
        TransferStateMachine::movements(self, tenant_id, transfer_id).await
    }

    async fn quantity(&self, tenant_id: Uuid, branch_id: Uuid, product_id: Uuid) -> Result<Decimal, AppError> {
        TransferStateMachine::quantity(self, tenant_id, branch_id, product_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transfer::NewTransferItem;

    struct Fixture {
        store: MemoryStore,
        machine: Arc<TransferStateMachine<MemoryStore>>,
        tenant: Uuid,
        origin: Uuid,
        dest: Uuid,
        actor: Uuid,
    }

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    impl Fixture {
        async fn new(store: MemoryStore) -> Self {
            let tenant = Uuid::new_v4();
            let origin = Uuid::new_v4();
            let dest = Uuid::new_v4();
            store.add_branch(tenant, origin, "Loja Centro").await;
            store.add_branch(tenant, dest, "Loja Norte").await;
            let machine = Arc::new(TransferStateMachine::in_memory(store.clone()));
            Self { store, machine, tenant, origin, dest, actor: Uuid::new_v4() }
        }

        fn key(&self, branch: Uuid, product: Uuid) -> BalanceKey {
            BalanceKey::new(self.tenant, branch, product)
        }

        async fn seed(&self, product: Uuid, quantity: i64) {
            self.store.seed_balance(self.key(self.origin, product), dec(quantity)).await;
        }

        async fn at_origin(&self, product: Uuid) -> Decimal {
            self.store.quantity(self.key(self.origin, product)).await
        }

        async fn at_dest(&self, product: Uuid) -> Decimal {
            self.store.quantity(self.key(self.dest, product)).await
        }

        async fn draft(&self, items: &[(Uuid, i64)]) -> i64 {
            let detail = self
                .machine
                .create_draft(NewTransfer {
                    tenant_id: self.tenant,
                    from_branch_id: self.origin,
                    to_branch_id: self.dest,
                    items: items
                        .iter()
                        .map(|(product_id, q)| NewTransferItem { product_id: *product_id, quantity: dec(*q) })
                        .collect(),
                })
                .await
                .unwrap();
            detail.header.id
        }

        async fn status(&self, id: i64) -> TransferStatus {
            self.machine.get(self.tenant, id).await.unwrap().header.status
        }

        async fn movements(&self, id: i64) -> Vec<Movement> {
            self.machine.movements(self.tenant, id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_send_then_receive_moves_stock_between_branches() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        let sent = f.machine.send(f.tenant, id, f.actor).await.unwrap();
        assert_eq!(sent.status, TransferStatus::Sent);
        assert_eq!(sent.sent_by, Some(f.actor));
        assert!(sent.sent_at.is_some());
        assert_eq!(f.at_origin(p).await, dec(6));
        assert_eq!(f.at_dest(p).await, dec(0));

        let movements = f.movements(id).await;
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Saida);
        assert_eq!(movements[0].branch_id, f.origin);
        assert_eq!(movements[0].quantity, dec(4));
        assert_eq!(movements[0].reference_type, REFERENCE_STOCK_TRANSFER);
        assert_eq!(movements[0].reference_id, id);

        let received = f.machine.receive(f.tenant, id, f.actor).await.unwrap();
        assert_eq!(received.status, TransferStatus::Received);
        assert_eq!(received.received_by, Some(f.actor));
        assert_eq!(f.at_origin(p).await, dec(6));
        assert_eq!(f.at_dest(p).await, dec(4));

        let movements = f.movements(id).await;
        assert_eq!(movements.len(), 2);
        assert_eq!(movements[1].movement_type, MovementType::Entrada);
        assert_eq!(movements[1].branch_id, f.dest);
    }

    #[tokio::test]
    async fn test_send_with_insufficient_stock_changes_nothing() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 3).await;
        let id = f.draft(&[(p, 5)]).await;

        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        match err {
            AppError::InsufficientStock { available, requested, .. } => {
                assert_eq!(available, dec(3));
                assert_eq!(requested, dec(5));
            }
            other => panic!("erro inesperado: {other:?}"),
        }
        assert_eq!(f.at_origin(p).await, dec(3));
        assert_eq!(f.status(id).await, TransferStatus::Draft);
        assert!(f.movements(id).await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_on_second_item_rolls_back_the_first() {
        let f = Fixture::new(MemoryStore::new()).await;
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        f.seed(p1, 10).await;
        f.seed(p2, 1).await;
        let id = f.draft(&[(p1, 4), (p2, 5)]).await;

        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(f.at_origin(p1).await, dec(10));
        assert_eq!(f.at_origin(p2).await, dec(1));
        assert_eq!(f.status(id).await, TransferStatus::Draft);
        assert_eq!(f.store.movement_count().await, 0);
    }

    #[tokio::test]
    async fn test_autocommit_store_compensates_applied_items() {
        let f = Fixture::new(MemoryStore::autocommit()).await;
        let (p1, p2, p3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        f.seed(p1, 10).await;
        f.seed(p2, 10).await;
        f.seed(p3, 1).await;
        let id = f.draft(&[(p1, 4), (p2, 2), (p3, 5)]).await;

        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(f.at_origin(p1).await, dec(10));
        assert_eq!(f.at_origin(p2).await, dec(10));
        assert_eq!(f.at_origin(p3).await, dec(1));
        assert_eq!(f.status(id).await, TransferStatus::Draft);
    }

    #[tokio::test]
    async fn test_cancel_draft_then_send_is_rejected() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        let cancelled = f.machine.cancel(f.tenant, id, f.actor).await.unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert_eq!(f.at_origin(p).await, dec(10));
        assert!(f.movements(id).await.is_empty());

        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition { status: TransferStatus::Cancelled, action: TransferAction::Send }
        ));
        assert_eq!(f.at_origin(p).await, dec(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_never_overdraw() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let first = f.draft(&[(p, 6)]).await;
        let second = f.draft(&[(p, 6)]).await;

        let (m1, m2) = (f.machine.clone(), f.machine.clone());
        let (tenant, actor) = (f.tenant, f.actor);
        let h1 = tokio::spawn(async move { m1.send(tenant, first, actor).await });
        let h2 = tokio::spawn(async move { m2.send(tenant, second, actor).await });
        let (r1, r2) = (h1.await.unwrap(), h2.await.unwrap());

        let successes = [r1.is_ok(), r2.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let failure = if r1.is_err() { r1.unwrap_err() } else { r2.unwrap_err() };
        assert_eq!(failure.code(), "INSUFFICIENT_STOCK");
        assert_eq!(f.at_origin(p).await, dec(4));
    }

    #[tokio::test]
    async fn test_double_send_applies_once() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        f.machine.send(f.tenant, id, f.actor).await.unwrap();
        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();

        assert!(matches!(err, AppError::InvalidTransition { status: TransferStatus::Sent, .. }));
        assert_eq!(f.at_origin(p).await, dec(6));
        assert_eq!(f.movements(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_guards() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        let err = f.machine.receive(f.tenant, id, f.actor).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { status: TransferStatus::Draft, .. }));

        f.machine.send(f.tenant, id, f.actor).await.unwrap();
        let err = f.machine.cancel(f.tenant, id, f.actor).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { status: TransferStatus::Sent, .. }));

        f.machine.receive(f.tenant, id, f.actor).await.unwrap();
        for action in [TransferAction::Send, TransferAction::Receive, TransferAction::Cancel] {
            let err = f
                .machine
                .apply(id, TransferCommand::new(action, f.tenant, f.actor))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_TRANSITION");
        }
        assert_eq!(f.at_dest(p).await, dec(4));
    }

    #[tokio::test]
    async fn test_other_tenant_sees_not_found() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        let err = f.machine.send(Uuid::new_v4(), id, f.actor).await.unwrap_err();
        assert!(matches!(err, AppError::TransferNotFound(found) if found == id));
        assert_eq!(f.at_origin(p).await, dec(10));

        let err = f.machine.send(f.tenant, id + 100, f.actor).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_movement_notes_name_both_branches() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        f.machine.send(f.tenant, id, f.actor).await.unwrap();
        f.machine.receive(f.tenant, id, f.actor).await.unwrap();

        for m in f.movements(id).await {
            assert!(m.notes.contains("Loja Centro"), "{}", m.notes);
            assert!(m.notes.contains("Loja Norte"), "{}", m.notes);
            assert!(m.notes.contains(&format!("#{}", id)), "{}", m.notes);
            assert_eq!(m.user_id, f.actor);
        }
    }

    #[tokio::test]
    async fn test_unknown_branch_uses_fallback_label() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        let unnamed = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f
            .machine
            .create_draft(NewTransfer {
                tenant_id: f.tenant,
                from_branch_id: f.origin,
                to_branch_id: unnamed,
                items: vec![NewTransferItem { product_id: p, quantity: dec(1) }],
            })
            .await
            .unwrap()
            .header
            .id;

        f.machine.send(f.tenant, id, f.actor).await.unwrap();

        let notes = &f.movements(id).await[0].notes;
        assert!(notes.contains(&format!("Branch #{}", unnamed)), "{}", notes);
    }

    #[tokio::test]
    async fn test_movement_write_failure_rolls_back_atomic_store() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        f.store.fail_movement_writes(true);
        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        f.store.fail_movement_writes(false);

        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
        assert_eq!(f.at_origin(p).await, dec(10));
        assert_eq!(f.status(id).await, TransferStatus::Draft);

        // Depois da falha a transferência continua utilizável.
        f.machine.send(f.tenant, id, f.actor).await.unwrap();
        assert_eq!(f.at_origin(p).await, dec(6));
    }

    #[tokio::test]
    async fn test_status_write_failure_rolls_back_atomic_store() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        f.store.fail_transition_writes(true);
        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        f.store.fail_transition_writes(false);

        assert!(err.is_storage());
        assert_eq!(f.at_origin(p).await, dec(10));
        assert_eq!(f.store.movement_count().await, 0);
    }

    #[tokio::test]
    async fn test_movement_write_failure_without_transaction_is_partial() {
        let f = Fixture::new(MemoryStore::autocommit()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        f.store.fail_movement_writes(true);
        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();

        match err {
            AppError::PartiallyApplied { transfer_id, stage, .. } => {
                assert_eq!(transfer_id, id);
                assert_eq!(stage, "movements");
            }
            other => panic!("erro inesperado: {other:?}"),
        }
        assert_eq!(f.at_origin(p).await, dec(6));
        assert_eq!(f.status(id).await, TransferStatus::Draft);
    }

    #[tokio::test]
    async fn test_failed_compensation_is_partial() {
        let f = Fixture::new(MemoryStore::autocommit()).await;
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        f.seed(p1, 10).await;
        f.seed(p2, 1).await;
        let id = f.draft(&[(p1, 4), (p2, 5)]).await;

        // Chamadas 0 e 1 são os itens; a 2 é a reversão de p1.
        f.store.fail_ledger_write_at(2);
        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();

        match err {
            AppError::PartiallyApplied { transfer_id, stage, .. } => {
                assert_eq!(transfer_id, id);
                assert_eq!(stage, "compensation");
            }
            other => panic!("erro inesperado: {other:?}"),
        }
        assert_eq!(f.status(id).await, TransferStatus::Draft);
        assert_eq!(f.at_origin(p1).await, dec(6));
        assert_eq!(f.at_origin(p2).await, dec(1));
    }

    #[tokio::test]
    async fn test_status_write_failure_without_transaction_is_partial() {
        let f = Fixture::new(MemoryStore::autocommit()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let id = f.draft(&[(p, 4)]).await;

        f.store.fail_transition_writes(true);
        let err = f.machine.send(f.tenant, id, f.actor).await.unwrap_err();
        f.store.fail_transition_writes(false);

        match err {
            AppError::PartiallyApplied { transfer_id, stage, .. } => {
                assert_eq!(transfer_id, id);
                assert_eq!(stage, "status");
            }
            other => panic!("erro inesperado: {other:?}"),
        }
        assert_eq!(f.status(id).await, TransferStatus::Draft);
        assert_eq!(f.at_origin(p).await, dec(6));
        assert_eq!(f.movements(id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_receive_ledger_failure_without_transaction_is_compensated() {
        let f = Fixture::new(MemoryStore::autocommit()).await;
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());
        f.seed(p1, 10).await;
        f.seed(p2, 10).await;
        let id = f.draft(&[(p1, 3), (p2, 2)]).await;
        f.machine.send(f.tenant, id, f.actor).await.unwrap();

        // Segunda chamada de apply_delta no receive falha.
        f.store.fail_ledger_write_at(1);
        let err = f.machine.receive(f.tenant, id, f.actor).await.unwrap_err();

        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
        assert_eq!(f.at_dest(p1).await, dec(0));
        assert_eq!(f.at_dest(p2).await, dec(0));
        assert_eq!(f.status(id).await, TransferStatus::Sent);

        f.machine.receive(f.tenant, id, f.actor).await.unwrap();
        assert_eq!(f.at_dest(p1).await, dec(3));
        assert_eq!(f.at_dest(p2).await, dec(2));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let f = Fixture::new(MemoryStore::new()).await;
        let p = Uuid::new_v4();
        f.seed(p, 10).await;
        let first = f.draft(&[(p, 1)]).await;
        let second = f.draft(&[(p, 1)]).await;
        f.machine.send(f.tenant, first, f.actor).await.unwrap();

        let all = f.machine.list(f.tenant, None).await.unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second, first]);

        let drafts = f.machine.list(f.tenant, Some(TransferStatus::Draft)).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].id, second);

        assert!(f.machine.list(Uuid::new_v4(), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quantity_of_unknown_key_is_zero() {
        let f = Fixture::new(MemoryStore::new()).await;
        let q = f.machine.quantity(f.tenant, f.origin, Uuid::new_v4()).await.unwrap();
        assert_eq!(q, Decimal::ZERO);
    }

    #[test]
    fn test_validate_items_rejects_empty_and_non_positive() {
        assert!(matches!(validate_items(&[]), Err(AppError::EmptyTransfer)));

        let item = TransferItem { transfer_id: 1, position: 0, product_id: Uuid::new_v4(), quantity: dec(0) };
        assert!(matches!(validate_items(&[item]), Err(AppError::InvalidQuantity(_))));

        let item = TransferItem {
            transfer_id: 1,
            position: 0,
            product_id: Uuid::new_v4(),
            quantity: Decimal::new(123_456, 5),
        };
        assert!(matches!(validate_items(&[item]), Err(AppError::InvalidQuantity(_))));
    }
}
