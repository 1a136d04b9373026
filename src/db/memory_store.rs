// src/db/memory_store.rs
//
// Backend em memória. Usado nos testes da máquina de estados e pelo
// `STORAGE_BACKEND=memory` em desenvolvimento.
//
// Uma unidade de trabalho segura o mutex do estado inteiro até o commit/rollback,
// o que serializa ações concorrentes (equivale a travar todas as linhas).
// No modo atômico o estado é copiado no `begin` e restaurado se a conexão for
// descartada sem commit; no modo autocommit cada escrita vale na hora.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::db::ports::{BranchDirectory, MovementLog, StockLedger, TransferRepository, TransferStore};
use crate::models::inventory::{BalanceKey, Movement, NewMovement, StockBalance};
use crate::models::transfer::{
    NewTransfer, Transfer, TransferDetail, TransferItem, TransferStatus, TransferTransition,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    balances: BTreeMap<BalanceKey, StockBalance>,
    movements: Vec<Movement>,
    transfers: BTreeMap<(Uuid, i64), Transfer>,
    items: HashMap<i64, Vec<TransferItem>>,
    branches: HashMap<(Uuid, Uuid), String>,
    last_transfer_id: i64,
    last_movement_id: i64,
}

// Falhas injetáveis para exercitar os caminhos de erro de armazenamento.
#[derive(Debug)]
struct Faults {
    movements: AtomicBool,
    transitions: AtomicBool,
    // Contagem regressiva de `apply_delta` até a próxima falha; -1 desliga.
    ledger_countdown: AtomicI64,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            movements: AtomicBool::new(false),
            transitions: AtomicBool::new(false),
            ledger_countdown: AtomicI64::new(-1),
        }
    }
}

impl Faults {
    fn ledger_should_fail(&self) -> bool {
        let current = self.ledger_countdown.load(Ordering::SeqCst);
        if current < 0 {
            return false;
        }
        if current == 0 {
            self.ledger_countdown.store(-1, Ordering::SeqCst);
            return true;
        }
        self.ledger_countdown.store(current - 1, Ordering::SeqCst);
        false
    }
}

pub struct MemoryConn {
    state: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryConn {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.state = snapshot;
        }
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    atomic: bool,
    faults: Arc<Faults>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store transacional: rollback desfaz tudo.
    pub fn new() -> Self {
        Self::with_mode(true)
    }

    /// Store sem transação: cada escrita é definitiva.
    pub fn autocommit() -> Self {
        Self::with_mode(false)
    }

    fn with_mode(atomic: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            atomic,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Registra o nome de uma filial (o catálogo é externo a este subsistema).
    pub async fn add_branch(&self, tenant_id: Uuid, branch_id: Uuid, name: &str) {
        let mut state = self.state.lock().await;
        state.branches.insert((tenant_id, branch_id), name.to_string());
    }

    /// Define um saldo inicial sem passar pelo livro-razão.
    pub async fn seed_balance(&self, key: BalanceKey, quantity: Decimal) {
        let mut state = self.state.lock().await;
        state.balances.insert(key, StockBalance {
            tenant_id: key.tenant_id,
            branch_id: key.branch_id,
            product_id: key.product_id,
            quantity,
            updated_at: Utc::now(),
        });
    }

    pub async fn quantity(&self, key: BalanceKey) -> Decimal {
        let state = self.state.lock().await;
        state.balances.get(&key).map(|b| b.quantity).unwrap_or(Decimal::ZERO)
    }

    pub async fn movement_count(&self) -> usize {
        self.state.lock().await.movements.len()
    }

    pub fn fail_movement_writes(&self, on: bool) {
        self.faults.movements.store(on, Ordering::SeqCst);
    }

    pub fn fail_transition_writes(&self, on: bool) {
        self.faults.transitions.store(on, Ordering::SeqCst);
    }

    /// A chamada de `apply_delta` de índice `n` (a partir de 0) falha uma vez.
    pub fn fail_ledger_write_at(&self, n: i64) {
        self.faults.ledger_countdown.store(n, Ordering::SeqCst);
    }
}

fn unavailable(what: &str) -> AppError {
    AppError::StorageUnavailable(format!("falha injetada: {}", what))
}

#[async_trait]
impl TransferStore for MemoryStore {
    type Conn = MemoryConn;

    fn is_atomic(&self) -> bool {
        self.atomic
    }

    async fn begin(&self, _tenant_id: Uuid, _actor_id: Option<Uuid>) -> Result<MemoryConn, AppError> {
        let state = self.state.clone().lock_owned().await;
        let snapshot = self.atomic.then(|| (*state).clone());
        Ok(MemoryConn { state, snapshot })
    }

    async fn commit(&self, mut conn: MemoryConn) -> Result<(), AppError> {
        conn.snapshot = None;
        Ok(())
    }

    async fn rollback(&self, conn: MemoryConn) -> Result<(), AppError> {
        // O Drop restaura o snapshot.
        drop(conn);
        Ok(())
    }
}

#[async_trait]
impl StockLedger<MemoryConn> for MemoryStore {
    async fn apply_delta(&self, conn: &mut MemoryConn, key: BalanceKey, delta: Decimal) -> Result<Decimal, AppError> {
        if self.faults.ledger_should_fail() {
            return Err(unavailable("ledger"));
        }

        let current = conn.state.balances.get(&key).map(|b| b.quantity).unwrap_or(Decimal::ZERO);
        let next = current + delta;
        if next < Decimal::ZERO {
            return Err(AppError::InsufficientStock {
                branch_id: key.branch_id,
                product_id: key.product_id,
                available: current,
                requested: -delta,
            });
        }

        conn.state.balances.insert(key, StockBalance {
            tenant_id: key.tenant_id,
            branch_id: key.branch_id,
            product_id: key.product_id,
            quantity: next,
            updated_at: Utc::now(),
        });
        Ok(next)
    }

    async fn get_balance(&self, conn: &mut MemoryConn, key: BalanceKey) -> Result<Option<StockBalance>, AppError> {
        Ok(conn.state.balances.get(&key).cloned())
    }
}

#[async_trait]
impl MovementLog<MemoryConn> for MemoryStore {
    async fn record(&self, conn: &mut MemoryConn, entry: NewMovement) -> Result<Movement, AppError> {
        entry.validate()?;
        if self.faults.movements.load(Ordering::SeqCst) {
            return Err(unavailable("movements"));
        }

        conn.state.last_movement_id += 1;
        let movement = entry.into_movement(conn.state.last_movement_id, Utc::now());
        conn.state.movements.push(movement.clone());
        Ok(movement)
    }

    async fn list_by_reference(
        &self,
        conn: &mut MemoryConn,
        tenant_id: Uuid,
        reference_type: &str,
        reference_id: i64,
    ) -> Result<Vec<Movement>, AppError> {
        Ok(conn
            .state
            .movements
            .iter()
            .filter(|m| {
                m.tenant_id == tenant_id && m.reference_type == reference_type && m.reference_id == reference_id
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BranchDirectory<MemoryConn> for MemoryStore {
    async fn get_name(&self, conn: &mut MemoryConn, tenant_id: Uuid, branch_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(conn.state.branches.get(&(tenant_id, branch_id)).cloned())
    }
}

#[async_trait]
impl TransferRepository<MemoryConn> for MemoryStore {
    async fn create_draft(&self, conn: &mut MemoryConn, draft: NewTransfer) -> Result<TransferDetail, AppError> {
        draft.validate()?;

        conn.state.last_transfer_id += 1;
        let id = conn.state.last_transfer_id;
        let now = Utc::now();
        let header = Transfer {
            id,
            tenant_id: draft.tenant_id,
            from_branch_id: draft.from_branch_id,
            to_branch_id: draft.to_branch_id,
            status: TransferStatus::Draft,
            created_at: now,
            sent_at: None,
            sent_by: None,
            received_at: None,
            received_by: None,
            updated_at: now,
        };
        let items: Vec<TransferItem> = draft
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| TransferItem {
                transfer_id: id,
                position: position as i32,
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();

        conn.state.transfers.insert((draft.tenant_id, id), header.clone());
        conn.state.items.insert(id, items.clone());
        Ok(TransferDetail { header, items })
    }

    async fn find_for_update(&self, conn: &mut MemoryConn, tenant_id: Uuid, id: i64) -> Result<Option<Transfer>, AppError> {
        // A conexão já segura o lock do estado inteiro.
        self.find(conn, tenant_id, id).await
    }

    async fn find(&self, conn: &mut MemoryConn, tenant_id: Uuid, id: i64) -> Result<Option<Transfer>, AppError> {
        Ok(conn.state.transfers.get(&(tenant_id, id)).cloned())
    }

    async fn list(
        &self,
        conn: &mut MemoryConn,
        tenant_id: Uuid,
        status: Option<TransferStatus>,
    ) -> Result<Vec<Transfer>, AppError> {
        let mut transfers: Vec<Transfer> = conn
            .state
            .transfers
            .values()
            .filter(|t| t.tenant_id == tenant_id && status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(transfers)
    }

    async fn list_items(&self, conn: &mut MemoryConn, tenant_id: Uuid, id: i64) -> Result<Vec<TransferItem>, AppError> {
        if !conn.state.transfers.contains_key(&(tenant_id, id)) {
            return Ok(Vec::new());
        }
        Ok(conn.state.items.get(&id).cloned().unwrap_or_default())
    }

    async fn persist_transition(
        &self,
        conn: &mut MemoryConn,
        tenant_id: Uuid,
        id: i64,
        expected: TransferStatus,
        transition: TransferTransition,
    ) -> Result<Transfer, AppError> {
        if self.faults.transitions.load(Ordering::SeqCst) {
            return Err(unavailable("transitions"));
        }

        let transfer = conn
            .state
            .transfers
            .get_mut(&(tenant_id, id))
            .ok_or(AppError::TransferNotFound(id))?;
        if transfer.status != expected {
            return Err(AppError::InvalidTransition { status: transfer.status, action: transition.action() });
        }
        transition.apply_to(transfer);
        Ok(transfer.clone())
    }
}
