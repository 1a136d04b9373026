// src/models/transfer.rs

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::AppError;
use crate::models::inventory::check_quantity;

// --- Enums ---

/// Ciclo de vida: draft → sent → received, ou draft → cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "stock_transfer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Draft,
    Sent,
    Received,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Draft => "draft",
            TransferStatus::Sent => "sent",
            TransferStatus::Received => "received",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    /// Status de destino da ação, se a aresta existir. Não há outras arestas.
    pub fn next(&self, action: TransferAction) -> Option<TransferStatus> {
        match (self, action) {
            (TransferStatus::Draft, TransferAction::Send) => Some(TransferStatus::Sent),
            (TransferStatus::Sent, TransferAction::Receive) => Some(TransferStatus::Received),
            (TransferStatus::Draft, TransferAction::Cancel) => Some(TransferStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Send,
    Receive,
    Cancel,
}

impl TransferAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferAction::Send => "send",
            TransferAction::Receive => "receive",
            TransferAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Entidades ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    #[schema(example = 12)]
    pub id: i64,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub from_branch_id: Uuid,
    pub to_branch_id: Uuid,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub sent_by: Option<Uuid>,
    pub received_at: Option<DateTime<Utc>>,
    pub received_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// Linha da transferência. A quantidade é imutável depois que o status sai de `draft`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    #[schema(ignore)]
    pub transfer_id: i64,
    #[schema(example = 0)]
    pub position: i32,
    pub product_id: Uuid,
    #[schema(example = "4")]
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferDetail {
    #[serde(flatten)]
    pub header: Transfer,
    pub items: Vec<TransferItem>,
}

// --- Criação (rascunho) ---

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransferItem {
    pub product_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub tenant_id: Uuid,
    pub from_branch_id: Uuid,
    pub to_branch_id: Uuid,
    pub items: Vec<NewTransferItem>,
}

impl NewTransfer {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.from_branch_id == self.to_branch_id {
            return Err(AppError::SameBranch);
        }
        if self.items.is_empty() {
            return Err(AppError::EmptyTransfer);
        }
        self.items.iter().try_for_each(|i| check_quantity(i.quantity))
    }
}

// --- Transições persistidas ---
// Cada variante carrega só os campos que a aresta grava.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferTransition {
    Sent { by: Uuid, at: DateTime<Utc> },
    Received { by: Uuid, at: DateTime<Utc> },
    Cancelled { at: DateTime<Utc> },
}

impl TransferTransition {
    pub fn target(&self) -> TransferStatus {
        match self {
            TransferTransition::Sent { .. } => TransferStatus::Sent,
            TransferTransition::Received { .. } => TransferStatus::Received,
            TransferTransition::Cancelled { .. } => TransferStatus::Cancelled,
        }
    }

    pub fn action(&self) -> TransferAction {
        match self {
            TransferTransition::Sent { .. } => TransferAction::Send,
            TransferTransition::Received { .. } => TransferAction::Receive,
            TransferTransition::Cancelled { .. } => TransferAction::Cancel,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            TransferTransition::Sent { at, .. }
            | TransferTransition::Received { at, .. }
            | TransferTransition::Cancelled { at } => *at,
        }
    }

    /// Aplica a transição numa cópia em memória do registro.
    pub fn apply_to(&self, transfer: &mut Transfer) {
        transfer.status = self.target();
        transfer.updated_at = self.at();
        match *self {
            TransferTransition::Sent { by, at } => {
                transfer.sent_by = Some(by);
                transfer.sent_at = Some(at);
            }
            TransferTransition::Received { by, at } => {
                transfer.received_by = Some(by);
                transfer.received_at = Some(at);
            }
            TransferTransition::Cancelled { .. } => {}
        }
    }
}

// --- Requisições de ação ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendRequest {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

/// Conjunto fechado de ações aceitas pela máquina de estados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferCommand {
    Send(SendRequest),
    Receive(ReceiveRequest),
    Cancel(CancelRequest),
}

impl TransferCommand {
    pub fn new(action: TransferAction, tenant_id: Uuid, actor_id: Uuid) -> Self {
        match action {
            TransferAction::Send => TransferCommand::Send(SendRequest { tenant_id, actor_id }),
            TransferAction::Receive => TransferCommand::Receive(ReceiveRequest { tenant_id, actor_id }),
            TransferAction::Cancel => TransferCommand::Cancel(CancelRequest { tenant_id, actor_id }),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct TransferActionResponse {
    #[schema(example = 12)]
    pub id: i64,
    pub status: TransferStatus,
}

impl From<&Transfer> for TransferActionResponse {
    fn from(t: &Transfer) -> Self {
        Self { id: t.id, status: t.status }
    }
}
