// src/models/inventory.rs

use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::AppError;

/// `reference_type` gravado nas movimentações geradas por transferências.
pub const REFERENCE_STOCK_TRANSFER: &str = "stock_transfer";

/// Casas decimais das colunas `NUMERIC(18, 4)` de quantidade.
pub const QUANTITY_SCALE: u32 = 4;

/// Maior valor que cabe em `NUMERIC(18, 4)`.
pub fn max_quantity() -> Decimal {
    Decimal::new(999_999_999_999_999_999, QUANTITY_SCALE)
}

/// Quantidade de item ou movimentação: positiva e representável sem arredondar.
pub fn check_quantity(quantity: Decimal) -> Result<(), AppError> {
    if quantity <= Decimal::ZERO
        || quantity.normalize().scale() > QUANTITY_SCALE
        || quantity > max_quantity()
    {
        return Err(AppError::InvalidQuantity(quantity));
    }
    Ok(())
}

// --- 1. Chave do Saldo ---
// (tenant, filial, produto) identifica uma linha única de `stock_balances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BalanceKey {
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
}

impl BalanceKey {
    pub fn new(tenant_id: Uuid, branch_id: Uuid, product_id: Uuid) -> Self {
        Self { tenant_id, branch_id, product_id }
    }
}

// --- 2. Saldo de Estoque ---
// Cache consultável da "soma das movimentações" de um par (filial, produto).
// Nunca é apagado: saldo zero é uma linha válida.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockBalance {
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    #[schema(example = "6")]
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

// --- 3. Movimentações (Histórico) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "stock_movement_type", rename_all = "lowercase")] // Banco
#[serde(rename_all = "lowercase")] // JSON
pub enum MovementType {
    Entrada, // Vira "entrada"
    Saida,   // Vira "saida"
}

/// Linha imutável do livro-razão. Só existe INSERT.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Movement {
    pub id: i64,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    #[schema(example = "4")]
    pub quantity: Decimal,
    #[schema(example = "stock_transfer")]
    pub reference_type: String,
    pub reference_id: i64,
    #[schema(example = "Transferência #12: saída de Loja Centro para Loja Norte")]
    pub notes: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Entrada ainda não persistida de `Movement`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovement {
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub reference_type: String,
    pub reference_id: i64,
    pub notes: String,
    pub user_id: Uuid,
}

impl NewMovement {
    /// Quantidade zero ou negativa nunca chega ao banco.
    pub fn validate(&self) -> Result<(), AppError> {
        check_quantity(self.quantity)
    }

    pub fn into_movement(self, id: i64, created_at: DateTime<Utc>) -> Movement {
        Movement {
            id,
            tenant_id: self.tenant_id,
            branch_id: self.branch_id,
            product_id: self.product_id,
            movement_type: self.movement_type,
            quantity: self.quantity,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            notes: self.notes,
            user_id: self.user_id,
            created_at,
        }
    }
}
