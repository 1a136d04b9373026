use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::middleware::i18n::Locale;
use crate::models::transfer::{TransferAction, TransferStatus};

// Nosso tipo de erro de domínio, com `thiserror` para melhor ergonomia.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Quantidade inválida: {0}")]
    InvalidQuantity(Decimal),

    #[error("Origem e destino são a mesma filial")]
    SameBranch,

    #[error("Transferência {0} não encontrada")]
    TransferNotFound(i64),

    #[error("Ação '{action}' não permitida no status '{status}'")]
    InvalidTransition {
        status: TransferStatus,
        action: TransferAction,
    },

    #[error("Transferência sem itens")]
    EmptyTransfer,

    #[error("Estoque insuficiente do produto {product_id} na filial {branch_id}: disponível {available}, solicitado {requested}")]
    InsufficientStock {
        branch_id: Uuid,
        product_id: Uuid,
        available: Decimal,
        requested: Decimal,
    },

    // Deltas já foram gravados num store sem transação e algo falhou depois.
    // Não pode ser reexecutado às cegas: exige conciliação.
    #[error("Transferência {transfer_id} aplicada parcialmente na etapa '{stage}': {reason}")]
    PartiallyApplied {
        transfer_id: i64,
        stage: &'static str,
        reason: String,
    },

    #[error("Armazenamento indisponível: {0}")]
    StorageUnavailable(String),

    // Deadlock ou falha de serialização: a transação foi desfeita e pode ser repetida.
    #[error("Conflito de concorrência: {0}")]
    ConcurrentUpdate(String),

    // Variante para erros de banco de dados (sqlx)
    #[error("Erro de banco de dados")]
    DatabaseError(sqlx::Error),

    // Variante genérica para qualquer outro erro inesperado
    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

/// SQLSTATEs em que o Postgres aborta a transação e uma nova tentativa pode passar
/// (40001 serialization_failure, 40P01 deadlock_detected).
pub fn is_retryable_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01")
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        let retryable = err
            .as_database_error()
            .and_then(|db| db.code())
            .is_some_and(|code| is_retryable_sqlstate(&code));
        if retryable {
            return AppError::ConcurrentUpdate(err.to_string());
        }
        AppError::DatabaseError(err)
    }
}

impl AppError {
    /// Código estável, legível por máquina.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppError::SameBranch => "SAME_BRANCH",
            AppError::TransferNotFound(_) => "NOT_FOUND",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::EmptyTransfer => "EMPTY_TRANSFER",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::PartiallyApplied { .. } => "PARTIALLY_APPLIED",
            AppError::ConcurrentUpdate(_) => "CONCURRENT_UPDATE",
            AppError::StorageUnavailable(_) | AppError::DatabaseError(_) => "STORAGE_UNAVAILABLE",
            AppError::InternalServerError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_)
            | AppError::InvalidQuantity(_)
            | AppError::SameBranch
            | AppError::InvalidTransition { .. }
            | AppError::EmptyTransfer
            | AppError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            AppError::TransferNotFound(_) => StatusCode::NOT_FOUND,
            AppError::ConcurrentUpdate(_) => StatusCode::CONFLICT,
            AppError::PartiallyApplied { .. }
            | AppError::StorageUnavailable(_)
            | AppError::DatabaseError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_) | AppError::DatabaseError(_))
    }

    /// Traduz o erro para a resposta HTTP no idioma do cliente.
    pub fn to_api_error(&self, locale: &Locale) -> ApiError {
        let pt = locale.is_portuguese();
        let status = self.status();

        let error = match self {
            AppError::ValidationError(_) => {
                tr(pt, "Um ou mais campos são inválidos.", "One or more fields are invalid.")
            }
            AppError::InvalidQuantity(q) => tr(
                pt,
                &format!("Quantidade inválida: {}. Deve ser maior que zero, com no máximo 4 casas decimais.", q),
                &format!("Invalid quantity: {}. Must be greater than zero with at most 4 decimal places.", q),
            ),
            AppError::SameBranch => tr(
                pt,
                "A filial de origem e a de destino devem ser diferentes.",
                "Source and destination branches must differ.",
            ),
            AppError::TransferNotFound(_) => tr(pt, "não encontrado", "not found"),
            AppError::ConcurrentUpdate(_) => {
                tracing::warn!("Conflito de concorrência: {}", self);
                tr(
                    pt,
                    "Conflito com outra operação simultânea. Nada foi alterado; tente novamente.",
                    "Conflict with a concurrent operation. Nothing was changed; please retry.",
                )
            }
            AppError::InvalidTransition { status, action } => tr(
                pt,
                &format!("A ação '{}' não é permitida para uma transferência com status '{}'.", action, status),
                &format!("Action '{}' is not allowed for a transfer in status '{}'.", action, status),
            ),
            AppError::EmptyTransfer => tr(pt, "A transferência não possui itens.", "The transfer has no items."),
            AppError::InsufficientStock { available, requested, .. } => tr(
                pt,
                &format!("Estoque insuficiente: disponível {}, solicitado {}.", available, requested),
                &format!("Insufficient stock: available {}, requested {}.", available, requested),
            ),
            AppError::PartiallyApplied { transfer_id, .. } => {
                tracing::error!("🔥 Aplicação parcial: {}", self);
                tr(
                    pt,
                    &format!("A transferência {} foi aplicada parcialmente e precisa de conciliação.", transfer_id),
                    &format!("Transfer {} was partially applied and needs reconciliation.", transfer_id),
                )
            }
            // Todos os outros erros viram 500 genérico. O detalhe só vai para o log.
            e => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                tr(pt, "Ocorreu um erro inesperado.", "An unexpected error occurred.")
            }
        };

        let details = match self {
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors.iter()
                        .map(|e| e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string()))
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                Some(json!(details))
            }
            AppError::InsufficientStock { branch_id, product_id, available, requested } => Some(json!({
                "branchId": branch_id,
                "productId": product_id,
                "available": available,
                "requested": requested,
            })),
            _ => None,
        };

        ApiError { status, code: self.code(), error, details }
    }
}

fn tr(pt: bool, pt_text: &str, en_text: &str) -> String {
    if pt { pt_text.to_string() } else { en_text.to_string() }
}

// Resposta de erro pronta para o cliente.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Rejeição de extrator (corpo, rota, cabeçalho) no formato padrão.
    pub fn bad_request(locale: &Locale, pt_text: &str, en_text: &str, details: Option<serde_json::Value>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            error: tr(locale.is_portuguese(), pt_text, en_text),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_api_error(&Locale::default()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_mapping() {
        let cases = [
            (AppError::TransferNotFound(1), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (AppError::EmptyTransfer, StatusCode::BAD_REQUEST, "EMPTY_TRANSFER"),
            (
                AppError::InvalidTransition { status: TransferStatus::Sent, action: TransferAction::Cancel },
                StatusCode::BAD_REQUEST,
                "INVALID_TRANSITION",
            ),
            (AppError::StorageUnavailable("down".into()), StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_UNAVAILABLE"),
            (
                AppError::PartiallyApplied { transfer_id: 3, stage: "movements", reason: "x".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
                "PARTIALLY_APPLIED",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_deadlock_and_serialization_failure_are_retryable() {
        assert!(is_retryable_sqlstate("40P01"));
        assert!(is_retryable_sqlstate("40001"));
        assert!(!is_retryable_sqlstate("23514"));

        let err = AppError::ConcurrentUpdate("deadlock detected".into());
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONCURRENT_UPDATE");
        assert!(!err.to_api_error(&Locale("en".into())).error.contains("deadlock"));
    }

    #[test]
    fn test_non_database_sqlx_error_stays_storage() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_storage());
        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = AppError::StorageUnavailable("connection refused at 10.0.0.7:5432".into());
        let api = err.to_api_error(&Locale("en".into()));
        assert!(!api.error.contains("10.0.0.7"));
        assert_eq!(api.error, "An unexpected error occurred.");
    }

    #[test]
    fn test_not_found_message_follows_locale() {
        assert_eq!(AppError::TransferNotFound(9).to_api_error(&Locale("en".into())).error, "not found");
        assert_eq!(AppError::TransferNotFound(9).to_api_error(&Locale("pt".into())).error, "não encontrado");
    }
}
