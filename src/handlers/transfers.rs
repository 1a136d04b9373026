// src/handlers/transfers.rs

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{i18n::Locale, tenancy::TenantContext},
    models::inventory::{check_quantity, Movement},
    models::transfer::{
        NewTransfer, NewTransferItem, Transfer, TransferAction, TransferActionResponse, TransferCommand,
        TransferDetail, TransferStatus,
    },
};

// ---
// Validação Customizada
// ---
fn validate_quantity(val: &Decimal) -> Result<(), ValidationError> {
    if check_quantity(*val).is_err() {
        let mut err = ValidationError::new("range");
        err.message = Some("A quantidade deve ser maior que zero, com no máximo 4 casas decimais.".into());
        return Err(err);
    }
    Ok(())
}

// Rejeições dos extratores no mesmo formato `{code, error, details}` dos outros erros.
fn bad_body(locale: &Locale, rejection: JsonRejection) -> ApiError {
    ApiError::bad_request(
        locale,
        "Corpo da requisição inválido.",
        "Invalid request body.",
        Some(json!({ "body": rejection.body_text() })),
    )
}

fn bad_path(locale: &Locale, rejection: PathRejection) -> ApiError {
    ApiError::bad_request(
        locale,
        "Parâmetro de rota inválido.",
        "Invalid path parameter.",
        Some(json!({ "path": rejection.body_text() })),
    )
}

fn bad_query(locale: &Locale, rejection: QueryRejection) -> ApiError {
    ApiError::bad_request(
        locale,
        "Parâmetro de consulta inválido.",
        "Invalid query parameter.",
        Some(json!({ "query": rejection.body_text() })),
    )
}

// ---
// Payloads
// ---

/// Corpo do endpoint de ação: o tenant e o ator vêm no próprio corpo.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferActionBody {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub action: TransferAction,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferItemPayload {
    pub product_id: Uuid,

    #[validate(custom(function = "validate_quantity"))]
    #[schema(example = "4")]
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransferPayload {
    pub from_branch_id: Uuid,
    pub to_branch_id: Uuid,

    #[validate(length(min = 1, message = "A transferência precisa de ao menos um item."), nested)]
    pub items: Vec<CreateTransferItemPayload>,
}

impl CreateTransferPayload {
    fn into_new_transfer(self, tenant_id: Uuid) -> NewTransfer {
        NewTransfer {
            tenant_id,
            from_branch_id: self.from_branch_id,
            to_branch_id: self.to_branch_id,
            items: self
                .items
                .into_iter()
                .map(|i| NewTransferItem { product_id: i.product_id, quantity: i.quantity })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTransfersQuery {
    /// Filtra pelo status (draft, sent, received, cancelled).
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StockQuantityResponse {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    #[schema(example = "6")]
    pub quantity: Decimal,
}

// ---
// Handler: apply_transfer_action
// ---
#[utoipa::path(
    post,
    path = "/api/transfers/{transfer_id}/action",
    tag = "Transfers",
    request_body = TransferActionBody,
    responses(
        (status = 200, description = "Ação aplicada", body = TransferActionResponse),
        (status = 400, description = "Ação inválida, estoque insuficiente ou transição proibida"),
        (status = 404, description = "Transferência não encontrada"),
        (status = 500, description = "Falha de armazenamento ou aplicação parcial")
    ),
    params(
        ("transfer_id" = i64, Path, description = "ID da Transferência")
    )
)]
pub async fn apply_transfer_action(
    State(app_state): State<AppState>,
    locale: Locale,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<TransferActionBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(transfer_id) = path.map_err(|rejection| bad_path(&locale, rejection))?;
    let Json(body) = payload.map_err(|rejection| bad_body(&locale, rejection))?;

    let command = TransferCommand::new(body.action, body.tenant_id, body.actor_id);

    let transfer = app_state
        .transfer_service
        .apply(transfer_id, command)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(TransferActionResponse::from(&transfer))))
}

// ---
// Handler: create_transfer
// ---
#[utoipa::path(
    post,
    path = "/api/transfers",
    tag = "Transfers",
    request_body = CreateTransferPayload,
    responses(
        (status = 201, description = "Rascunho criado", body = TransferDetail),
        (status = 400, description = "Payload inválido")
    ),
    params(
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    )
)]
pub async fn create_transfer(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    payload: Result<Json<CreateTransferPayload>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(|rejection| bad_body(&locale, rejection))?;

    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale))?;

    let detail = app_state
        .transfer_service
        .create_draft(payload.into_new_transfer(tenant.0))
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::CREATED, Json(detail)))
}

// ---
// Handler: list_transfers
// ---
#[utoipa::path(
    get,
    path = "/api/transfers",
    tag = "Transfers",
    responses(
        (status = 200, description = "Transferências da loja, mais recentes primeiro", body = Vec<Transfer>)
    ),
    params(
        ListTransfersQuery,
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    )
)]
pub async fn list_transfers(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    query: Result<Query<ListTransfersQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|rejection| bad_query(&locale, rejection))?;

    let transfers = app_state
        .transfer_service
        .list(tenant.0, query.status)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(transfers)))
}

// ---
// Handler: get_transfer
// ---
#[utoipa::path(
    get,
    path = "/api/transfers/{transfer_id}",
    tag = "Transfers",
    responses(
        (status = 200, description = "Transferência com itens", body = TransferDetail),
        (status = 404, description = "Transferência não encontrada")
    ),
    params(
        ("transfer_id" = i64, Path, description = "ID da Transferência"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    )
)]
pub async fn get_transfer(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    path: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(transfer_id) = path.map_err(|rejection| bad_path(&locale, rejection))?;

    let detail = app_state
        .transfer_service
        .get(tenant.0, transfer_id)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(detail)))
}

// ---
// Handler: list_transfer_movements
// ---
#[utoipa::path(
    get,
    path = "/api/transfers/{transfer_id}/movements",
    tag = "Transfers",
    responses(
        (status = 200, description = "Movimentações geradas pela transferência", body = Vec<Movement>),
        (status = 404, description = "Transferência não encontrada")
    ),
    params(
        ("transfer_id" = i64, Path, description = "ID da Transferência"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    )
)]
pub async fn list_transfer_movements(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    path: Result<Path<i64>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(transfer_id) = path.map_err(|rejection| bad_path(&locale, rejection))?;

    let movements = app_state
        .transfer_service
        .movements(tenant.0, transfer_id)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(movements)))
}

// ---
// Handler: get_stock_quantity
// ---
#[utoipa::path(
    get,
    path = "/api/stock/{branch_id}/{product_id}",
    tag = "Stock",
    responses(
        (status = 200, description = "Saldo atual (zero se nunca movimentado)", body = StockQuantityResponse)
    ),
    params(
        ("branch_id" = Uuid, Path, description = "ID da Filial"),
        ("product_id" = Uuid, Path, description = "ID do Produto"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Loja")
    )
)]
pub async fn get_stock_quantity(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path((branch_id, product_id)) = path.map_err(|rejection| bad_path(&locale, rejection))?;

    let quantity = app_state
        .transfer_service
        .quantity(tenant.0, branch_id, product_id)
        .await
        .map_err(|e| e.to_api_error(&locale))?;

    Ok((StatusCode::OK, Json(StockQuantityResponse { branch_id, product_id, quantity })))
}
