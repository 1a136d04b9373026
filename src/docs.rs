// src/docs.rs

use utoipa::OpenApi;

use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Transfers ---
        handlers::transfers::apply_transfer_action,
        handlers::transfers::create_transfer,
        handlers::transfers::list_transfers,
        handlers::transfers::get_transfer,
        handlers::transfers::list_transfer_movements,

        // --- Stock ---
        handlers::transfers::get_stock_quantity,
    ),
    components(
        schemas(
            // --- Transfers ---
            models::transfer::TransferStatus,
            models::transfer::TransferAction,
            models::transfer::Transfer,
            models::transfer::TransferItem,
            models::transfer::TransferDetail,
            models::transfer::TransferActionResponse,

            // --- Inventory ---
            models::inventory::MovementType,
            models::inventory::Movement,
            models::inventory::StockBalance,

            // --- Payloads ---
            handlers::transfers::TransferActionBody,
            handlers::transfers::CreateTransferPayload,
            handlers::transfers::CreateTransferItemPayload,
            handlers::transfers::StockQuantityResponse,
        )
    ),
    tags(
        (name = "Transfers", description = "Transferências de Estoque entre Filiais"),
        (name = "Stock", description = "Saldos de Estoque por Filial")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_action_route() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/transfers/{transfer_id}/action"));
        assert!(doc.paths.paths.contains_key("/api/stock/{branch_id}/{product_id}"));
    }
}
