// src/router.rs

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{config::AppState, docs::ApiDoc, handlers};

pub fn app(app_state: AppState) -> Router {
    let transfer_routes = Router::new()
        .route(
            "/",
            post(handlers::transfers::create_transfer).get(handlers::transfers::list_transfers),
        )
        .route("/{transfer_id}", get(handlers::transfers::get_transfer))
        .route("/{transfer_id}/action", post(handlers::transfers::apply_transfer_action))
        .route("/{transfer_id}/movements", get(handlers::transfers::list_transfer_movements));

    let stock_routes = Router::new()
        .route("/{branch_id}/{product_id}", get(handlers::transfers::get_stock_quantity));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/health", get(|| async { "OK" }))
        .nest("/api/transfers", transfer_routes)
        .nest("/api/stock", stock_routes)
        .with_state(app_state)
}
