// src/middleware/tenancy.rs

use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::common::error::ApiError; // Usamos o nosso ApiError para rejeição
use crate::middleware::i18n::Locale;

// O nome do nosso cabeçalho HTTP customizado
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

// Extrator do tenant das rotas de leitura e de criação de rascunhos.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext(pub Uuid);

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        // A rejeição segue o idioma do cliente, como os demais erros.
        let locale = match Locale::from_request_parts(parts, state).await {
            Ok(locale) => locale,
            Err(never) => match never {},
        };

        let value = parts.headers.get(TENANT_ID_HEADER).ok_or_else(|| {
            ApiError::bad_request(
                &locale,
                "O cabeçalho X-Tenant-ID é obrigatório.",
                "The X-Tenant-ID header is required.",
                None,
            )
        })?;

        let tenant_id = value
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                ApiError::bad_request(
                    &locale,
                    "Cabeçalho X-Tenant-ID inválido (não é um UUID).",
                    "Invalid X-Tenant-ID header (not a UUID).",
                    None,
                )
            })?;

        Ok(TenantContext(tenant_id))
    }
}
