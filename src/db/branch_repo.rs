// src/db/branch_repo.rs

use async_trait::async_trait;
use uuid::Uuid;

use crate::{common::error::AppError, db::db::PgConn, db::ports::BranchDirectory};

// A tabela `branches` pertence ao catálogo; aqui só lemos o nome.
#[derive(Clone, Default)]
pub struct PgBranchDirectory;

impl PgBranchDirectory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BranchDirectory<PgConn> for PgBranchDirectory {
    async fn get_name(&self, conn: &mut PgConn, tenant_id: Uuid, branch_id: Uuid) -> Result<Option<String>, AppError> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT name FROM branches WHERE id = $1 AND tenant_id = $2",
        )
        .bind(branch_id)
        .bind(tenant_id)
        .fetch_optional(&mut **conn)
        .await?;

        Ok(name)
    }
}
