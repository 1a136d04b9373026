// src/config.rs

use std::{env, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;

use crate::db::{connect_pool, MemoryStore};
use crate::services::{TransferService, TransferStateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("STORAGE_BACKEND inválido: '{}' (use postgres ou memory)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub run_migrations: bool,
}

fn var_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} inválida ('{}'): {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Lê o `.env` (se existir) e as variáveis de ambiente.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let storage = match env::var("STORAGE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => StorageBackend::Postgres,
        };

        let database_url = env::var("DATABASE_URL").ok();
        if storage == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL deve ser definida para o backend postgres");
        }

        Ok(Self {
            storage,
            database_url,
            bind_addr: var_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", 5)?,
            db_acquire_timeout: Duration::from_secs(var_or("DB_ACQUIRE_TIMEOUT_SECS", 3)?),
            run_migrations: var_or("RUN_MIGRATIONS", true)?,
        })
    }
}

// O estado compartilhado que será acessível em toda a aplicação
#[derive(Clone)]
pub struct AppState {
    pub transfer_service: Arc<dyn TransferService>,
}

impl AppState {
    pub fn with_service(transfer_service: Arc<dyn TransferService>) -> Self {
        Self { transfer_service }
    }

    pub async fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let transfer_service: Arc<dyn TransferService> = match config.storage {
            StorageBackend::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL deve ser definida")?;

                let pool = connect_pool(database_url, config.db_max_connections, config.db_acquire_timeout)
                    .await
                    .context("Falha ao conectar ao banco de dados")?;
                tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

                if config.run_migrations {
                    sqlx::migrate!()
                        .run(&pool)
                        .await
                        .context("Falha ao rodar as migrações do banco de dados")?;
                    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");
                }

                Arc::new(TransferStateMachine::postgres(pool))
            }
            StorageBackend::Memory => {
                tracing::warn!("Backend em memória: os dados somem ao reiniciar");
                Arc::new(TransferStateMachine::in_memory(MemoryStore::new()))
            }
        };

        Ok(Self { transfer_service })
    }
}
