pub mod db;
pub use db::{connect_pool, PgConn, PgStore};
pub mod ports;
pub mod inventory_repo;
pub use inventory_repo::{PgMovementLog, PgStockLedger};
pub mod transfer_repo;
pub use transfer_repo::PgTransferRepository;
pub mod branch_repo;
pub use branch_repo::PgBranchDirectory;
pub mod memory_store;
pub use memory_store::{MemoryConn, MemoryStore};
