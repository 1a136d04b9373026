pub mod inventory;
pub mod transfer;
