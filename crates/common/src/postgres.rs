mod applied_mutation_repository;
mod beneficiary_repository;
mod client;
mod config;
mod fund_repository;
mod transaction_repository;

pub use applied_mutation_repository::*;
pub use beneficiary_repository::*;
pub use client::*;
pub use config::*;
pub use fund_repository::*;
pub use transaction_repository::*;
