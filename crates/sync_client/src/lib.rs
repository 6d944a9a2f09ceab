pub mod client_config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod field_client;
pub mod http_endpoint;
pub mod local_store;
mod resolve;
pub mod sync_worker;

pub use client_config::*;
pub use connectivity::*;
pub use coordinator::*;
pub use error::*;
pub use field_client::*;
pub use http_endpoint::*;
pub use local_store::*;
pub use sync_worker::*;
