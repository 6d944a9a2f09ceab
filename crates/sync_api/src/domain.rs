mod batch_applier;
mod entity_query_service;
mod payloads;

pub use batch_applier::*;
pub use entity_query_service::*;
pub use payloads::*;
