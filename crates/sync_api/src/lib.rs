pub mod domain;
pub mod http;
pub mod in_process;
pub mod sync_api;

pub use domain::*;
pub use in_process::*;
pub use sync_api::*;
