mod error;
mod handlers;
mod server;

pub use error::*;
pub use server::*;
