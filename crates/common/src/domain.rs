mod applied_mutation;
mod beneficiary;
mod entity;
mod fund;
mod mutation;
mod remote;
mod result;
mod transaction;

pub use applied_mutation::*;
pub use beneficiary::*;
pub use entity::*;
pub use fund::*;
pub use mutation::*;
pub use remote::*;
pub use result::*;
pub use transaction::*;
