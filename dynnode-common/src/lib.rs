pub mod codec;
pub mod messages;
pub mod store;
pub mod types;

pub use codec::*;
pub use messages::*;
pub use store::*;
pub use types::*;
