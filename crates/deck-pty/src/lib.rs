pub mod command;
pub mod error;
pub mod host;
pub mod types;

pub use command::*;
pub use error::*;
pub use host::*;
pub use types::*;
