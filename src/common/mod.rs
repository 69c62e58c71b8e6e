pub mod errors;
pub mod listeners;
pub mod logger;
pub mod types;

pub use errors::*;
pub use listeners::*;
pub use types::*;
