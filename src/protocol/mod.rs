pub mod events;
pub mod opcodes;
pub mod stats;
pub mod voice;

pub use events::*;
pub use opcodes::*;
pub use stats::*;
pub use voice::*;
