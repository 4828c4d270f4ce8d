pub mod config;
pub mod conversation;
pub mod summary;

pub use config::*;
pub use conversation::*;
pub use summary::*;
