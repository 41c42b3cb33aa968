pub mod config;
pub mod error;
pub mod sink;
pub mod types;

pub use config::*;
pub use error::*;
pub use sink::*;
pub use types::*;
