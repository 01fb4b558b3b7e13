pub mod config;
pub mod error;
pub mod snowflake;
pub mod types;

pub use config::{BrowserBackend, Config};
pub use error::TokwatchError;
pub use types::*;
