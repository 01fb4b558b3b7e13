use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid account handle {handle:?}: {reason}")]
    InvalidAccount { handle: String, reason: &'static str },
}
