pub type Result<T> = std::result::Result<T, Error>;

/// Invalid value for one of the shared types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Score {0} exceeds 100")]
    InvalidScore(u8),

    #[error("Unknown finger: {0}")]
    UnknownFinger(String),
}
