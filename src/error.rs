#[derive(Debug, thiserror::Error)]
pub enum CinnabarError {
    #[error("invalid snapshot file: {0}")]
    CorruptSnapshot(String),

    #[error("append-only file replay failed: {0}")]
    CorruptAof(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CinnabarResult<T> = Result<T, CinnabarError>;
