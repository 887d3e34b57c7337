use thiserror::Error;

/// Error classification shared by the queue, worker, and report engine.
///
/// The web surface maps kinds to HTTP statuses and the CLI prints them as a
/// prefix, so callers match on the kind rather than on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    IllegalState,
    Transient,
    Malformed,
    Permanent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::IllegalState => "illegal state",
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Permanent => "permanent",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BenchdError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Revision mismatch, duplicate submission, or create on an existing key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The requested transition is not permitted from the current status.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Broker or I/O failure that may succeed on retry.
    #[error("transient: {0}")]
    Transient(String),

    #[error("malformed: {0}")]
    Malformed(String),

    #[error("{0}")]
    Permanent(String),
}

impl BenchdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BenchdError::NotFound(_) => ErrorKind::NotFound,
            BenchdError::Conflict(_) => ErrorKind::Conflict,
            BenchdError::IllegalState(_) => ErrorKind::IllegalState,
            BenchdError::Transient(_) => ErrorKind::Transient,
            BenchdError::Malformed(_) => ErrorKind::Malformed,
            BenchdError::Permanent(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BenchdError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BenchdError::NotFound(_))
    }
}

impl From<std::io::Error> for BenchdError {
    fn from(e: std::io::Error) -> Self {
        BenchdError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for BenchdError {
    fn from(e: serde_json::Error) -> Self {
        BenchdError::Malformed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BenchdError>;
