use thiserror::Error;

/// `format_error`: the backend answered, but not in a shape we can translate.
#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error("{flavor} does not support {what}")]
    Unsupported { flavor: &'static str, what: &'static str },
    #[error("request has no messages")]
    EmptyMessages,
}

pub type Result<T> = std::result::Result<T, FormatError>;
