use thiserror::Error;

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Failure kinds shared by the codec, the service client and the session.
///
/// Validation failures are raised before any request is sent; every other
/// kind comes from file I/O or from the remote call and its response.
#[derive(Debug, Error)]
pub enum TryOnError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read image: {0}")]
    ReadError(String),

    #[error("malformed image data: {0}")]
    MalformedInput(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("{}", RATE_LIMITED_MESSAGE)]
    RateLimited,

    #[error("no response candidates from the API")]
    EmptyResponse,

    #[error("API did not return a valid image. It may have been blocked or the prompt was unclear.")]
    NoImageProduced,

    #[error("API did not return any fashion advice")]
    NoAdviceProduced,

    #[error("{0} not set")]
    MissingCredential(String),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl TryOnError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type TryOnResult<T> = std::result::Result<T, TryOnError>;
