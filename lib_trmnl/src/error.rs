use thiserror::Error;

/// # Trmnl Error
///
/// Failures surfaced by the registry, image store and responders.
/// Malformed device input (missing headers, bad refresh rates, unseen ids)
/// is defaulted, not reported here.
#[derive(Debug, Error)]
pub enum TrmnlError {
    /// The uploaded body does not declare an `image/*` media type.
    #[error("Content-Type must be image/*, got {0:?}")]
    InvalidContentType(String),

    /// The screen id cannot be used to name a file.
    #[error("Invalid screen id: {0:?}")]
    InvalidScreenId(String),

    /// No stored image for the requested id/extension.
    #[error("No image stored for screen {0}")]
    NotFound(String),

    /// Filesystem failure while storing or serving an image.
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}

impl TrmnlError {
    /// True for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TrmnlError::InvalidContentType(_) | TrmnlError::InvalidScreenId(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrmnlError>;
