//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing and stitching a page
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing request fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The page did not reach a usable state within its budget
    #[error("Navigation timeout or error: {0}")]
    NavigationTimeout(String),

    /// The document reported no usable height (blank or broken page)
    #[error("Page height detection failed: {0}")]
    HeightDetectionFailed(String),

    /// A scroll, raster or script step failed mid-pipeline
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// The final image could not be encoded
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    /// The overall request deadline elapsed
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// The browser backend could not be started or a session could not be opened
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    /// Failed to execute JavaScript
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status reflecting the failure class.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidInput(_) => 400,
            Error::NavigationTimeout(_) | Error::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Re-tag a mid-pipeline failure as `CaptureFailed`, keeping deadline
    /// expiry as a timeout.
    pub(crate) fn into_capture_failure(self, context: &str) -> Error {
        match self {
            Error::Timeout(_) | Error::CaptureFailed(_) => self,
            other => Error::CaptureFailed(format!("{}: {}", context, other)),
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_failure_class() {
        assert_eq!(Error::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(Error::NavigationTimeout("x".into()).status_code(), 504);
        assert_eq!(Error::Timeout(10).status_code(), 504);
        assert_eq!(Error::HeightDetectionFailed("x".into()).status_code(), 500);
        assert_eq!(Error::CaptureFailed("x".into()).status_code(), 500);
        assert_eq!(Error::EncodeFailed("x".into()).status_code(), 500);
    }

    #[test]
    fn capture_failure_keeps_timeouts() {
        let e = Error::Timeout(250).into_capture_failure("scroll");
        assert!(matches!(e, Error::Timeout(250)));

        let e = Error::ScriptError("boom".into()).into_capture_failure("scroll");
        match e {
            Error::CaptureFailed(msg) => assert!(msg.contains("scroll") && msg.contains("boom")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
