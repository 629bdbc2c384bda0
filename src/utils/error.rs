use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page fetch failed for page {page} after {attempts} attempts: {message}")]
    PageFetchFailed {
        page: u32,
        attempts: u32,
        message: String,
    },

    #[error("Catalog returned no entries on the first page")]
    NoCatalogData,

    #[error("No verification code arrived after {attempts} mailbox polls")]
    OtpNotFound { attempts: u32 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn test_page_fetch_failed_display() {
        let err = AppError::PageFetchFailed {
            page: 3,
            attempts: 4,
            message: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Page fetch failed for page 3 after 4 attempts: connection reset"
        );
    }

    #[test]
    fn test_otp_not_found_display() {
        let err = AppError::OtpNotFound { attempts: 8 };
        assert_eq!(
            err.to_string(),
            "No verification code arrived after 8 mailbox polls"
        );
    }
}
