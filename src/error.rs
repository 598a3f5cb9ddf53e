use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExportError {
    #[error("Image load timeout after {timeout:?}: {url}")]
    LoadTimeout { url: String, timeout: Duration },

    #[error("Image load failed: {0}")]
    LoadError(String),

    #[error("An export is already in progress")]
    ExportInProgress,

    #[error("Canvas capture resulted in zero dimensions ({width}x{height})")]
    EmptyCapture { width: u32, height: u32 },

    #[error("Failed to create image blob: {0}")]
    EncodeError(String),

    #[error("Clipboard API not supported on this platform")]
    ClipboardUnsupported,

    #[error("Clipboard write failed: {0}")]
    ClipboardWriteError(String),

    #[error("Display scale changed since page load, reload required")]
    ReloadRequired,

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl ExportError {
    /// Non-fatal errors are reported to the user as a notice, not as a failure.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExportError::ClipboardUnsupported)
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ExportError::ClipboardUnsupported => ErrorSeverity::Low,
            ExportError::ExportInProgress => ErrorSeverity::Low,
            ExportError::EmptyCapture { .. } => ErrorSeverity::Low,
            ExportError::ReloadRequired => ErrorSeverity::Medium,
            ExportError::ConfigurationError(_) => ErrorSeverity::High,
            _ => ErrorSeverity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// A short user-facing message produced by an export attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

pub const GENERIC_FAILURE_NOTICE: &str = "Export failed. Please try again.";

const NOTICE_KEYWORDS: &[(&str, &str)] = &[
    (
        "clipboard",
        "Clipboard access denied. Please check your browser permissions.",
    ),
    ("timeout", "Export timed out. Please try again."),
    ("in progress", "An export is already in progress."),
    (
        "zero dimensions",
        "The content is not visible. Please ensure the tab/section is expanded and try again.",
    ),
    (
        "reload required",
        "The page zoom changed. Please reload the page to export images.",
    ),
];

/// Pick the notice for a failed export by matching the error message against
/// the keyword table, first match wins.
pub fn notice_for(error: &ExportError) -> Notice {
    let message = error.to_string().to_lowercase();
    let text = NOTICE_KEYWORDS
        .iter()
        .find(|(keyword, _)| message.contains(keyword))
        .map(|(_, text)| *text)
        .unwrap_or(GENERIC_FAILURE_NOTICE);
    Notice::error(text)
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::ConfigurationError(err.to_string())
    }
}

impl From<image::ImageError> for ExportError {
    fn from(err: image::ImageError) -> Self {
        ExportError::EncodeError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_keywords() {
        assert_eq!(
            notice_for(&ExportError::ClipboardWriteError("denied".into())).message,
            "Clipboard access denied. Please check your browser permissions."
        );
        assert_eq!(
            notice_for(&ExportError::LoadTimeout {
                url: "https://example.com/logo.png".into(),
                timeout: Duration::from_secs(5),
            })
            .message,
            "Export timed out. Please try again."
        );
        assert_eq!(
            notice_for(&ExportError::ExportInProgress).message,
            "An export is already in progress."
        );
        assert!(notice_for(&ExportError::EmptyCapture { width: 0, height: 10 })
            .message
            .starts_with("The content is not visible"));
        assert_eq!(
            notice_for(&ExportError::ExportFailed("boom".into())).message,
            GENERIC_FAILURE_NOTICE
        );
        assert_eq!(
            notice_for(&ExportError::EncodeError("no data".into())).kind,
            NoticeKind::Error
        );
    }

    #[test]
    fn test_fatality() {
        assert!(!ExportError::ClipboardUnsupported.is_fatal());
        assert!(ExportError::ExportInProgress.is_fatal());
        assert_eq!(ExportError::ClipboardUnsupported.severity(), ErrorSeverity::Low);
        assert_eq!(
            ExportError::ConfigurationError("x".into()).severity(),
            ErrorSeverity::High
        );
    }
}
