use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to the user when a command cannot run.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    NotFound(String),

    #[error("please wait {:.1}s before using this command again", .0.as_secs_f64())]
    Cooldown(Duration),

    #[error("usage: {0}")]
    Usage(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the URL-to-delivery pipeline.
///
/// `DownloadFailed` and `UploadFailed` are per-item and carry the 1-based
/// position of the item in the extraction result.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("unsupported platform")]
    UnsupportedPlatform,

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("no media found")]
    NoMediaFound,

    #[error("download #{index} failed: {reason}")]
    DownloadFailed { index: usize, reason: String },

    #[error("upload #{index} failed: {reason}")]
    UploadFailed { index: usize, reason: String },

    #[error("all {} downloads failed: {}", .0.len(), Joined(.0))]
    AllDownloadsFailed(Vec<MediaError>),

    #[error("all {} uploads failed: {}", .0.len(), Joined(.0))]
    AllUploadsFailed(Vec<MediaError>),

    #[error("payload too large ({size} bytes, max {limit})")]
    OversizedPayload { size: u64, limit: u64 },

    #[error("server answered {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl MediaError {
    /// Local preconditions and cancellation never get better on a second try.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MediaError::OversizedPayload { .. } | MediaError::Cancelled
        )
    }

    /// Position of the failed item, for per-item errors.
    pub fn item_index(&self) -> Option<usize> {
        match self {
            MediaError::DownloadFailed { index, .. } | MediaError::UploadFailed { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}

/// Errors reported by the outbound messaging transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("upload response carried no attachment id")]
    MissingAttachment,

    #[error("rejected: {0}")]
    Rejected(String),
}

struct Joined<'a>(&'a [MediaError]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_message_has_one_decimal() {
        let err = CommandError::Cooldown(Duration::from_millis(2340));
        assert_eq!(
            err.to_string(),
            "please wait 2.3s before using this command again"
        );
    }

    #[test]
    fn test_all_uploads_failed_lists_items_in_order() {
        let err = MediaError::AllUploadsFailed(vec![
            MediaError::UploadFailed {
                index: 1,
                reason: "cancelled".into(),
            },
            MediaError::UploadFailed {
                index: 2,
                reason: "rejected: too big".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "all 2 uploads failed: upload #1 failed: cancelled; upload #2 failed: rejected: too big"
        );
    }

    #[test]
    fn test_oversized_and_cancelled_are_not_retryable() {
        assert!(!MediaError::Cancelled.is_retryable());
        assert!(!MediaError::OversizedPayload { size: 2, limit: 1 }.is_retryable());
        assert!(MediaError::ExtractionFailed("x".into()).is_retryable());
    }

    #[test]
    fn test_item_index_only_for_per_item_errors() {
        let err = MediaError::DownloadFailed {
            index: 3,
            reason: "x".into(),
        };
        assert_eq!(err.item_index(), Some(3));
        assert_eq!(MediaError::NoMediaFound.item_index(), None);
    }
}
