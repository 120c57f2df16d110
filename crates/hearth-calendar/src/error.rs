//! Calendar-specific error types.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Invalid window: {start} is after {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("Feed returned HTTP {status}: {message}")]
    FeedStatus { status: u16, message: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Snapshot store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl CalendarError {
    /// User-friendly error message for the dashboard status line.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidWindow { .. } => "Calendar window is misconfigured".to_string(),
            Self::FeedStatus { status, .. } if *status == 401 || *status == 403 => {
                "Calendar feed refused access. Check the feed link.".to_string()
            }
            Self::FeedStatus { status, .. } if *status == 404 => {
                "Calendar feed not found".to_string()
            }
            Self::FeedStatus { status, .. } => format!("Calendar feed error ({})", status),
            Self::RateLimited(secs) => format!("Too many requests. Retrying in {} seconds.", secs),
            Self::InvalidPayload(_) => "Calendar feed sent unreadable data".to_string(),
            Self::Store(_) | Self::Serialization(_) | Self::Io(_) => {
                "Could not save dashboard data".to_string()
            }
            Self::NetworkError(_) => "Network error. Check your connection.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_user_messages() {
        let err = CalendarError::FeedStatus {
            status: 403,
            message: "forbidden".into(),
        };
        assert!(err.user_message().contains("refused"));

        let err = CalendarError::RateLimited(30);
        assert!(err.user_message().contains("30"));
    }
}
