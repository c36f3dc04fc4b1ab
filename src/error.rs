use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The date supplied '{date}' is invalid, expected YYYYMMDD")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Custom range of {days} days exceeds the max lookback of {max_lookback} days")]
    CustomRangeExceedsLookback { days: usize, max_lookback: usize },

    #[error("Cannot distribute records across an empty timestamp range")]
    EmptyRange,

    #[error("Field '{field}' has non numeric value {value}")]
    InvalidMetric { field: String, value: String },

    #[error("Backfill boundary {date} must fall on a {expected}")]
    InvalidBackfillBoundary { date: String, expected: &'static str },

    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("Unknown document type '{0}'")]
    UnknownDocType(String),

    #[error("API request failed: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("API responded with status {status}: {body}")]
    ApiStatus { status: u16, body: String },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("{message}")]
    NoData { message: String },

    #[error("Job deadline exceeded")]
    DeadlineExceeded,
}
