use thiserror::Error;

/// Validation and configuration errors raised by the domain layer.
///
/// These are surfaced synchronously to whatever caller attempted the
/// mutation (typically a Control Surface operation); they never represent
/// a retryable condition, so there is no `is_transient` here the way there
/// is on `layline_exchange::ExchangeError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("process_window_minutes out of range: {0} (expected 1..=60)")]
    WindowOutOfRange(u32),

    #[error("point_value is not one of the allowed values: {0}")]
    InvalidPointValue(String),

    #[error("countries must be a non-empty subset of the allowed set")]
    EmptyCountrySet,

    #[error("unknown country code: {0}")]
    UnknownCountry(String),
}
