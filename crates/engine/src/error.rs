//! Errors surfaced synchronously by Control Surface operations (spec §4.7).

use thiserror::Error;

use layline_core::CoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("not_authenticated")]
    NotAuthenticated,

    #[error("out_of_range")]
    OutOfRange,

    #[error("invalid_value")]
    InvalidValue,

    #[error("empty_set")]
    EmptySet,
}

impl From<CoreError> for ControlError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::WindowOutOfRange(_) => Self::OutOfRange,
            CoreError::InvalidPointValue(_) => Self::InvalidValue,
            CoreError::EmptyCountrySet => Self::EmptySet,
            CoreError::UnknownCountry(_) => Self::InvalidValue,
        }
    }
}

pub type ControlResult<T> = std::result::Result<T, ControlError>;
