use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("{what} must be positive, got {value}")]
    NotPositive { what: &'static str, value: f64 },

    #[error("Identifier out of range: {value}")]
    IdOutOfRange { value: i64 },

    #[error("Identifier space exhausted: {wanted} more needed")]
    IdExhausted { wanted: u64 },
}
