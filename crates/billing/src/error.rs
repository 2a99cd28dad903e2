//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Any failure reported by Stripe, including network errors and timeouts.
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// A customer-scoped operation was called before a Stripe customer exists.
    #[error("Account is not ready for billing: no Stripe customer")]
    NotReady,

    /// Local lookup failure, e.g. an invoice that belongs to another customer.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
