pub mod dialogue;
pub mod scenarios;
pub mod simulations;
pub mod turn;

use tracing::warn;

use crate::api_errors::{AppError, RETRY_MESSAGE};
use crate::errors::SimError;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_NEEDS_RETRY: &str = "needs_retry";

/// Retryable failures become a generic retry message for a `needs_retry`
/// body; everything else is an error response.
pub(crate) fn retry_or_fail(err: SimError) -> Result<String, AppError> {
    if err.is_retryable() {
        warn!("Retryable failure: {}", err);
        Ok(RETRY_MESSAGE.to_string())
    } else {
        Err(AppError::from(err))
    }
}
