//! API request handlers

mod health;
mod jobs;
mod release_targets;
mod webhooks;

pub use health::*;
pub use jobs::*;
pub use release_targets::*;
pub use webhooks::*;

use crate::error::ApiError;
use std::str::FromStr;

/// Parse a UUID path segment into a typed id
pub(crate) fn parse_id<T: FromStr>(entity: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} id: {}", entity, raw)))
}
