pub mod comments;
pub mod posts;
pub mod tags;
pub mod users;

use crate::error::{AppError, AppResult};

/// Ids come from the path as text so a non-numeric id is a 404, like any
/// other unknown resource.
pub(crate) fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>().map_err(|_| AppError::NotFound)
}
