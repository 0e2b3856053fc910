//! sqlx persistence. Every function takes a `MySqlConnection` so callers
//! decide the transaction boundary; `_for_update` readers take row locks.

pub mod leave;
pub mod overtime;
pub mod shift;
pub mod timesheet;

use std::str::FromStr;

use chrono::Duration;

/// Decodes a snake_case enum column.
pub(crate) fn parse<T>(column: &str, value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn secs(d: Duration) -> i64 {
    d.num_seconds()
}

pub(crate) fn from_secs(s: i64) -> Duration {
    Duration::seconds(s)
}

/// `?, ?, ?` for an `IN (...)` list.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
