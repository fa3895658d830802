#![forbid(unsafe_code)]

use crate::store::StoreError;
use rusqlite::{Connection, OptionalExtension};
use std::sync::OnceLock;
use time::format_description::{self, BorrowedFormatItem};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

const UTC_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z";

fn utc_format() -> &'static [BorrowedFormatItem<'static>] {
    static FORMAT: OnceLock<Vec<BorrowedFormatItem<'static>>> = OnceLock::new();
    FORMAT.get_or_init(|| format_description::parse(UTC_FORMAT).unwrap_or_default())
}

pub(in crate::store) fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(nanos).unwrap_or(i64::MAX)
}

pub(in crate::store) fn format_utc(at: OffsetDateTime) -> Result<String, StoreError> {
    at.format(utc_format())
        .map_err(|_| StoreError::InvalidInput("timestamp out of range"))
}

pub(in crate::store) fn parse_utc(raw: &str) -> Result<OffsetDateTime, StoreError> {
    PrimitiveDateTime::parse(raw, utc_format())
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| StoreError::InvalidInput("malformed stored timestamp"))
}

pub(in crate::store) fn utc_from_ms(ms: i64) -> Result<String, StoreError> {
    let at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|_| StoreError::InvalidInput("timestamp out of range"))?;
    format_utc(at)
}

/// Returns a creation stamp strictly after every stamp already in `table`,
/// so `(create_time, id)` order matches insertion order even when the clock
/// stalls or steps backwards.
pub(in crate::store) fn next_create_time(
    conn: &Connection,
    table: &'static str,
) -> Result<String, StoreError> {
    let now = OffsetDateTime::now_utc();
    let latest: Option<String> = conn
        .query_row(&format!("SELECT MAX(create_time) FROM {table}"), [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    let stamp = match latest {
        Some(raw) => {
            let latest = parse_utc(&raw)?;
            if now > latest {
                now
            } else {
                latest + Duration::microseconds(1)
            }
        }
        None => now,
    };
    format_utc(stamp)
}
