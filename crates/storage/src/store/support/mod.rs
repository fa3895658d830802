#![forbid(unsafe_code)]

mod clock;
mod schema;
mod slow;

pub(super) use clock::*;
pub(super) use schema::{install_schema, preflight_gate};
pub(super) use slow::SlowOpGuard;
