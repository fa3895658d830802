#![forbid(unsafe_code)]

mod status;
mod waiting;

pub use status::*;
pub use waiting::*;

#[cfg(test)]
mod tests;
