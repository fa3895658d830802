#![forbid(unsafe_code)]

pub mod ids;
pub mod links;
pub mod names;
pub mod state;
pub mod template;

pub use ids::*;
pub use state::*;
