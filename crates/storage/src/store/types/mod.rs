#![forbid(unsafe_code)]

mod blocks;
mod chapters;
mod conversations;
mod prompts;
mod wiki;

pub use blocks::*;
pub use chapters::*;
pub use conversations::*;
pub use prompts::*;
pub use wiki::*;
