//! The critical-path pipeline for inbound events.

pub mod curate;
pub mod process;
pub mod reaction;
pub mod slash;

#[cfg(test)]
pub(crate) mod tests_support;

pub use process::{handle_event, handle_message};
