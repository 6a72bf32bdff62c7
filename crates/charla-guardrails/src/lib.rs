//! Pre-delivery reply validation.
//!
//! Every outbound assistant text passes through [`GuardrailsPipeline`] before
//! it reaches the egress client. Checks are deterministic except the opt-in
//! LLM judges; every check is fail-open - an error inside a check never
//! blocks a reply.

pub mod checks;
pub mod language;
pub mod pii;
pub mod pipeline;

pub use checks::CheckResult;
pub use pipeline::{GuardrailOutcome, GuardrailsPipeline};
