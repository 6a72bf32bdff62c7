//! Observability: traces, hierarchical spans, and scores.
//!
//! Recording is strictly best-effort. Every sink failure is swallowed and
//! logged at debug level; a trace that fails to record must never change what
//! the pipeline does. When sampling skips a message the same handles exist but
//! every operation is a no-op.

pub mod context;
pub mod recorder;

pub use context::{current_trace, in_current_context, with_trace};
pub use recorder::{SpanGuard, SpanKind, TraceHandle, TraceRecorder};
