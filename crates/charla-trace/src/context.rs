//! Task-local trace propagation.
//!
//! The orchestrator binds a trace handle once with [`with_trace`]; everything
//! awaited inside sees it via [`current_trace`] without argument plumbing.
//! Futures handed to `tokio::spawn` lose task locals, so fork points wrap the
//! child in [`in_current_context`], which captures the caller's handle and
//! re-establishes it inside the new task.

use std::future::Future;

use crate::recorder::TraceHandle;

tokio::task_local! {
    static CURRENT_TRACE: TraceHandle;
}

/// Run `fut` with `trace` installed as the ambient trace.
pub async fn with_trace<F: Future>(trace: TraceHandle, fut: F) -> F::Output {
    CURRENT_TRACE.scope(trace, fut).await
}

/// The ambient trace, or a no-op handle outside any [`with_trace`] scope.
pub fn current_trace() -> TraceHandle {
    CURRENT_TRACE
        .try_with(|t| t.clone())
        .unwrap_or_else(|_| TraceHandle::noop())
}

/// Capture the caller's ambient trace and wrap `fut` so the child task
/// inherits it. Use at every `tokio::spawn` fork point.
pub fn in_current_context<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let trace = current_trace();
    async move { with_trace(trace, fut).await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::TraceRecorder;
    use charla_store::Store;
    use std::sync::Arc;

    #[tokio::test]
    async fn ambient_trace_is_visible_inside_scope() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = TraceRecorder::new(Arc::clone(&store), true, 1.0, None);
        let trace = rec.begin_trace("+34", "chat");
        let id = trace.trace_id().unwrap().to_string();

        let seen = with_trace(trace, async { current_trace().trace_id().map(String::from) }).await;
        assert_eq!(seen.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn outside_scope_yields_noop() {
        assert!(!current_trace().is_sampled());
    }

    #[tokio::test]
    async fn spawned_children_inherit_via_wrapper() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let rec = TraceRecorder::new(Arc::clone(&store), true, 1.0, None);
        let trace = rec.begin_trace("+34", "chat");
        let id = trace.trace_id().unwrap().to_string();

        let seen = with_trace(trace, async {
            // A parallel batch of children, all inheriting the parent's trace.
            let handles: Vec<_> = (0..3)
                .map(|_| {
                    tokio::spawn(in_current_context(async {
                        current_trace().trace_id().map(String::from)
                    }))
                })
                .collect();
            let mut out = Vec::new();
            for h in handles {
                out.push(h.await.unwrap());
            }
            out
        })
        .await;

        for child in seen {
            assert_eq!(child.as_deref(), Some(id.as_str()));
        }
    }
}
