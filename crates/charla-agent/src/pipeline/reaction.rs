//! Reaction events: map the emoji to a score on the originating trace.
//! Reactions never produce a reply.

use std::sync::Arc;

use charla_core::types::{reaction_score, ReactionEnvelope};
use tracing::{debug, info};

use crate::AgentDeps;

pub async fn handle_reaction(deps: Arc<AgentDeps>, envelope: ReactionEnvelope) {
    let trace = match deps
        .store
        .get_trace_by_provider_message(&envelope.target_message_id)
    {
        Ok(Some(trace)) => trace,
        Ok(None) => {
            debug!(
                target = %envelope.target_message_id,
                "reaction target has no trace, dropping"
            );
            return;
        }
        Err(e) => {
            debug!(error = %e, "reaction trace lookup failed");
            return;
        }
    };

    let (value, comment) = reaction_score(&envelope.emoji);
    if let Err(e) = deps.store.append_score(
        &trace.id,
        "user_reaction",
        value,
        "user",
        comment.as_deref(),
    ) {
        debug!(error = %e, "reaction score append failed");
        return;
    }
    info!(trace = %trace.id, value, "user reaction scored");
}
