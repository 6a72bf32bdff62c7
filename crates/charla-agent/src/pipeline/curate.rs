//! Deterministic dataset curation after each completed turn.
//!
//! Tiers:
//! - **failure** - at least one guardrail check failed. Requires a sampled
//!   trace so the entry can link back to spans; unsampled turns are skipped.
//! - **golden** - every check passed. Recorded unconfirmed; `/rate 5` or a 👍
//!   reaction later upgrades confidence through scores, not here.
//! - **correction** - filed by `/feedback`, carrying the expected output.

use charla_store::types::DatasetTier;
use tracing::warn;

use crate::AgentDeps;

pub fn curate_after_turn(
    deps: &AgentDeps,
    trace_id: Option<&str>,
    user_text: &str,
    reply: &str,
    failed_checks: &[(String, String)],
) {
    if !deps.config.eval.auto_curate {
        return;
    }

    let result = if failed_checks.is_empty() {
        deps.store.add_dataset_entry(
            DatasetTier::Golden,
            user_text,
            reply,
            None,
            Some(&serde_json::json!({ "confirmed": false })),
            &["auto".to_string()],
            trace_id,
        )
    } else {
        // Failure entries without a trace would be unactionable - skip them.
        let Some(trace_id) = trace_id else {
            return;
        };
        let failed: Vec<&str> = failed_checks.iter().map(|(name, _)| name.as_str()).collect();
        deps.store.add_dataset_entry(
            DatasetTier::Failure,
            user_text,
            reply,
            None,
            Some(&serde_json::json!({ "confirmed": false, "failed_checks": failed })),
            &["auto".to_string()],
            Some(trace_id),
        )
    };

    if let Err(e) = result {
        warn!(error = %e, "dataset curation failed");
    }
}

/// `/feedback` files a correction for the most recent exchange.
pub fn curate_correction(
    deps: &AgentDeps,
    trace_id: Option<&str>,
    user_text: &str,
    reply: &str,
    expected: &str,
) {
    if let Err(e) = deps.store.add_dataset_entry(
        DatasetTier::Correction,
        user_text,
        reply,
        Some(expected),
        Some(&serde_json::json!({ "confirmed": true })),
        &["feedback".to_string()],
        trace_id,
    ) {
        warn!(error = %e, "correction entry failed");
    }
    if let Some(trace_id) = trace_id {
        let _ = deps
            .store
            .append_score(trace_id, "user_correction", 0.0, "user", Some(expected));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests_support::test_deps_custom;

    #[tokio::test]
    async fn failure_tier_requires_a_sampled_trace() {
        let (deps, _, _) = test_deps_custom(|c| c.eval.auto_curate = true).await;
        let failed = vec![("language_match".to_string(), "es".to_string())];

        // No trace id: nothing is filed.
        curate_after_turn(&deps, None, "hola", "hello", &failed);
        assert!(deps
            .store
            .list_dataset_entries(Some(DatasetTier::Failure))
            .unwrap()
            .is_empty());

        // With a trace id the failure entry links back to it.
        deps.store.start_trace("t1", "+34", "chat").unwrap();
        curate_after_turn(&deps, Some("t1"), "hola", "hello", &failed);
        let entries = deps
            .store
            .list_dataset_entries(Some(DatasetTier::Failure))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].trace_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn clean_turn_files_an_unconfirmed_golden_entry() {
        let (deps, _, _) = test_deps_custom(|c| c.eval.auto_curate = true).await;
        curate_after_turn(&deps, None, "hola", "¡hola!", &[]);
        let entries = deps
            .store
            .list_dataset_entries(Some(DatasetTier::Golden))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata.as_ref().unwrap()["confirmed"], false);
    }

    #[tokio::test]
    async fn disabled_curation_files_nothing() {
        let (deps, _, _) = test_deps_custom(|_| {}).await;
        curate_after_turn(&deps, None, "hola", "¡hola!", &[]);
        assert!(deps.store.list_dataset_entries(None).unwrap().is_empty());
    }
}
