//! The message-processing core: tool registry and router, bounded tool
//! executor, context builder, critical-path orchestrator, and the agent outer
//! loop. The gateway crate wires this against the real WhatsApp egress and the
//! HTTP ingress; tests wire it against mocks.

pub mod classify;
pub mod compact;
pub mod context;
pub mod executor;
pub mod facts;
pub mod indexer;
pub mod mirror;
pub mod pipeline;
pub mod session;
pub mod summarize;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use charla_core::config::CharlaConfig;
use charla_core::tracker::TaskTracker;
use charla_core::CharlaError;
use charla_guardrails::GuardrailsPipeline;
use charla_llm::LlmProvider;
use charla_scheduler::SchedulerHandle;
use charla_security::{AuditLog, PolicyEngine};
use charla_store::Store;
use charla_trace::TraceRecorder;

use crate::classify::IntentClassifier;
use crate::executor::ToolExecutor;
use crate::indexer::EmbeddingIndexer;
use crate::mirror::{ActivityLog, MemoryMirror, SnapshotWriter};
use crate::session::hitl::HitlMailbox;
use crate::tools::{registry::ToolRegistry, CurrentPrincipal};

/// Messaging egress as the core consumes it. The gateway implements it with
/// the provider REST client; tests implement it in memory.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send `text`, chunking as needed. Returns the first chunk's provider
    /// message id when the provider reports one.
    async fn send_message(
        &self,
        principal: &str,
        text: &str,
    ) -> Result<Option<String>, CharlaError>;

    async fn send_reaction(
        &self,
        provider_message_id: &str,
        emoji: &str,
    ) -> Result<(), CharlaError>;

    async fn mark_as_read(&self, provider_message_id: &str) -> Result<(), CharlaError>;
}

/// Everything the pipeline needs, wired once at startup.
pub struct AgentDeps {
    pub config: CharlaConfig,
    pub store: Arc<Store>,
    pub provider: Arc<dyn LlmProvider>,
    pub outbound: Arc<dyn Outbound>,
    pub recorder: Arc<TraceRecorder>,
    pub guardrails: Arc<GuardrailsPipeline>,
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub classifier: Arc<IntentClassifier>,
    pub indexer: Arc<EmbeddingIndexer>,
    pub scheduler: SchedulerHandle,
    pub tracker: TaskTracker,
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditLog>,
    pub hitl: Arc<HitlMailbox>,
    pub principal_cell: Arc<CurrentPrincipal>,
    pub mirror: Arc<MemoryMirror>,
    pub activity: Arc<ActivityLog>,
    pub snapshots: Arc<SnapshotWriter>,
    /// Conversation-id cache: one store lookup per principal per process.
    pub conv_cache: DashMap<String, i64>,
    /// Cancel signals for running agent sessions, keyed by principal.
    pub agent_cancel: DashMap<String, CancellationToken>,
}

impl AgentDeps {
    /// Wire the full dependency graph. The audit log is opened eagerly -
    /// failure there is a startup error the caller must surface.
    pub fn new(
        config: CharlaConfig,
        store: Arc<Store>,
        provider: Arc<dyn LlmProvider>,
        outbound: Arc<dyn Outbound>,
        scheduler: SchedulerHandle,
        tracker: TaskTracker,
    ) -> Result<Arc<Self>, CharlaError> {
        let recorder = Arc::new(TraceRecorder::new(
            Arc::clone(&store),
            config.trace.enabled,
            config.trace.sample_rate,
            config.trace.remote_endpoint.clone(),
        ));

        let guardrails = Arc::new(GuardrailsPipeline::new(
            config.guardrails.clone(),
            Arc::clone(&provider),
            config.llm.chat_model.clone(),
            config.llm.judge_model.clone(),
        ));

        let indexer = Arc::new(EmbeddingIndexer::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            tracker.clone(),
        ));

        let principal_cell = Arc::new(CurrentPrincipal::new());
        let registry = Arc::new(ToolRegistry::new());
        tools::builtin::register_builtin_tools(
            &registry,
            &config,
            Arc::clone(&store),
            Arc::clone(&indexer),
            scheduler.clone(),
            Arc::clone(&principal_cell),
        );

        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&provider),
            Arc::clone(&registry),
            config.llm.chat_model.clone(),
            config.llm.classifier_model.clone(),
            config.tools.max_tool_iterations,
            config.tools.tools_per_call,
            Duration::from_secs(config.llm.main_timeout_secs),
        ));

        let classifier = Arc::new(IntentClassifier::new(
            Arc::clone(&provider),
            config.llm.classifier_model.clone(),
            Duration::from_secs(config.llm.classifier_timeout_secs),
        ));

        let policy = Arc::new(PolicyEngine::load(&config.paths.policy_file));
        let audit = Arc::new(
            AuditLog::open(format!("{}/audit.jsonl", config.paths.data_dir))
                .map_err(|e| CharlaError::Fatal(format!("audit log open failed: {e}")))?,
        );

        let mirror = Arc::new(MemoryMirror::new(
            Arc::clone(&store),
            &config.paths.data_dir,
            config.memory.memory_flush_enabled,
        ));
        let activity = Arc::new(ActivityLog::new(&config.paths.data_dir));
        let snapshots = Arc::new(SnapshotWriter::new(&config.paths.data_dir));

        Ok(Arc::new(Self {
            config,
            store,
            provider,
            outbound,
            recorder,
            guardrails,
            registry,
            executor,
            classifier,
            indexer,
            scheduler,
            tracker,
            policy,
            audit,
            hitl: Arc::new(HitlMailbox::new()),
            principal_cell,
            mirror,
            activity,
            snapshots,
            conv_cache: DashMap::new(),
            agent_cancel: DashMap::new(),
        }))
    }

    /// Conversation id for a principal, cached for the process lifetime.
    pub fn conversation_id(&self, principal: &str) -> Result<i64, CharlaError> {
        if let Some(id) = self.conv_cache.get(principal) {
            return Ok(*id);
        }
        let id = self
            .store
            .get_or_create_conversation(principal)
            .map_err(|e| CharlaError::Store(e.to_string()))?;
        self.conv_cache.insert(principal.to_string(), id);
        Ok(id)
    }
}
