//! Shared fixtures for pipeline tests: an in-memory dependency graph with a
//! scripted LLM and a recording outbound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use charla_core::config::CharlaConfig;
use charla_core::tracker::TaskTracker;
use charla_core::CharlaError;
use charla_llm::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
use charla_scheduler::SchedulerEngine;
use charla_store::Store;

use crate::{AgentDeps, Outbound};

/// Scripted provider: pops canned responses, then answers "ok". Embeddings
/// are deterministic from text length.
pub struct ScriptedLlm {
    pub responses: Mutex<VecDeque<ChatResponse>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_text(&self, text: &str) {
        self.responses.lock().unwrap().push_back(ChatResponse {
            text: text.to_string(),
            model: "scripted".to_string(),
            ..Default::default()
        });
    }

    pub fn push_response(&self, response: ChatResponse) {
        self.responses.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ChatResponse {
                text: "ok".to_string(),
                model: "scripted".to_string(),
                ..Default::default()
            }))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32, 1.0, 0.5])
            .collect())
    }
}

/// Outbound that records every send and mints sequential provider ids.
pub struct RecordingOutbound {
    pub sent: Mutex<Vec<(String, String)>>,
    pub reactions: Mutex<Vec<(String, String)>>,
}

impl RecordingOutbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_sent(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_message(
        &self,
        principal: &str,
        text: &str,
    ) -> Result<Option<String>, CharlaError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((principal.to_string(), text.to_string()));
        Ok(Some(format!("wamid.out{}", sent.len())))
    }

    async fn send_reaction(
        &self,
        provider_message_id: &str,
        emoji: &str,
    ) -> Result<(), CharlaError> {
        self.reactions
            .lock()
            .unwrap()
            .push((provider_message_id.to_string(), emoji.to_string()));
        Ok(())
    }

    async fn mark_as_read(&self, _provider_message_id: &str) -> Result<(), CharlaError> {
        Ok(())
    }
}

/// Full dependency graph over an in-memory store and temp data dir.
pub async fn test_deps() -> Arc<AgentDeps> {
    let (deps, _, _) = test_deps_with_mocks().await;
    deps
}

pub async fn test_deps_with_mocks() -> (Arc<AgentDeps>, Arc<ScriptedLlm>, Arc<RecordingOutbound>) {
    test_deps_custom(|_| {}).await
}

pub async fn test_deps_custom(
    tweak: impl FnOnce(&mut CharlaConfig),
) -> (Arc<AgentDeps>, Arc<ScriptedLlm>, Arc<RecordingOutbound>) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CharlaConfig::default();
    config.paths.data_dir = dir.path().to_string_lossy().to_string();
    config.paths.projects_root = dir.path().join("projects").to_string_lossy().to_string();
    config.paths.policy_file = dir.path().join("policy.yaml").to_string_lossy().to_string();
    std::fs::create_dir_all(&config.paths.projects_root).unwrap();
    // Allow-all policy so agent tests don't park on HITL prompts; gate tests
    // build their own engines.
    std::fs::write(&config.paths.policy_file, "default_action: allow\n").unwrap();
    tweak(&mut config);
    // The dir must outlive the deps; tests run in one process, leaking is fine.
    std::mem::forget(dir);

    let store = Arc::new(Store::open_in_memory().unwrap());
    let provider = ScriptedLlm::new();
    let outbound = RecordingOutbound::new();
    let (_engine, scheduler) = SchedulerEngine::new(tokio::sync::mpsc::channel(8).0);
    let tracker = TaskTracker::new();

    let deps = AgentDeps::new(
        config,
        store,
        Arc::clone(&provider) as Arc<dyn LlmProvider>,
        Arc::clone(&outbound) as Arc<dyn Outbound>,
        scheduler,
        tracker,
    )
    .unwrap();

    (deps, provider, outbound)
}
