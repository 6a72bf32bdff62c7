//! Built-in tools, grouped by intent category.

pub mod fetch;
pub mod files;
pub mod github;
pub mod memory;
pub mod notes;
pub mod projects;
pub mod reminder;
pub mod search;
pub mod shell;

use std::sync::Arc;

use charla_core::config::CharlaConfig;
use charla_scheduler::SchedulerHandle;
use charla_store::Store;

use crate::indexer::EmbeddingIndexer;
use crate::tools::{registry::ToolRegistry, CurrentPrincipal, Tool};

/// Register every built-in tool plus any skills found on disk.
/// Declared order within a category is the router's selection order.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    config: &CharlaConfig,
    store: Arc<Store>,
    indexer: Arc<EmbeddingIndexer>,
    scheduler: SchedulerHandle,
    principal: Arc<CurrentPrincipal>,
) {
    let root = std::path::PathBuf::from(&config.paths.projects_root);

    let tools: Vec<Arc<dyn Tool>> = vec![
        // memory
        Arc::new(memory::RememberTool {
            store: Arc::clone(&store),
            indexer: Arc::clone(&indexer),
        }),
        Arc::new(memory::SearchMemoriesTool {
            store: Arc::clone(&store),
            indexer: Arc::clone(&indexer),
        }),
        Arc::new(memory::ForgetTool {
            store: Arc::clone(&store),
        }),
        // notes
        Arc::new(notes::SaveNoteTool {
            store: Arc::clone(&store),
            indexer: Arc::clone(&indexer),
        }),
        Arc::new(notes::SearchNotesTool {
            store: Arc::clone(&store),
            indexer: Arc::clone(&indexer),
        }),
        // fetch
        Arc::new(fetch::FetchUrlTool::new()),
        // files
        Arc::new(files::ReadFileTool { root: root.clone() }),
        Arc::new(files::ListFilesTool { root: root.clone() }),
        Arc::new(files::WriteFileTool {
            root: root.clone(),
            enabled: config.agent.write_enabled,
        }),
        // shell
        Arc::new(shell::RunCommandTool {
            allowlist: config.agent.shell_allowlist.clone(),
            root: root.clone(),
        }),
        // schedule
        Arc::new(reminder::ScheduleReminderTool {
            scheduler: scheduler.clone(),
            store: Arc::clone(&store),
            principal: Arc::clone(&principal),
        }),
        Arc::new(reminder::ListRemindersTool {
            scheduler: scheduler.clone(),
        }),
        Arc::new(reminder::CancelReminderTool {
            scheduler,
            store: Arc::clone(&store),
        }),
        // projects
        Arc::new(projects::ListProjectsTool { root: root.clone() }),
        Arc::new(projects::ProjectSummaryTool { root }),
        // github
        Arc::new(github::CreateIssueTool::new()),
        Arc::new(github::ListIssuesTool::new()),
        // search
        Arc::new(search::WebSearchTool::new()),
    ];

    for tool in tools {
        registry.register(tool);
    }

    // Skills contribute additional tools under their declared categories.
    let skills_dir = std::path::Path::new(&config.paths.data_dir).join("skills");
    for entry in crate::tools::skill::load_skills(&skills_dir) {
        for tool in crate::tools::skill::skill_tools(&entry) {
            registry.register(tool);
        }
    }

    // External tool servers register like any other tool.
    for tool in crate::tools::server::load_server_tools(&config.paths.data_dir) {
        registry.register(tool);
    }
}
