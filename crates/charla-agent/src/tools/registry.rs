//! Tool registry and intent-category router.
//!
//! Selection budget: with categories `C` and global budget `B`, each category
//! contributes up to `max(2, B / |C|)` tools in declared order; the
//! concatenation is truncated to `B`. The meta-tool rides outside the budget
//! and is prepended by the executor's definition list.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::Tool;

pub struct ToolRegistry {
    /// Declared order is selection order within a category.
    tools: RwLock<Vec<Arc<dyn Tool>>>,
    /// Runtime-registered categories mapping to existing tool names.
    dynamic: RwLock<HashMap<String, Vec<String>>>,
    /// Lazily built category → tools index, dropped by `reset_cache`.
    index: RwLock<Option<HashMap<String, Vec<Arc<dyn Tool>>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
            dynamic: RwLock::new(HashMap::new()),
            index: RwLock::new(None),
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().unwrap().push(tool);
        self.reset_cache();
    }

    /// Map a new category name onto already-registered tools at runtime.
    pub fn register_dynamic_category(&self, name: &str, tool_names: &[String]) {
        self.dynamic
            .write()
            .unwrap()
            .insert(name.to_string(), tool_names.to_vec());
        self.reset_cache();
    }

    /// Invalidate the category index; the next lookup rebuilds it.
    pub fn reset_cache(&self) {
        *self.index.write().unwrap() = None;
    }

    /// The closed category set the classifier may emit (declared + dynamic).
    pub fn known_categories(&self) -> Vec<String> {
        self.ensure_index();
        let index = self.index.read().unwrap();
        let mut cats: Vec<String> = index.as_ref().unwrap().keys().cloned().collect();
        cats.sort();
        cats
    }

    pub fn tools_for_category(&self, category: &str) -> Vec<Arc<dyn Tool>> {
        self.ensure_index();
        let index = self.index.read().unwrap();
        index
            .as_ref()
            .unwrap()
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap()
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    /// Proportional-budget selection across `categories`.
    pub fn select_tools(&self, categories: &[String], budget: usize) -> Vec<Arc<dyn Tool>> {
        if categories.is_empty() || budget == 0 {
            return Vec::new();
        }
        let per_cat = (budget / categories.len()).max(2);

        let mut selected: Vec<Arc<dyn Tool>> = Vec::new();
        for cat in categories {
            let pool = self.tools_for_category(cat);
            for tool in pool.into_iter().take(per_cat) {
                if !selected.iter().any(|t| t.name() == tool.name()) {
                    selected.push(tool);
                }
            }
        }
        selected.truncate(budget);
        debug!(
            categories = ?categories,
            budget,
            selected = selected.len(),
            "tools selected"
        );
        selected
    }

    fn ensure_index(&self) {
        {
            if self.index.read().unwrap().is_some() {
                return;
            }
        }
        let tools = self.tools.read().unwrap();
        let dynamic = self.dynamic.read().unwrap();

        let mut index: HashMap<String, Vec<Arc<dyn Tool>>> = HashMap::new();
        for tool in tools.iter() {
            index
                .entry(tool.category().to_string())
                .or_default()
                .push(Arc::clone(tool));
        }
        for (cat, names) in dynamic.iter() {
            let entry = index.entry(cat.clone()).or_default();
            for name in names {
                if let Some(tool) = tools.iter().find(|t| t.name() == name) {
                    if !entry.iter().any(|t| t.name() == tool.name()) {
                        entry.push(Arc::clone(tool));
                    }
                }
            }
        }
        *self.index.write().unwrap() = Some(index);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolResult;
    use async_trait::async_trait;

    struct FakeTool {
        name: String,
        category: String,
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn category(&self) -> &str {
            &self.category
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            ToolResult::success("ok")
        }
    }

    fn tool(name: &str, category: &str) -> Arc<dyn Tool> {
        Arc::new(FakeTool {
            name: name.to_string(),
            category: category.to_string(),
        })
    }

    fn registry_with(counts: &[(&str, usize)]) -> ToolRegistry {
        let registry = ToolRegistry::new();
        for (cat, n) in counts {
            for i in 0..*n {
                registry.register(tool(&format!("{cat}_{i}"), cat));
            }
        }
        registry
    }

    #[test]
    fn budget_is_shared_proportionally() {
        let registry = registry_with(&[("projects", 6), ("github", 6)]);
        let selected = registry.select_tools(
            &["projects".to_string(), "github".to_string()],
            8,
        );
        assert!(selected.len() <= 8);
        let projects = selected.iter().filter(|t| t.category() == "projects").count();
        let github = selected.iter().filter(|t| t.category() == "github").count();
        assert!(projects >= 2, "projects contributed {projects}");
        assert!(github >= 2, "github contributed {github}");
    }

    #[test]
    fn many_categories_keep_min_two_each_until_truncation() {
        let registry = registry_with(&[("a", 4), ("b", 4), ("c", 4), ("d", 4), ("e", 4)]);
        let cats: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        // per_cat = max(2, 8/5) = 2; concatenation = 10, truncated to 8.
        let selected = registry.select_tools(&cats, 8);
        assert_eq!(selected.len(), 8);
        assert!(selected.iter().filter(|t| t.category() == "a").count() == 2);
        assert!(selected.iter().filter(|t| t.category() == "e").count() == 0);
    }

    #[test]
    fn declared_order_is_preserved() {
        let registry = registry_with(&[("files", 5)]);
        let selected = registry.select_tools(&["files".to_string()], 8);
        let names: Vec<_> = selected.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["files_0", "files_1", "files_2", "files_3", "files_4"]);
    }

    #[test]
    fn unknown_category_contributes_nothing() {
        let registry = registry_with(&[("files", 3)]);
        let selected = registry.select_tools(
            &["files".to_string(), "nonexistent".to_string()],
            8,
        );
        assert_eq!(selected.len(), 3);
    }

    #[test]
    fn dynamic_category_maps_existing_tools() {
        let registry = registry_with(&[("files", 2), ("notes", 2)]);
        registry.register_dynamic_category(
            "workspace",
            &["files_0".to_string(), "notes_1".to_string()],
        );
        let selected = registry.select_tools(&["workspace".to_string()], 8);
        let names: Vec<_> = selected.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["files_0", "notes_1"]);
        assert!(registry.known_categories().contains(&"workspace".to_string()));
    }

    #[test]
    fn reset_cache_picks_up_new_registrations() {
        let registry = registry_with(&[("files", 1)]);
        assert_eq!(registry.tools_for_category("files").len(), 1);
        registry.register(tool("files_9", "files"));
        assert_eq!(registry.tools_for_category("files").len(), 2);
    }
}
