//! Plan files: a TOML list of `[[tasks]]` turned into queue tasks.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use taskq_core::Task;

use crate::error::CliError;

/// Metadata key the shell runner reads the command from.
pub const COMMAND_KEY: &str = "command";

#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanTask {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| CliError::Plan(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&s)
            .map_err(|e| CliError::Plan(format!("{}: {e}", path.display())))
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let plan: PlanFile = toml::from_str(s).map_err(|e| e.to_string())?;
        plan.check()?;
        Ok(plan)
    }

    fn check(&self) -> Result<(), String> {
        if self.tasks.is_empty() {
            return Err("plan has no tasks".to_string());
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err("task id must not be empty".to_string());
            }
            if task.command.trim().is_empty() {
                return Err(format!("task '{}' has an empty command", task.id));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(format!("duplicate task id '{}'", task.id));
            }
        }
        Ok(())
    }

    /// Builds queue tasks in plan order. Tasks without their own
    /// `max_retries` get `default_max_retries`.
    pub fn into_tasks(self, default_max_retries: u32) -> Vec<Task> {
        self.tasks
            .into_iter()
            .map(|plan_task| {
                let description = if plan_task.description.is_empty() {
                    plan_task.command.clone()
                } else {
                    plan_task.description
                };
                let mut task = Task::with_id(plan_task.id, description)
                    .with_dependencies(plan_task.depends_on)
                    .with_max_retries(plan_task.max_retries.unwrap_or(default_max_retries));
                for (key, value) in plan_task.metadata {
                    task = task.with_metadata(key, value);
                }
                task.with_metadata(COMMAND_KEY, plan_task.command)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const PLAN: &str = r#"
[[tasks]]
id = "fetch"
command = "echo data"

[[tasks]]
id = "build"
description = "Build the report"
command = "cat"
depends_on = ["fetch"]
max_retries = 1
metadata = { owner = "ops", weight = 2 }
"#;

    #[test]
    fn test_parse_plan() {
        let plan = PlanFile::parse(PLAN).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].depends_on, vec!["fetch".to_string()]);
        assert_eq!(plan.tasks[1].metadata["weight"], serde_json::json!(2));
    }

    #[test]
    fn test_into_tasks_applies_defaults() {
        let tasks = PlanFile::parse(PLAN).unwrap().into_tasks(3);

        assert_eq!(tasks[0].id(), "fetch");
        assert_eq!(tasks[0].description(), "echo data");
        assert_eq!(tasks[0].max_retries(), 3);
        assert_eq!(tasks[0].metadata()[COMMAND_KEY], "echo data");

        assert_eq!(tasks[1].dependencies(), ["fetch".to_string()]);
        assert_eq!(tasks[1].max_retries(), 1);
        assert_eq!(tasks[1].metadata()["owner"], "ops");
    }

    #[test]
    fn test_rejects_bad_plans() {
        assert!(PlanFile::parse("").unwrap_err().contains("no tasks"));

        let dup = r#"
[[tasks]]
id = "a"
command = "true"
[[tasks]]
id = "a"
command = "true"
"#;
        assert!(PlanFile::parse(dup).unwrap_err().contains("duplicate"));

        let empty_cmd = "[[tasks]]\nid = \"a\"\ncommand = \" \"\n";
        assert!(PlanFile::parse(empty_cmd).unwrap_err().contains("empty command"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", PLAN).unwrap();
        let plan = PlanFile::load(file.path()).unwrap();
        assert_eq!(plan.tasks[0].id, "fetch");

        let missing = PlanFile::load(Path::new("/nonexistent/plan.toml")).unwrap_err();
        assert!(matches!(missing, CliError::Plan(_)));
    }
}
